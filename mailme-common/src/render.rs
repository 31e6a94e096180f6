//! Rendering of notification bodies.
//!
//! Templates use `${name}` placeholders. Substitution is "safe": unknown
//! placeholders are left in place, `$$` produces a literal `$`. The
//! placeholders available to both templates are `title`, `message`,
//! `details`, `error_info`, `status_class`, `timestamp` and (text only)
//! `separator`.

use std::{collections::HashMap, fmt::Write, sync::Arc};

use chrono::{DateTime, Local};

use crate::{error::RenderError, outcome::Outcome};

pub const DEFAULT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body { font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; line-height: 1.6; margin: 0; padding: 0; background-color: #f8f9fa; color: #212529; }
        .container { max-width: 800px; margin: 0 auto; padding: 30px 20px; background-color: #ffffff; border-radius: 8px; }
        .header { text-align: center; margin-bottom: 30px; padding-bottom: 20px; border-bottom: 1px solid #e9ecef; }
        .title { color: #2c3e50; font-size: 24px; font-weight: 600; margin: 0; }
        .success { color: #198754; padding: 15px; background-color: #d1e7dd; border-radius: 6px; margin-bottom: 20px; }
        .error { color: #842029; padding: 15px; background-color: #f8d7da; border-radius: 6px; margin-bottom: 20px; }
        .details { background-color: #f8f9fa; border-radius: 6px; padding: 15px; margin-bottom: 20px; font-family: 'SF Mono', Consolas, monospace; font-size: 14px; white-space: pre-wrap; word-wrap: break-word; }
        .footer { text-align: center; margin-top: 30px; padding-top: 20px; border-top: 1px solid #e9ecef; color: #6c757d; font-size: 14px; }
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1 class="title">${title}</h1>
        </div>
        <div class="content">
            <div class="${status_class}">
                ${message}
            </div>
            ${details}
            ${error_info}
        </div>
        <div class="footer">
            <p>Sent by mailme</p>
            <p>${timestamp}</p>
        </div>
    </div>
</body>
</html>
"#;

pub const DEFAULT_TEXT_TEMPLATE: &str = "${title}
${separator}

${message}

${details}
${error_info}

---
Sent by mailme
${timestamp}
";

/// Everything a renderer may use to build the bodies.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub title: &'a str,
    pub outcome: &'a Outcome,
    /// Captured log text, if logs were attached.
    pub logs: Option<&'a str>,
    pub timestamp: DateTime<Local>,
}

impl RenderContext<'_> {
    /// Headline describing the outcome.
    #[must_use]
    pub fn status_message(&self) -> String {
        match self.outcome {
            Outcome::Success => "Task completed successfully!".to_string(),
            Outcome::Failure { message, .. } => format!("Task failed: {message}"),
        }
    }

    #[must_use]
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Plain-text and HTML bodies of one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub html: String,
}

impl RenderedMessage {
    /// Minimal bodies used when the configured renderer fails.
    #[must_use]
    pub fn fallback(context: &RenderContext<'_>) -> Self {
        let mut text = format!("{}\n\n{}\n", context.title, context.status_message());
        if let Some(logs) = context.logs {
            let _ = write!(text, "\n{logs}\n");
        }
        let html = format!(
            "<html><body><h1>{}</h1><p>{}</p>{}</body></html>",
            escape_html(context.title),
            escape_html(&context.status_message()),
            context
                .logs
                .map(|logs| format!("<pre>{}</pre>", escape_html(logs)))
                .unwrap_or_default(),
        );
        Self { text, html }
    }
}

/// Produces the bodies of a notification.
pub trait Render: Send + Sync {
    fn render(&self, context: &RenderContext<'_>) -> Result<RenderedMessage, RenderError>;
}

impl<F> Render for F
where
    F: Fn(&RenderContext<'_>) -> Result<RenderedMessage, RenderError> + Send + Sync,
{
    fn render(&self, context: &RenderContext<'_>) -> Result<RenderedMessage, RenderError> {
        self(context)
    }
}

/// Shared handle to a renderer, as stored in configuration.
pub type Renderer = Arc<dyn Render>;

/// `${name}` template pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    html: String,
    text: String,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            html: DEFAULT_HTML_TEMPLATE.to_string(),
            text: DEFAULT_TEXT_TEMPLATE.to_string(),
        }
    }
}

impl Template {
    /// Builds a template pair, falling back to the defaults for missing halves.
    ///
    /// Fails if either template contains an unterminated `${`.
    pub fn new(html: Option<String>, text: Option<String>) -> Result<Self, RenderError> {
        let html = html.unwrap_or_else(|| DEFAULT_HTML_TEMPLATE.to_string());
        let text = text.unwrap_or_else(|| DEFAULT_TEXT_TEMPLATE.to_string());
        validate("html", &html)?;
        validate("text", &text)?;
        Ok(Self { html, text })
    }
}

impl Render for Template {
    fn render(&self, context: &RenderContext<'_>) -> Result<RenderedMessage, RenderError> {
        let message = context.status_message();
        let timestamp = context.formatted_timestamp();
        let status_class = if context.outcome.is_success() {
            "success"
        } else {
            "error"
        };

        let mut html_vars = HashMap::from([
            ("title", escape_html(context.title)),
            ("message", escape_html(&message)),
            ("status_class", status_class.to_string()),
            ("timestamp", timestamp.clone()),
            ("details", String::new()),
            ("error_info", String::new()),
        ]);
        let mut text_vars = HashMap::from([
            ("title", context.title.to_string()),
            ("separator", "=".repeat(context.title.chars().count())),
            ("message", message),
            ("status_class", status_class.to_string()),
            ("timestamp", timestamp),
            ("details", String::new()),
            ("error_info", String::new()),
        ]);

        if let Some(logs) = context.logs.filter(|logs| !logs.is_empty()) {
            html_vars.insert(
                "details",
                format!(r#"<div class="details">{}</div>"#, escape_html(logs)),
            );
            text_vars.insert("details", format!("Captured logs:\n{logs}"));
        }

        if let Outcome::Failure { message, type_name } = context.outcome {
            html_vars.insert(
                "error_info",
                format!(
                    r#"<div class="details error">{}: {}</div>"#,
                    escape_html(type_name),
                    escape_html(message)
                ),
            );
            text_vars.insert("error_info", format!("Error ({type_name}): {message}"));
        }

        Ok(RenderedMessage {
            text: substitute(&self.text, &text_vars),
            html: substitute(&self.html, &html_vars),
        })
    }
}

fn validate(template: &'static str, source: &str) -> Result<(), RenderError> {
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1)) {
            (b'$', Some(b'$')) => i += 2,
            (b'$', Some(b'{')) => {
                let close = source[i + 2..].find('}').ok_or(RenderError::MalformedPlaceholder {
                    template,
                    position: i,
                })?;
                i += close + 3;
            }
            _ => i += 1,
        }
    }
    Ok(())
}

/// Replaces `${name}` with `vars[name]`, leaving unknown placeholders untouched.
fn substitute(source: &str, vars: &HashMap<&str, String>) -> String {
    let mut output = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(pos) = rest.find('$') {
        output.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("$$") {
            output.push('$');
            rest = &tail[2..];
        } else if let Some(body) = tail.strip_prefix("${")
            && let Some(end) = body.find('}')
        {
            let name = &body[..end];
            match vars.get(name) {
                Some(value) => output.push_str(value),
                None => output.push_str(&tail[..end + 3]),
            }
            rest = &body[end + 1..];
        } else {
            output.push('$');
            rest = &tail[1..];
        }
    }

    output.push_str(rest);
    output
}

#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}
