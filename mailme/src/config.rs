//! Notification configuration.
//!
//! [`NotificationConfig`] is immutable once built. Everything that can be
//! wrong with it (missing credentials, no recipients, malformed addresses,
//! an unusable template) is reported by [`NotificationConfigBuilder::build`]
//! as a [`ConfigError`], never discovered when the notification is sent.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use mailme_common::{
    ConfigError,
    config::{ClientTimeouts, TransportConfig, TransportConfigBuilder, env, parse_mailbox},
    render::{Render, Renderer, Template},
};
use mailme_delivery::RetryPolicy;

/// Validated notification settings.
#[derive(Clone)]
pub struct NotificationConfig {
    recipients: Vec<String>,
    subject: String,
    attach_logs: bool,
    sender: String,
    transport: TransportConfig,
    retry: RetryPolicy,
    renderer: Renderer,
    async_mode: bool,
}

impl NotificationConfig {
    #[must_use]
    pub fn builder() -> NotificationConfigBuilder {
        NotificationConfigBuilder::default()
    }

    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub const fn attach_logs(&self) -> bool {
        self.attach_logs
    }

    /// Envelope and header sender. Defaults to the SMTP username.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub const fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn renderer(&self) -> &dyn Render {
        self.renderer.as_ref()
    }

    /// Whether async closes return before delivery completes.
    #[must_use]
    pub const fn async_mode(&self) -> bool {
        self.async_mode
    }
}

impl fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("recipients", &self.recipients)
            .field("subject", &self.subject)
            .field("attach_logs", &self.attach_logs)
            .field("sender", &self.sender)
            .field("transport", &self.transport)
            .field("retry", &self.retry)
            .field("async_mode", &self.async_mode)
            .finish_non_exhaustive()
    }
}

/// Builder for [`NotificationConfig`].
///
/// Transport settings that are not given fall back to the `EMAIL_*`
/// environment variables.
#[derive(Clone, Default)]
pub struct NotificationConfigBuilder {
    recipients: Vec<String>,
    subject: Option<String>,
    attach_logs: Option<bool>,
    sender: Option<String>,
    transport: TransportConfigBuilder,
    max_retries: Option<u32>,
    retry: Option<RetryPolicy>,
    renderer: Option<Renderer>,
    async_mode: Option<bool>,
}

impl NotificationConfigBuilder {
    /// Adds a recipient.
    #[must_use]
    pub fn email(mut self, address: impl Into<String>) -> Self {
        self.recipients.push(address.into());
        self
    }

    /// Adds several recipients.
    #[must_use]
    pub fn recipients<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients.extend(addresses.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub const fn attach_logs(mut self, attach: bool) -> Self {
        self.attach_logs = Some(attach);
        self
    }

    /// Sets the sender address used in `MAIL FROM` and the `From` header.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.sender = Some(address.into());
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.transport = self.transport.host(host);
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.transport = self.transport.port(port);
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.transport = self.transport.username(username);
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.transport = self.transport.password(password);
        self
    }

    #[must_use]
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.transport = self.transport.use_tls(use_tls);
        self
    }

    #[must_use]
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.transport = self.transport.accept_invalid_certs(accept);
        self
    }

    #[must_use]
    pub fn helo_name(mut self, name: impl Into<String>) -> Self {
        self.transport = self.transport.helo_name(name);
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.transport = self.transport.timeouts(timeouts);
        self
    }

    /// Replaces the transport settings wholesale.
    #[must_use]
    pub fn transport(mut self, transport: TransportConfigBuilder) -> Self {
        self.transport = transport;
        self
    }

    /// Maximum number of delivery attempts (default 3).
    #[must_use]
    pub const fn max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    /// Retry timing. `max_retries`, when set, overrides `max_attempts`.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Uses a custom renderer for the message bodies.
    #[must_use]
    pub fn renderer(mut self, renderer: impl Render + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Uses a custom `${name}` template pair.
    #[must_use]
    pub fn template(self, template: Template) -> Self {
        self.renderer(template)
    }

    #[must_use]
    pub const fn async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = Some(async_mode);
        self
    }

    /// Applies values from a configuration file that were not set explicitly.
    pub fn with_file(mut self, file: FileConfig) -> Result<Self, ConfigError> {
        if self.recipients.is_empty() {
            self.recipients = file.recipients;
        }
        self.subject = self.subject.or(file.subject);
        self.attach_logs = self.attach_logs.or(file.attach_logs);
        self.sender = self.sender.or(file.from);
        self.transport = self.transport.or(file.transport);
        self.max_retries = self.max_retries.or(file.max_retries);
        self.retry = self.retry.or(file.retry);
        self.async_mode = self.async_mode.or(file.async_mode);

        if self.renderer.is_none()
            && let Some(template) = file.template
        {
            self = self.template(template.load()?);
        }

        Ok(self)
    }

    /// Validates the configuration, resolving transport settings against
    /// the process environment.
    pub fn build(self) -> Result<NotificationConfig, ConfigError> {
        self.build_with(env::process)
    }

    /// Validates the configuration against an arbitrary variable lookup.
    pub fn build_with<F>(self, lookup: F) -> Result<NotificationConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.recipients.is_empty() {
            return Err(ConfigError::NoRecipients);
        }
        let recipients = self
            .recipients
            .iter()
            .map(|address| parse_mailbox(address))
            .collect::<Result<Vec<_>, _>>()?;

        let transport = self.transport.build_with(lookup)?;

        let sender = parse_mailbox(
            self.sender
                .as_deref()
                .unwrap_or(&transport.credentials.username),
        )?;

        let mut retry = self.retry.unwrap_or_default();
        if let Some(attempts) = self.max_retries {
            retry.max_attempts = attempts;
        }
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_retries",
                reason: "at least one delivery attempt is required".to_string(),
            });
        }
        retry.validate()?;

        Ok(NotificationConfig {
            recipients,
            subject: self.subject.unwrap_or_else(defaults::subject),
            attach_logs: self.attach_logs.unwrap_or(false),
            sender,
            transport,
            retry,
            renderer: self
                .renderer
                .unwrap_or_else(|| Arc::new(Template::default())),
            async_mode: self.async_mode.unwrap_or(false),
        })
    }
}

/// On-disk configuration, as read by the `mailme` binary.
///
/// ```toml
/// recipients = ["ops@example.com"]
/// subject = "Nightly import"
/// attach_logs = true
///
/// [transport]
/// host = "smtp.example.com"
/// port = 587
/// username = "robot@example.com"
///
/// [retry]
/// max_attempts = 5
/// base_delay_ms = 2000
///
/// [template]
/// html = "templates/notification.html"
/// ```
#[derive(Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub recipients: Vec<String>,
    pub subject: Option<String>,
    pub attach_logs: Option<bool>,
    pub from: Option<String>,
    pub transport: TransportConfigBuilder,
    pub max_retries: Option<u32>,
    pub retry: Option<RetryPolicy>,
    pub template: Option<TemplateFiles>,
    pub async_mode: Option<bool>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&contents)?;
        if let Some(template) = config.template.as_mut() {
            template.resolve_relative_to(path.parent().unwrap_or_else(|| Path::new(".")));
        }

        Ok(config)
    }
}

/// Paths of custom template files. A missing half uses the default template.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateFiles {
    pub html: Option<PathBuf>,
    pub text: Option<PathBuf>,
}

impl TemplateFiles {
    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [&mut self.html, &mut self.text].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    fn load(&self) -> Result<Template, ConfigError> {
        let read = |path: &Option<PathBuf>| {
            path.as_ref()
                .map(|path| {
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })
                })
                .transpose()
        };

        Template::new(read(&self.html)?, read(&self.text)?).map_err(|e| ConfigError::InvalidValue {
            field: "template",
            reason: e.to_string(),
        })
    }
}

mod defaults {
    pub fn subject() -> String {
        "Task Completed".to_string()
    }
}
