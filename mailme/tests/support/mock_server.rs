//! Mock SMTP submission server for notification tests.
//!
//! Speaks just enough SMTP for the notification client: EHLO with
//! `AUTH PLAIN LOGIN`, both AUTH exchanges, the envelope and DATA. It can
//! turn away the first connections with a 421 greeting, reject EHLO or
//! credentials, and records every accepted message.
#![allow(dead_code)]

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// AUTH with the mechanism used
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: Reply,
    busy_connections: usize,
    capabilities: Vec<String>,
    ehlo_rejected: bool,
    auth_response: Reply,
    data_end_response: Reply,
    response_delay: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.test ESMTP ready"),
            busy_connections: 0,
            capabilities: vec![
                "mock.test".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
                "SIZE 10000000".to_string(),
            ],
            ehlo_rejected: false,
            auth_response: Reply::new(235, "2.7.0 Authentication successful"),
            data_end_response: Reply::new(250, "2.0.0 OK: queued"),
            response_delay: None,
        }
    }
}

fn multiline(code: u16, lines: &[String]) -> Vec<u8> {
    let mut response = String::new();
    for (i, line) in lines.iter().enumerate() {
        let separator = if i + 1 < lines.len() { '-' } else { ' ' };
        let _ = write!(response, "{code}{separator}{line}\r\n");
    }
    response.into_bytes()
}

struct State {
    config: MockServerConfig,
    connections: AtomicUsize,
    commands: RwLock<Vec<SmtpCommand>>,
    messages: RwLock<Vec<String>>,
}

/// Mock SMTP server bound to a random local port
pub struct MockSmtpServer {
    addr: SocketAddr,
    state: Arc<State>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections accepted so far
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.state.commands.read().await.clone()
    }

    /// Messages accepted so far, dot-unstuffed, without the terminating dot
    pub async fn messages(&self) -> Vec<String> {
        self.state.messages.read().await.clone()
    }

    /// Waits until at least `count` messages were accepted, or `limit` elapses
    pub async fn wait_for_messages(&self, count: usize, limit: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let messages = self.messages().await;
            if messages.len() >= count || tokio::time::Instant::now() >= deadline {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn reply(
        writer: &mut (impl AsyncWriteExt + Unpin),
        config: &MockServerConfig,
        bytes: &[u8],
    ) -> std::io::Result<()> {
        if let Some(delay) = config.response_delay {
            tokio::time::sleep(delay).await;
        }
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    async fn handle_client(mut stream: TcpStream, state: Arc<State>) -> Result<(), Box<dyn std::error::Error>> {
        let index = state.connections.fetch_add(1, Ordering::SeqCst);
        let config = &state.config;

        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        if index < config.busy_connections {
            let busy = Reply::new(421, "4.3.2 Service not available, try again later");
            writer.write_all(&busy.to_bytes()).await?;
            writer.flush().await?;
            return Ok(());
        }

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;
        if config.greeting.code != 220 {
            return Ok(());
        }

        loop {
            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let command_line = line.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line.as_str(), ""));

            let (response, command) = match verb.to_uppercase().as_str() {
                "EHLO" if config.ehlo_rejected => (
                    Reply::new(502, "5.5.1 EHLO not implemented").to_bytes(),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "EHLO" => (
                    multiline(250, &config.capabilities),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "HELO" => (
                    Reply::new(250, "mock.test").to_bytes(),
                    SmtpCommand::Helo(argument.to_string()),
                ),
                "AUTH" => {
                    let mechanism = argument
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_uppercase();
                    if mechanism == "LOGIN" {
                        for prompt in ["VXNlcm5hbWU6", "UGFzc3dvcmQ6"] {
                            Self::reply(&mut writer, config, &Reply::new(334, prompt).to_bytes())
                                .await?;
                            line.clear();
                            if reader.read_line(&mut line).await? == 0 {
                                return Ok(());
                            }
                        }
                    }
                    (
                        config.auth_response.to_bytes(),
                        SmtpCommand::Auth(mechanism),
                    )
                }
                "MAIL" => (
                    Reply::new(250, "2.1.0 OK").to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    Reply::new(250, "2.1.5 OK").to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => (
                    Reply::new(354, "Start mail input; end with <CRLF>.<CRLF>").to_bytes(),
                    SmtpCommand::Data,
                ),
                "QUIT" => {
                    state.commands.write().await.push(SmtpCommand::Quit);
                    Self::reply(&mut writer, config, &Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    Reply::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(command_line.clone()),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            state.commands.write().await.push(command);
            Self::reply(&mut writer, config, &response).await?;

            if !is_data {
                continue;
            }

            let mut message = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                if line.trim_end() == "." {
                    break;
                }
                message.push_str(line.strip_prefix('.').unwrap_or(&line));
            }

            let accepted = (200..300).contains(&config.data_end_response.code);
            if accepted {
                state.messages.write().await.push(message);
            }
            Self::reply(&mut writer, config, &config.data_end_response.to_bytes()).await?;
        }
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    /// Replace the greeting; anything but 220 closes the connection right after
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    /// Turn away the first `count` connections with a 421 greeting
    #[must_use]
    pub const fn with_busy_connections(mut self, count: usize) -> Self {
        self.config.busy_connections = count;
        self
    }

    /// EHLO reply lines, the first being the server name
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    /// Answer EHLO with 502, as a server without ESMTP does
    #[must_use]
    pub const fn with_ehlo_rejected(mut self) -> Self {
        self.config.ehlo_rejected = true;
        self
    }

    /// Final reply to AUTH
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = Reply::new(code, message);
        self
    }

    /// Reply after the message content
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = Reply::new(code, message);
        self
    }

    /// Delay before every reply after the greeting
    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Bind to a random local port and start serving
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(State {
            config: self.config,
            connections: AtomicUsize::new(0),
            commands: RwLock::new(Vec::new()),
            messages: RwLock::new(Vec::new()),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let server_state = Arc::clone(&state);
        let server_shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            while !server_shutdown.load(Ordering::Relaxed) {
                // Accept with a timeout so the shutdown flag is checked
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                let state = Arc::clone(&server_state);
                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::handle_client(stream, state).await {
                        tracing::debug!("Mock server client error: {e}");
                    }
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            state,
            shutdown,
        })
    }
}
