//! Email transports.

use crate::email::EmailData;
use crate::error::{MailError, MailResult};
use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info};

/// Email transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit one email.
    async fn send(&self, email: &EmailData) -> MailResult<()>;
}

/// SMTP security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpSecurity {
    /// No encryption (port 25, not recommended).
    None,
    /// STARTTLS upgrade (port 587).
    #[default]
    StartTls,
    /// Implicit TLS (port 465).
    Tls,
}

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Security mode.
    pub security: SmtpSecurity,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Sender address, e.g. `"Dosewatch <noreply@dosewatch.app>"`.
    pub from: String,
    /// Connection timeout.
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Create a configuration for a host with the default STARTTLS setup.
    pub fn new(host: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 587,
            security: SmtpSecurity::StartTls,
            username: None,
            password: None,
            from: from.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use implicit TLS security (port 465).
    pub fn tls(mut self) -> Self {
        self.security = SmtpSecurity::Tls;
        self.port = 465;
        self
    }

    /// Use no encryption (not recommended).
    pub fn insecure(mut self) -> Self {
        self.security = SmtpSecurity::None;
        self.port = 25;
        self
    }

    /// Set the connection timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configuration for Gmail.
    pub fn gmail(
        username: impl Into<String>,
        password: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self::new("smtp.gmail.com", from).credentials(username, password)
    }

    /// Configuration for Amazon SES.
    pub fn amazon_ses(
        region: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self::new(format!("email-smtp.{}.amazonaws.com", region), from)
            .credentials(username, password)
    }

    /// Configuration for SendGrid.
    pub fn sendgrid(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self::new("smtp.sendgrid.net", from).credentials("apikey", api_key)
    }
}

/// Envelope signature header attached to single-item emails.
#[derive(Debug, Clone)]
struct SignatureHeader(String);

impl Header for SignatureHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Dosewatch-Signature")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// SMTP transport over lettre.
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    /// Create an SMTP transport.
    pub fn new(config: SmtpConfig) -> MailResult<Self> {
        let from: Mailbox = config.from.parse()?;

        let mut builder = match config.security {
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?,
        };

        builder = builder.port(config.port).timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        info!(host = %config.host, port = config.port, security = ?config.security, "SMTP transport initialized");

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &EmailData) -> MailResult<()> {
        let to: Mailbox = email.to.parse()?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML);
        if let Some(signature) = &email.signature {
            builder = builder.header(SignatureHeader(signature.clone()));
        }
        let message = builder.body(email.html.clone())?;

        debug!(to = %email.to, subject = %email.subject, "sending email via SMTP");
        self.transport.send(message).await?;
        Ok(())
    }
}
