use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Email configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Failed to send email: {0}")]
    Send(String),
}

/// Notification sink for security alerts.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub from_email: String,
}

pub struct SmtpEmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailService {
    pub fn new(settings: &SmtpSettings) -> Result<Self, EmailError> {
        let creds = Credentials::new(
            settings.user.clone(),
            settings.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| EmailError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(settings.port)
            .credentials(creds)
            .timeout(Some(std::time::Duration::from_secs(10)))
            .build();

        let from = format!("Security Alerts <{}>", settings.from_email)
            .parse()
            .map_err(|e| EmailError::Configuration(format!("Invalid from address: {}", e)))?;

        tracing::info!(host = %settings.host, "Email service initialized with SMTP");
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailService {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| EmailError::InvalidRecipient(format!("{}: {}", to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| EmailError::Send(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::Send(e.to_string()))?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

/// Used when no SMTP host is configured; mail is logged and dropped.
pub struct LogOnlyEmailService;

#[async_trait]
impl EmailProvider for LogOnlyEmailService {
    async fn send_email(&self, to: &str, subject: &str, _html: &str) -> Result<(), EmailError> {
        tracing::warn!(to = %to, subject = %subject, "SMTP not configured, alert email not sent");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Records every message instead of sending it.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<SentEmail>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EmailError::Send("mock transport failure".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                html: html.to_string(),
            });
        Ok(())
    }
}
