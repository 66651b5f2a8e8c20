use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Outbound message channel. Plain-text only.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// A message ready to hand to a `Notifier`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub subject: String,
    pub body: String,
}

pub fn verification_otp_message(otp: &str, ttl_minutes: i64) -> OutboundMessage {
    OutboundMessage {
        subject: "Verify your email address".to_string(),
        body: format!(
            "Your verification code is {}.\n\nIt expires in {} minutes. If you did not create an account, you can ignore this email.",
            otp, ttl_minutes
        ),
    }
}

pub fn reset_otp_message(otp: &str, ttl_minutes: i64) -> OutboundMessage {
    OutboundMessage {
        subject: "Your password reset code".to_string(),
        body: format!(
            "Your password reset code is {}.\n\nIt expires in {} minutes. If you did not request a reset, you can ignore this email.",
            otp, ttl_minutes
        ),
    }
}

pub fn reset_link_message(link: &str, ttl_minutes: i64) -> OutboundMessage {
    OutboundMessage {
        subject: "Reset your password".to_string(),
        body: format!(
            "We received a request to reset your password. Open the link below to choose a new one:\n\n{}\n\nThe link expires in {} minutes and can be used once. If you did not request a reset, you can ignore this email.",
            link, ttl_minutes
        ),
    }
}

#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        // 465 is implicit TLS; anything else negotiates STARTTLS.
        let builder = if config.port == 465 {
            SmtpTransport::relay(&config.host)?
        } else {
            SmtpTransport::starttls_relay(&config.host)?
        };

        let mailer = builder
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        // Send email in blocking thread pool to avoid blocking async runtime
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email)).await?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to, "Failed to send email");
                Err(e.into())
            }
        }
    }
}

/// Development notifier used when no SMTP host is configured.
///
/// Only the recipient and subject are logged; bodies carry codes and links.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::warn!(to = %to, subject = %subject, "SMTP not configured; email not delivered");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Captures outgoing messages in memory; can be told to fail.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most recent message addressed to `to`.
    pub fn last_to(&self, to: &str) -> Option<SentMessage> {
        self.sent().into_iter().rev().find(|m| m.to == to)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("mock notifier configured to fail");
        }

        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("mock notifier lock poisoned"))?
            .push(SentMessage {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    #[test]
    fn test_smtp_notifier_creation() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "mailer@example.com".to_string(),
            password: Secret::new("app-password".to_string()),
            from: "Identity <no-reply@example.com>".to_string(),
        };

        assert!(SmtpNotifier::new(&config).is_ok());
    }

    #[test]
    fn test_messages_embed_code_and_ttl() {
        let msg = verification_otp_message("123456", 10);
        assert!(msg.body.contains("123456"));
        assert!(msg.body.contains("10 minutes"));

        let msg = reset_link_message("https://app.example.com/reset?token=abc", 30);
        assert!(msg.body.contains("https://app.example.com/reset?token=abc"));
    }

    #[tokio::test]
    async fn test_mock_notifier_records_and_fails() {
        let notifier = MockNotifier::new();
        notifier.send("a@x.com", "hi", "body").await.unwrap();
        assert_eq!(notifier.last_to("a@x.com").unwrap().subject, "hi");

        notifier.set_failing(true);
        assert!(notifier.send("a@x.com", "hi", "body").await.is_err());
        assert_eq!(notifier.sent().len(), 1);
    }
}
