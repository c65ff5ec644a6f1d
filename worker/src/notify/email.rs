//! Email delivery over SMTP using lettre.
//!
//! This channel owns the retry budget: it refuses exhausted messages and
//! decrements `retry_count` before every attempt, so a message that keeps
//! failing is eventually dropped by the Manager instead of circulating
//! forever.

use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as Mail, Tokio1Executor};
use tracing::{info, warn};

use crate::config::Config;
use crate::notify::Message;

/// Production email sender over async SMTP.
pub type SmtpEmailSender = EmailSender<AsyncSmtpTransport<Tokio1Executor>>;

/// Email sender, generic over the mail transport so tests can substitute a
/// stub for the SMTP client.
pub struct EmailSender<T> {
    transport: T,
    from: String,
}

impl SmtpEmailSender {
    /// Build the SMTP transport from the mail settings.
    ///
    /// Certificate verification is disabled to match the deployment's
    /// self-signed relay.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tls = TlsParameters::builder(config.mail_host.clone())
            .dangerous_accept_invalid_certs(true)
            .build()
            .context("Failed to build SMTP TLS parameters")?;

        let transport =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.mail_host.as_str())
            .port(config.mail_port)
            .tls(Tls::Required(tls))
            .credentials(Credentials::new(
                config.mail_sender_email.clone(),
                config.mail_sender_password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from: config.mail_sender_email.clone(),
        })
    }
}

impl<T> EmailSender<T>
where
    T: AsyncTransport + Sync,
    T::Error: std::fmt::Display,
{
    /// Create a sender over an arbitrary transport.
    pub fn new(transport: T, from: String) -> Self {
        Self { transport, from }
    }

    /// Attempt delivery.
    ///
    /// Returns true when the message should be returned to the queue for
    /// another attempt. An exhausted budget returns false without touching
    /// the transport or the counter.
    pub async fn send(&self, message: &mut Message) -> bool {
        if !message.has_budget() {
            info!(
                recipient = %message.recipient,
                "email_retry_budget_exhausted"
            );
            return false;
        }

        let previous = message.retry_count;
        message.retry_count -= 1.0;
        info!(
            recipient = %message.recipient,
            retry_count_before = previous,
            retry_count_after = message.retry_count,
            "email_retry_count_decremented"
        );

        let mail = match self.build_mail(message) {
            Ok(mail) => mail,
            Err(e) => {
                warn!(
                    recipient = %message.recipient,
                    error = %e,
                    "email_build_failed"
                );
                return true;
            }
        };

        match self.transport.send(mail).await {
            Ok(_) => {
                info!(recipient = %message.recipient, "email_sent");
                false
            }
            Err(e) => {
                warn!(
                    recipient = %message.recipient,
                    error = %e,
                    "email_send_failed"
                );
                true
            }
        }
    }

    fn build_mail(&self, message: &Message) -> Result<Mail> {
        let from: Mailbox = self.from.parse().context("Invalid sender address")?;
        let to: Mailbox = message
            .recipient
            .parse()
            .context("Invalid recipient address")?;

        Mail::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())
            .context("Failed to assemble email")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lettre::transport::stub::AsyncStubTransport;

    fn message(retry_count: f64) -> Message {
        Message {
            recipient: "a@b.com".to_string(),
            subject: "Hi".to_string(),
            body: "<p>x</p>".to_string(),
            retry_count,
        }
    }

    #[tokio::test]
    async fn test_failed_send_decrements_and_requeues() {
        let sender = EmailSender::new(AsyncStubTransport::new_error(), "me@test.com".to_string());
        let mut msg = message(1.0);

        assert!(sender.send(&mut msg).await);
        assert_eq!(msg.retry_count, 0.0);
    }

    #[tokio::test]
    async fn test_successful_send_still_decrements() {
        let sender = EmailSender::new(AsyncStubTransport::new_ok(), "me@test.com".to_string());
        let mut msg = message(3.0);

        assert!(!sender.send(&mut msg).await);
        assert_eq!(msg.retry_count, 2.0);
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_transport() {
        // An erroring stub would flip the decision to requeue if it were
        // ever reached.
        let sender = EmailSender::new(AsyncStubTransport::new_error(), "me@test.com".to_string());
        let mut msg = message(0.0);

        assert!(!sender.send(&mut msg).await);
        assert_eq!(msg.retry_count, 0.0);
    }

    #[tokio::test]
    async fn test_bad_recipient_requeues() {
        let sender = EmailSender::new(AsyncStubTransport::new_ok(), "me@test.com".to_string());
        let mut msg = message(2.0);
        msg.recipient = "not an address".to_string();

        assert!(sender.send(&mut msg).await);
        assert_eq!(msg.retry_count, 1.0);
    }
}
