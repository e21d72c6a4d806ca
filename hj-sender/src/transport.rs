//! SMTP submission
//!
//! [`MailTransport`] is the seam between the controller and the network.
//! Implementations report the outcome as `Ok(())` when the server accepted
//! the message, `Error::PermanentSmtp` for 5xx refusals and refused
//! recipients, and `Error::TransientSmtp` for everything worth retrying.

use crate::message::OutgoingMessage;
use async_trait::async_trait;
use hj_common::config::{AppConfig, SmtpSettings};
use hj_common::{Error, Result};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::time::Duration;

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

/// STARTTLS submission through `lettre`
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
    transaction_timeout: Duration,
}

impl SmtpTransport {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::from_settings(
            &config.smtp,
            config.sending.connect_timeout,
            config.sending.transaction_timeout,
        )
    }

    pub fn from_settings(
        smtp: &SmtpSettings,
        connect_timeout: Duration,
        transaction_timeout: Duration,
    ) -> Result<Self> {
        let inner = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.server)
            .map_err(|e| Error::Config(format!("SMTP relay {}: {}", smtp.server, e)))?
            .port(smtp.port)
            .credentials(Credentials::new(smtp.user.clone(), smtp.password.clone()))
            .timeout(Some(connect_timeout))
            .build();
        Ok(Self {
            inner,
            server: format!("{}:{}", smtp.server, smtp.port),
            transaction_timeout,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let email = message.to_lettre()?;
        match tokio::time::timeout(self.transaction_timeout, self.inner.send(email)).await {
            Ok(Ok(response)) => {
                tracing::debug!(
                    server = %self.server,
                    code = %response.code(),
                    "Message accepted for delivery"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(classify_smtp_error(&e)),
            Err(_) => Err(Error::TransientSmtp(format!(
                "transaction with {} timed out after {}s",
                self.server,
                self.transaction_timeout.as_secs()
            ))),
        }
    }
}

fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> Error {
    if err.is_permanent() {
        Error::PermanentSmtp(err.to_string())
    } else {
        Error::TransientSmtp(err.to_string())
    }
}

/// Whether an error from [`MailTransport::send`] is worth another attempt
pub fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::TransientSmtp(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&Error::TransientSmtp("421 busy".into())));
        assert!(!is_retryable(&Error::PermanentSmtp("550 no such user".into())));
        assert!(!is_retryable(&Error::InvalidInput("bad address".into())));
    }
}
