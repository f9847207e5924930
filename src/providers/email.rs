use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{ProviderAdapter, ProviderError, SendReceipt};
use crate::config::SmtpConfig;
use crate::models::{Channel, MessageContent};

const DEFAULT_SUBJECT: &str = "Nova mensagem";

pub struct SmtpEmailProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpEmailProvider {
    pub fn new(config: &SmtpConfig) -> Result<Self, String> {
        let creds = Credentials::new(config.user.clone(), config.pass.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| format!("SMTP relay error: {e}"))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for SmtpEmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn name(&self) -> &str {
        "SMTP"
    }

    async fn send(
        &self,
        to: &str,
        content: &MessageContent,
        timeout: Duration,
    ) -> Result<SendReceipt, ProviderError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| ProviderError::Unavailable(format!("Invalid from address: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| ProviderError::Rejected(format!("Invalid to address: {e}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(content.subject.as_deref().unwrap_or(DEFAULT_SUBJECT))
            .header(ContentType::TEXT_HTML)
            .body(content.body.clone())
            .map_err(|e| ProviderError::Rejected(format!("Failed to build email: {e}")))?;

        let response = tokio::time::timeout(timeout, self.transport.send(message))
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(|e| {
                if e.is_permanent() {
                    ProviderError::Rejected(format!("Failed to send email: {e}"))
                } else {
                    ProviderError::Unavailable(format!("Failed to send email: {e}"))
                }
            })?;

        Ok(SendReceipt {
            provider_message_id: response.message().next().map(str::to_string),
        })
    }
}
