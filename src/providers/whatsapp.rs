use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{ProviderAdapter, ProviderError, SendReceipt};
use crate::config::WhatsAppConfig;
use crate::models::{Channel, MessageContent};

/// WhatsApp delivery through an HTTP gateway (Twilio/Gupshup relay) that
/// accepts `{to, body, template}` JSON with a bearer token.
pub struct HttpWhatsAppProvider {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
}

impl HttpWhatsAppProvider {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for HttpWhatsAppProvider {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn name(&self) -> &str {
        "WhatsApp HTTP gateway"
    }

    async fn send(
        &self,
        to: &str,
        content: &MessageContent,
        timeout: Duration,
    ) -> Result<SendReceipt, ProviderError> {
        let body = json!({
            "to": to,
            "body": &content.body,
            "template": &content.template_id,
        });

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        let resp_body = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(1024)
            .collect::<String>();

        if status.is_success() {
            return Ok(SendReceipt {
                provider_message_id: message_id(&resp_body),
            });
        }

        let reason = format!("HTTP {}: {}", status.as_u16(), resp_body);
        match status.as_u16() {
            408 | 429 => Err(ProviderError::Unavailable(reason)),
            400..=499 => Err(ProviderError::Rejected(reason)),
            _ => Err(ProviderError::Unavailable(reason)),
        }
    }
}

/// Gateways disagree on the field name; take the first one present.
fn message_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["id", "sid", "messageId"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
