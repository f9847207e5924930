pub mod email;
pub mod whatsapp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Channel, MessageContent};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// No answer within the send timeout.
    Timeout,
    /// The provider refused the message itself (bad destination, template...).
    Rejected(String),
    /// Provider or network trouble that may clear up on its own.
    Unavailable(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Rejected(_))
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Timeout => write!(f, "provider timed out"),
            ProviderError::Rejected(msg) => write!(f, "provider rejected message: {msg}"),
            ProviderError::Unavailable(msg) => write!(f, "provider unavailable: {msg}"),
        }
    }
}

/// Sends one message through a third-party API.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn channel(&self) -> Channel;
    fn name(&self) -> &str;
    async fn send(
        &self,
        to: &str,
        content: &MessageContent,
        timeout: Duration,
    ) -> Result<SendReceipt, ProviderError>;
}

pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.insert(provider.channel(), provider);
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ProviderAdapter>> {
        self.providers.get(&channel)
    }

    pub fn list(&self) -> Vec<&Arc<dyn ProviderAdapter>> {
        self.providers.values().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
