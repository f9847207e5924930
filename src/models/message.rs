use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound channel a message is delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whatsapp" => Some(Channel::Whatsapp),
            "email" => Some(Channel::Email),
            _ => None,
        }
    }
}

/// Dispatch priority. Variant order is selection order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
            MessageStatus::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "processing" => Some(MessageStatus::Processing),
            "completed" => Some(MessageStatus::Completed),
            "failed" => Some(MessageStatus::Failed),
            "retry" => Some(MessageStatus::Retry),
            _ => None,
        }
    }

    /// Short label shown on the dashboard.
    pub fn label(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "Pendente",
            MessageStatus::Processing => "Processando",
            MessageStatus::Completed => "Concluído",
            MessageStatus::Failed => "Falhou",
            MessageStatus::Retry => "Tentativa",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Failed)
    }

    /// Waiting for a dispatch tick to pick it up.
    pub fn is_queued(&self) -> bool {
        matches!(self, MessageStatus::Pending | MessageStatus::Retry)
    }
}

/// Origin of a message. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    IndicatorJoined,
    LeadIndicated,
    RewardEarned,
    CampaignStarted,
    FollowUp,
    Manual,
    Test,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::IndicatorJoined => "indicator_joined",
            Trigger::LeadIndicated => "lead_indicated",
            Trigger::RewardEarned => "reward_earned",
            Trigger::CampaignStarted => "campaign_started",
            Trigger::FollowUp => "follow_up",
            Trigger::Manual => "manual",
            Trigger::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "indicator_joined" => Some(Trigger::IndicatorJoined),
            "lead_indicated" => Some(Trigger::LeadIndicated),
            "reward_earned" => Some(Trigger::RewardEarned),
            "campaign_started" => Some(Trigger::CampaignStarted),
            "follow_up" => Some(Trigger::FollowUp),
            "manual" => Some(Trigger::Manual),
            "test" => Some(Trigger::Test),
            _ => None,
        }
    }
}

/// Rendered payload handed to the provider untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub channel: Channel,
    pub to: String,
    pub content: MessageContent,
    pub trigger: Trigger,
    pub client_id: Option<String>,
    pub priority: Priority,
    pub status: MessageStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Earliest time the message may be selected again.
    pub not_before: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message as accepted from a producer, before it is stored.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: Uuid,
    pub channel: Channel,
    pub to: String,
    pub content: MessageContent,
    pub trigger: Trigger,
    pub client_id: Option<String>,
    pub priority: Priority,
    pub max_retries: i32,
}

impl NewMessage {
    pub fn into_queued(self, id: Uuid, now: DateTime<Utc>) -> QueuedMessage {
        QueuedMessage {
            id,
            tenant_id: self.tenant_id,
            channel: self.channel,
            to: self.to,
            content: self.content,
            trigger: self.trigger,
            client_id: self.client_id,
            priority: self.priority,
            status: MessageStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            not_before: now,
            processing_started_at: None,
            last_error: None,
            provider_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Conjunctive listing filters. `None` matches everything.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub channel: Option<Channel>,
    pub priority: Option<Priority>,
    pub status: Option<MessageStatus>,
    pub client_id: Option<String>,
}

impl MessageFilter {
    pub fn matches(&self, msg: &QueuedMessage) -> bool {
        self.channel.is_none_or(|c| c == msg.channel)
            && self.priority.is_none_or(|p| p == msg.priority)
            && self.status.is_none_or(|s| s == msg.status)
            && self
                .client_id
                .as_deref()
                .is_none_or(|c| msg.client_id.as_deref() == Some(c))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<QueuedMessage>,
    pub total: i64,
}
