use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: i32 = 30;
pub const DEFAULT_DELAY_BETWEEN_MESSAGES_MS: i64 = 2000;
pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const MAX_RETRIES_CEILING: i32 = 10;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantQueueSettings {
    pub tenant_id: Uuid,
    pub rate_limit_per_minute: i32,
    /// Milliseconds.
    pub delay_between_messages: i64,
    #[serde(with = "hhmm")]
    pub send_time_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub send_time_end: NaiveTime,
    pub utc_offset_minutes: i32,
    pub auto_process: bool,
    pub enable_retries: bool,
    pub log_all_messages: bool,
    pub max_retries: i32,
    pub updated_at: DateTime<Utc>,
}

impl TenantQueueSettings {
    pub fn defaults(tenant_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            delay_between_messages: DEFAULT_DELAY_BETWEEN_MESSAGES_MS,
            send_time_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            send_time_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
            utc_offset_minutes: 0,
            auto_process: true,
            enable_retries: true,
            log_all_messages: false,
            max_retries: DEFAULT_MAX_RETRIES,
            updated_at: now,
        }
    }

    pub fn delay_between_messages(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_between_messages.max(0) as u64)
    }
}

/// Partial settings update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub rate_limit_per_minute: Option<i32>,
    pub delay_between_messages: Option<i64>,
    #[serde(default, with = "hhmm::option")]
    pub send_time_start: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    pub send_time_end: Option<NaiveTime>,
    pub utc_offset_minutes: Option<i32>,
    pub auto_process: Option<bool>,
    pub enable_retries: Option<bool>,
    pub log_all_messages: Option<bool>,
    pub max_retries: Option<i32>,
}

impl SettingsUpdate {
    /// Validate and merge into `settings`. Nothing is written on error.
    pub fn apply(&self, settings: &mut TenantQueueSettings) -> Result<(), String> {
        if let Some(rate) = self.rate_limit_per_minute {
            if rate < 1 {
                return Err("rateLimitPerMinute must be a positive integer".to_string());
            }
        }
        if let Some(delay) = self.delay_between_messages {
            if delay < 0 {
                return Err("delayBetweenMessages must not be negative".to_string());
            }
        }
        if let Some(offset) = self.utc_offset_minutes {
            if !(-12 * 60..=14 * 60).contains(&offset) {
                return Err("utcOffsetMinutes must be between -720 and 840".to_string());
            }
        }
        if let Some(max) = self.max_retries {
            if !(0..=MAX_RETRIES_CEILING).contains(&max) {
                return Err(format!("maxRetries must be between 0 and {MAX_RETRIES_CEILING}"));
            }
        }

        if let Some(v) = self.rate_limit_per_minute {
            settings.rate_limit_per_minute = v;
        }
        if let Some(v) = self.delay_between_messages {
            settings.delay_between_messages = v;
        }
        if let Some(v) = self.send_time_start {
            settings.send_time_start = v;
        }
        if let Some(v) = self.send_time_end {
            settings.send_time_end = v;
        }
        if let Some(v) = self.utc_offset_minutes {
            settings.utc_offset_minutes = v;
        }
        if let Some(v) = self.auto_process {
            settings.auto_process = v;
        }
        if let Some(v) = self.enable_retries {
            settings.enable_retries = v;
        }
        if let Some(v) = self.log_all_messages {
            settings.log_all_messages = v;
        }
        if let Some(v) = self.max_retries {
            settings.max_retries = v;
        }
        Ok(())
    }
}

/// `HH:MM` time-of-day encoding used by the dashboard.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|s| NaiveTime::parse_from_str(&s, super::FORMAT))
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}
