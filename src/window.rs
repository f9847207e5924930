use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};

use crate::models::TenantQueueSettings;

/// Daily local-time interval during which a tenant may send.
#[derive(Debug, Clone, Copy)]
pub struct SendWindow {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

impl SendWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or(Utc.fix());
        Self { start, end, offset }
    }

    pub fn from_settings(settings: &TenantQueueSettings) -> Self {
        Self::new(
            settings.send_time_start,
            settings.send_time_end,
            settings.utc_offset_minutes,
        )
    }

    /// Bounds are inclusive. A window with `start > end` wraps midnight and
    /// one with `start == end` is open all day.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset).time();
        if self.start == self.end {
            true
        } else if self.start < self.end {
            local >= self.start && local <= self.end
        } else {
            local >= self.start || local <= self.end
        }
    }
}

pub fn is_within_window(settings: &TenantQueueSettings, now: DateTime<Utc>) -> bool {
    SendWindow::from_settings(settings).contains(now)
}
