pub mod audit_event;
pub mod message;
pub mod settings;
pub mod snapshot;
pub mod tenant;

pub use audit_event::AuditEvent;
pub use message::{
    Channel, MessageContent, MessageFilter, MessagePage, MessageStatus, NewMessage, Priority,
    QueuedMessage, Trigger,
};
pub use settings::{SettingsUpdate, TenantQueueSettings};
pub use snapshot::QueueSnapshot;
pub use tenant::Tenant;
