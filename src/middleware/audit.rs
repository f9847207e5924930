use crate::clock::Clock;
use crate::db::{NewAuditEvent, QueueStore};

/// Append an audit event. Called explicitly after mutations; a failed write
/// is logged and never fails the caller.
pub async fn log_event(store: &dyn QueueStore, clock: &dyn Clock, event: NewAuditEvent) {
    let action = event.action.clone();
    if let Err(e) = store.log_audit(event, clock.now()).await {
        tracing::error!(action = %action, "Failed to log audit event: {e}");
    }
}
