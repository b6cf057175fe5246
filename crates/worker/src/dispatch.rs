use async_trait::async_trait;

use granta_core::ports::{DispatchOutcome, EscalationNotice, NotificationDispatcher};

/// Dispatcher that records notices in the structured log. The portal's
/// messaging integration replaces this in deployments that deliver real
/// notifications.
#[derive(Default)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn send(&self, notice: EscalationNotice) -> DispatchOutcome {
        tracing::info!(
            request_id = %notice.request.id,
            recipient_id = %notice.recipient.id,
            approver_id = %notice.approver.id,
            level = ?notice.level,
            pending_since = %notice.pending_since.to_rfc3339(),
            "escalation notice"
        );
        DispatchOutcome::delivered()
    }
}
