//! Best-effort notification dispatch
//!
//! Consumers (push notification layer, dashboards) are informed after a
//! committed status change or payment. Delivery is fire-and-forget and never
//! a precondition for commit: a full or closed channel drops the notice.

use crate::types::{JobStatus, PaymentKind, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A committed state change worth telling the outside world about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notice {
    /// A job moved to a new status
    JobStatusChanged {
        /// Job ID
        job_id: Uuid,
        /// New status
        status: JobStatus,
    },
    /// A payment was recorded against a wallet
    PaymentRecorded {
        /// Payment ID
        payment_id: Uuid,
        /// Wallet owner
        user_id: UserId,
        /// Signed amount, minor units
        amount: i64,
        /// Payment classification
        kind: PaymentKind,
    },
    /// An escrow changed status
    EscrowChanged {
        /// Job the escrow funds
        job_id: Uuid,
        /// New escrow status
        status: crate::types::EscrowStatus,
    },
}

/// Dispatch seam for committed notices
pub trait Notifier: Send + Sync {
    /// Deliver one notice, best-effort
    fn notify(&self, notice: Notice);
}

/// Broadcast-channel notifier; the default dispatcher
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notice>,
}

impl BroadcastNotifier {
    /// Create with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to committed notices
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notice: Notice) {
        // No subscribers is fine; delivery is best-effort
        let _ = self.tx.send(notice);
    }
}

/// Notifier that drops everything (tests, embedded use)
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: Notice) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        let notice = Notice::JobStatusChanged { job_id: Uuid::now_v7(), status: JobStatus::Pending };
        notifier.notify(notice.clone());

        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[test]
    fn test_notify_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new(8);
        notifier.notify(Notice::JobStatusChanged {
            job_id: Uuid::now_v7(),
            status: JobStatus::Draft,
        });
        // No panic, no error
    }
}
