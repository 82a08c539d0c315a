use crate::services::traits::StatusNotifier;
use crate::types::StatusUpdate;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// Fans status updates out to every live subscriber. Subscribers whose
/// receiver was dropped are pruned on the next send.
#[derive(Default)]
pub struct BroadcastNotifier {
    subscribers: Mutex<Vec<Sender<StatusUpdate>>>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<StatusUpdate> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl StatusNotifier for BroadcastNotifier {
    fn notify(&self, update: &StatusUpdate) {
        tracing::info!(
            document_id = update.document_id,
            status = %update.status,
            message = %update.message,
            "status update"
        );
        let Ok(mut subs) = self.subscribers.lock() else {
            tracing::warn!("notifier lock poisoned; update dropped");
            return;
        };
        subs.retain(|tx| tx.send(update.clone()).is_ok());
    }
}
