//! Correlation table for requests forwarded to the peer.
//!
//! Each entry owns a reply sink and exactly one deadline timer. Both
//! [`PendingTable::resolve`] and [`PendingTable::expire`] remove the entry
//! before touching the sink, so whichever runs first settles the request and
//! the other becomes a no-op.

use browsermux_core::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

/// The single outcome delivered for a pending id.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Reply(Message),
    Expired(Message),
}

impl Settlement {
    pub fn message(&self) -> &Message {
        match self {
            Settlement::Reply(m) | Settlement::Expired(m) => m,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Settlement::Expired(_))
    }
}

struct PendingEntry {
    sink: oneshot::Sender<Settlement>,
    timer: AbortHandle,
}

#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `sink` under `id` and arm its deadline timer.
    /// Returns false (and drops the sink) if `id` is already pending.
    pub fn insert(
        self: &Arc<Self>,
        id: &str,
        sink: oneshot::Sender<Settlement>,
        deadline: Duration,
    ) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(id) {
            return false;
        }
        let table = Arc::downgrade(self);
        let timer_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(table) = table.upgrade() {
                if table.expire(&timer_id) {
                    debug!(id = %timer_id, "Pending request expired");
                }
            }
        });
        entries.insert(
            id.to_string(),
            PendingEntry {
                sink,
                timer: timer.abort_handle(),
            },
        );
        true
    }

    /// Convenience wrapper around [`insert`](Self::insert) that creates the sink.
    pub fn register(self: &Arc<Self>, id: &str, deadline: Duration) -> Option<PendingReply> {
        let (tx, rx) = oneshot::channel();
        if self.insert(id, tx, deadline) {
            Some(PendingReply {
                id: id.to_string(),
                rx,
            })
        } else {
            None
        }
    }

    /// Deliver `message` to the waiter for `id`. Returns false if no entry
    /// exists (already expired, or never sent).
    pub fn resolve(&self, id: &str, message: Message) -> bool {
        let entry = self.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.sink.send(Settlement::Reply(message));
                true
            }
            None => false,
        }
    }

    /// Deadline path: remove `id` and hand the waiter a timeout reply.
    /// Returns false if the entry was already resolved.
    pub fn expire(&self, id: &str) -> bool {
        let entry = self.lock().remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.sink.send(Settlement::Expired(Message::timeout(id)));
                true
            }
            None => false,
        }
    }

    /// Drop an entry without replying, used when the request never reached
    /// the peer.
    pub fn cancel(&self, id: &str) -> bool {
        let entry = self.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Receiving half handed to the HTTP handler.
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the single settlement. A dropped table counts as a timeout.
    pub async fn wait(self) -> Settlement {
        match self.rx.await {
            Ok(settlement) => settlement,
            Err(_) => Settlement::Expired(Message::timeout(self.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_delivers_reply() {
        let table = Arc::new(PendingTable::new());
        let reply = table.register("1", Duration::from_secs(10)).unwrap();
        assert!(table.resolve("1", Message::success("1", json!("ok"))));
        let settlement = reply.wait().await;
        assert_eq!(settlement, Settlement::Reply(Message::success("1", json!("ok"))));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let table = Arc::new(PendingTable::new());
        let _first = table.register("dup", Duration::from_secs(10)).unwrap();
        assert!(table.register("dup", Duration::from_secs(10)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_not_resolved() {
        let table = Arc::new(PendingTable::new());
        assert!(!table.resolve("ghost", Message::success("ghost", json!(1))));
        assert!(!table.expire("ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_entry() {
        let table = Arc::new(PendingTable::new());
        let reply = table.register("slow", Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!table.contains("slow"));
        let settlement = reply.wait().await;
        assert!(settlement.is_expired());
        assert_eq!(settlement.message().error.as_deref(), Some("Timeout"));
        assert!(!table.resolve("slow", Message::success("slow", json!(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_then_expire_yields_single_reply() {
        let table = Arc::new(PendingTable::new());
        let reply = table.register("race", Duration::from_secs(5)).unwrap();
        assert!(table.resolve("race", Message::success("race", json!(1))));
        assert!(!table.expire("race"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        let settlement = reply.wait().await;
        assert!(!settlement.is_expired());
    }

    #[tokio::test]
    async fn test_expire_then_resolve_yields_single_reply() {
        let table = Arc::new(PendingTable::new());
        let reply = table.register("race", Duration::from_secs(60)).unwrap();
        assert!(table.expire("race"));
        assert!(!table.resolve("race", Message::success("race", json!(1))));
        assert!(reply.wait().await.is_expired());
    }

    #[tokio::test]
    async fn test_cancel_removes_without_reply() {
        let table = Arc::new(PendingTable::new());
        let reply = table.register("c", Duration::from_secs(60)).unwrap();
        assert!(table.cancel("c"));
        assert!(table.is_empty());
        // Sink dropped: waiter sees a timeout rather than hanging.
        assert!(reply.wait().await.is_expired());
    }
}
