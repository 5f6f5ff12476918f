//! Request correlation table.
//!
//! Maps outstanding request ids to single-use reply slots. Ids are allocated
//! here, under the same lock that registers the slot, so an id is never in
//! flight before its slot exists.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{RequestError, SendError};
use crate::message::{RequestId, ResponseError};

type Outcome = Result<Value, ResponseError>;

struct Table {
    next_id: u64,
    slots: HashMap<u64, oneshot::Sender<Outcome>>,
}

pub struct PendingRequests {
    inner: Mutex<Table>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Table {
                next_id: 1,
                slots: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id, register its slot and run `send` with the id, all
    /// under one lock. If `send` fails the slot is removed again.
    ///
    /// `send` must not block.
    pub fn register_with<F>(&self, send: F) -> Result<ReplySlot, SendError>
    where
        F: FnOnce(u64) -> Result<(), SendError>,
    {
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id += 1;

        let (tx, rx) = oneshot::channel();
        table.slots.insert(id, tx);
        if let Err(e) = send(id) {
            table.slots.remove(&id);
            return Err(e);
        }
        Ok(ReplySlot { id, rx })
    }

    /// Deliver a response. Returns `false` when no request is waiting for `id`.
    pub fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        let Some(id) = id.as_u64() else {
            return false;
        };
        let slot = self.lock().slots.remove(&id);
        match slot {
            // The caller may have stopped waiting; that still counts as delivered.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop every reply slot; waiting callers observe [`RequestError::Cancelled`].
    pub fn release_all(&self) -> usize {
        let drained: Vec<_> = self.lock().slots.drain().collect();
        drained.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.lock().slots.contains_key(&id)
    }
}

/// The receiving end of one request.
#[derive(Debug)]
pub struct ReplySlot {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl ReplySlot {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply, at most `timeout`.
    ///
    /// On timeout the table entry stays; a late reply is absorbed by the
    /// dispatcher.
    pub async fn wait(self, timeout: Duration) -> Result<Value, RequestError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(RequestError::Rpc(err)),
            Ok(Err(_)) => Err(RequestError::Cancelled),
            Err(_) => Err(RequestError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn register(table: &PendingRequests) -> ReplySlot {
        table.register_with(|_| Ok(())).unwrap()
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let table = PendingRequests::new();
        let ids: Vec<u64> = (0..5).map(|_| register(&table).id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn failed_send_removes_slot_but_consumes_id() {
        let table = PendingRequests::new();
        let err = table
            .register_with(|_| Err(SendError::QueueFull))
            .unwrap_err();
        assert!(matches!(err, SendError::QueueFull));
        assert!(table.is_empty());
        assert_eq!(register(&table).id(), 2);
    }

    #[tokio::test]
    async fn resolve_delivers_exactly_once() {
        let table = PendingRequests::new();
        let slot = register(&table);
        let id = RequestId::Number(slot.id());

        assert!(table.resolve(&id, Ok(json!(42))));
        assert!(!table.resolve(&id, Ok(json!(43))), "duplicate reply must be discarded");
        assert_eq!(slot.wait(Duration::from_secs(1)).await.unwrap(), json!(42));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_leaves_others_untouched() {
        let table = PendingRequests::new();
        let slot = register(&table);

        assert!(!table.resolve(&RequestId::Number(999), Ok(Value::Null)));
        assert!(!table.resolve(&RequestId::String("x".into()), Ok(Value::Null)));
        assert_eq!(table.len(), 1);

        table.resolve(&RequestId::Number(slot.id()), Ok(json!("ok")));
        assert_eq!(slot.wait(Duration::from_secs(1)).await.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn error_outcome_is_rpc_error() {
        let table = PendingRequests::new();
        let slot = register(&table);
        table.resolve(
            &RequestId::Number(slot.id()),
            Err(ResponseError::method_not_found("foo")),
        );
        let err = slot.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RequestError::Rpc(ref e) if e.code == -32601));
        assert!(!err.is_cancellation());
    }

    #[tokio::test]
    async fn release_all_cancels_waiters() {
        let table = PendingRequests::new();
        let a = register(&table);
        let b = register(&table);
        assert_eq!(table.release_all(), 2);
        assert!(table.is_empty());

        for slot in [a, b] {
            let err = slot.wait(Duration::from_secs(1)).await.unwrap_err();
            assert!(matches!(err, RequestError::Cancelled));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_entry_for_late_reply() {
        let table = PendingRequests::new();
        let slot = register(&table);
        let id = slot.id();

        let err = slot.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, RequestError::Timeout(_)));
        assert!(table.contains(id));

        // Late reply finds the entry and is absorbed without a waiter.
        assert!(table.resolve(&RequestId::Number(id), Ok(Value::Null)));
        assert!(table.is_empty());
    }
}
