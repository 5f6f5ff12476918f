//! Shared RPC core: correlation table, handler registry and the link to the writer.
//!
//! One `RpcCore` lives for the whole client; the outbound link is attached
//! when a connection comes up and detached when it goes away.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{RequestError, SendError};
use crate::handlers::HandlerRegistry;
use crate::message::{Message, RequestId, ResponseError};
use crate::outbound::Outbound;
use crate::pending::{PendingRequests, ReplySlot};

#[derive(Default)]
pub struct RpcCore {
    pending: PendingRequests,
    handlers: HandlerRegistry,
    outbound: RwLock<Option<Outbound>>,
}

impl RpcCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn attach(&self, outbound: Outbound) {
        *self.outbound.write().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
    }

    /// Detach the writer link; later sends fail with [`SendError::NotRunning`].
    pub fn detach(&self) -> Option<Outbound> {
        self.outbound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|out| !out.is_closed())
    }

    fn link(&self) -> Result<Outbound, SendError> {
        self.outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SendError::NotRunning)
    }

    /// Register a reply slot and enqueue the request.
    pub fn send_request(&self, method: &str, params: Option<Value>) -> Result<ReplySlot, SendError> {
        let link = self.link()?;
        self.pending.register_with(|id| {
            tracing::trace!(id, method, "LSP request");
            link.enqueue(Message::request(id, method, params))
        })
    }

    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), SendError> {
        self.link()?.enqueue(Message::notification(method, params))
    }

    pub fn send_response(
        &self,
        id: RequestId,
        outcome: Result<Value, ResponseError>,
    ) -> Result<(), SendError> {
        self.link()?.enqueue(Message::response(id, outcome))
    }

    /// Send a request with serializable params and wait for its raw result.
    pub async fn call<P: Serialize>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let params = serde_json::to_value(params).map_err(SendError::Serialize)?;
        let slot = self.send_request(method, Some(params))?;
        slot.wait(timeout).await
    }

    pub fn notify<P: Serialize>(&self, method: &str, params: &P) -> Result<(), SendError> {
        let params = serde_json::to_value(params)?;
        self.send_notification(method, Some(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sends_fail_when_detached() {
        let core = RpcCore::new();
        assert!(!core.is_connected());
        assert!(matches!(
            core.send_notification("x", None),
            Err(SendError::NotRunning)
        ));
        assert!(matches!(
            core.send_request("x", None),
            Err(SendError::NotRunning)
        ));
        assert!(core.pending().is_empty());
    }

    #[test]
    fn overflowing_request_does_not_leave_pending_entry() {
        let core = RpcCore::new();
        let (out, mut rx) = Outbound::channel(1);
        core.attach(out);

        let first = core.send_request("a", None).unwrap();
        assert!(matches!(
            core.send_request("b", Some(json!({}))),
            Err(SendError::QueueFull)
        ));
        assert_eq!(core.pending().len(), 1);
        assert!(core.pending().contains(first.id()));

        match rx.try_recv().unwrap() {
            Message::Request(req) => assert_eq!(req.method, "a"),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn detach_returns_link() {
        let core = RpcCore::new();
        let (out, _rx) = Outbound::channel(4);
        core.attach(out);
        assert!(core.is_connected());
        assert!(core.detach().is_some());
        assert!(!core.is_connected());
    }

    #[tokio::test]
    async fn call_resolves_with_result() {
        let core = std::sync::Arc::new(RpcCore::new());
        let (out, mut rx) = Outbound::channel(4);
        core.attach(out);

        let responder = {
            let core = std::sync::Arc::clone(&core);
            tokio::spawn(async move {
                let Some(Message::Request(req)) = rx.recv().await else {
                    panic!("expected request");
                };
                core.pending().resolve(&req.id, Ok(json!({"echo": req.params})));
            })
        };

        let result = core
            .call("test/echo", &json!({"n": 1}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": {"n": 1}}));
        responder.await.unwrap();
    }
}
