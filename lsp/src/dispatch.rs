//! Inbound reader and dispatcher.
//!
//! Reads frames from the server one at a time and routes them: responses to
//! the correlation table, notifications to the handler registry, and
//! server-initiated requests to a built-in responder.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::watch;

use crate::codec::FrameReader;
use crate::message::{Message, Notification, Request, Response, ResponseError};
use crate::outbound::stopped;
use crate::protocol::ConfigurationParams;
use crate::rpc::RpcCore;

/// Why the read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// Stop was requested.
    Shutdown,
    /// The server closed its stdout.
    Eof,
    /// The stream is unusable.
    Failed(String),
}

pub struct Dispatcher {
    core: Arc<RpcCore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(core: Arc<RpcCore>) -> Self {
        Self { core }
    }

    /// Route one decoded message.
    pub fn dispatch(&self, msg: Message) {
        match msg {
            Message::Response(Response { id, outcome }) => {
                if !self.core.pending().resolve(&id, outcome) {
                    tracing::debug!(%id, "discarding LSP response with no pending request");
                }
            }
            Message::Notification(Notification { method, params }) => {
                if !self.core.handlers().dispatch(&method, params) {
                    tracing::trace!(method = %method, "ignoring LSP notification");
                }
            }
            Message::Request(req) => self.answer_server_request(req),
        }
    }

    /// Servers block on some of their own requests; answer each one.
    fn answer_server_request(&self, req: Request) {
        let Request { id, method, params } = req;
        let outcome = match method.as_str() {
            "workspace/configuration" => {
                let items = params
                    .and_then(|p| serde_json::from_value::<ConfigurationParams>(p).ok())
                    .map_or(0, |p| p.items.len());
                Ok(Value::Array(vec![Value::Null; items]))
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => Ok(Value::Null),
            _ => {
                tracing::debug!(
                    method = %method,
                    "LSP server request not supported, replying method not found"
                );
                Err(ResponseError::method_not_found(&method))
            }
        };
        if let Err(e) = self.core.send_response(id, outcome) {
            tracing::warn!(method = %method, "failed to answer LSP server request: {e}");
        }
    }

    /// Read and dispatch until shutdown, EOF, or a fatal stream error.
    ///
    /// On any exit other than shutdown the connection is considered lost:
    /// the writer link is detached and every waiting request is released.
    pub async fn run<R>(self, reader: R, mut shutdown: watch::Receiver<bool>) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = FrameReader::new(reader);
        let exit = loop {
            let frame = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => break ReaderExit::Shutdown,
                frame = reader.read_message() => frame,
            };
            match frame {
                Ok(Some(msg)) => self.dispatch(msg),
                Ok(None) => {
                    tracing::info!("LSP server closed stdout");
                    break ReaderExit::Eof;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("skipping undecodable LSP frame: {e}");
                }
                Err(e) => {
                    tracing::warn!("LSP reader error: {e}");
                    break ReaderExit::Failed(e.to_string());
                }
            }
        };

        if exit != ReaderExit::Shutdown {
            self.core.detach();
            let released = self.core.pending().release_all();
            if released > 0 {
                tracing::warn!(released, "LSP connection lost, cancelled pending requests");
            }
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameWriter;
    use crate::error::RequestError;
    use crate::message::{METHOD_NOT_FOUND, RequestId};
    use crate::outbound::Outbound;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn core_with_queue() -> (Arc<RpcCore>, mpsc::Receiver<Message>) {
        let core = Arc::new(RpcCore::new());
        let (out, rx) = Outbound::channel(16);
        core.attach(out);
        (core, rx)
    }

    #[tokio::test]
    async fn unknown_response_id_is_discarded() {
        let (core, _rx) = core_with_queue();
        let slot = core.send_request("a", None).unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&core));

        dispatcher.dispatch(Message::response(RequestId::Number(999), Ok(json!("stray"))));
        assert_eq!(core.pending().len(), 1);

        dispatcher.dispatch(Message::response(RequestId::Number(slot.id()), Ok(json!("mine"))));
        assert_eq!(slot.wait(Duration::from_secs(1)).await.unwrap(), json!("mine"));
    }

    #[test]
    fn notifications_route_to_handlers() {
        let (core, _rx) = core_with_queue();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        core.handlers().register("textDocument/publishDiagnostics", move |params| {
            assert!(params.is_some());
            h.fetch_add(1, Ordering::SeqCst);
        });
        let dispatcher = Dispatcher::new(core);

        dispatcher.dispatch(Message::notification("foo/bar", Some(json!({}))));
        dispatcher.dispatch(Message::notification(
            "textDocument/publishDiagnostics",
            Some(json!({"uri": "file:///a", "diagnostics": []})),
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn server_requests_are_answered() {
        let (core, mut rx) = core_with_queue();
        let dispatcher = Dispatcher::new(core);

        dispatcher.dispatch(Message::Request(Request {
            id: RequestId::Number(1),
            method: "workspace/configuration".into(),
            params: Some(json!({"items": [{"section": "a"}, {"section": "b"}]})),
        }));
        dispatcher.dispatch(Message::Request(Request {
            id: RequestId::String("reg".into()),
            method: "client/registerCapability".into(),
            params: Some(json!({"registrations": []})),
        }));
        dispatcher.dispatch(Message::Request(Request {
            id: RequestId::Number(3),
            method: "workspace/applyEdit".into(),
            params: None,
        }));

        let Message::Response(config) = rx.try_recv().unwrap() else {
            panic!("expected response");
        };
        assert_eq!(config.outcome.unwrap(), json!([null, null]));

        let Message::Response(reg) = rx.try_recv().unwrap() else {
            panic!("expected response");
        };
        assert_eq!(reg.id, RequestId::String("reg".into()));
        assert_eq!(reg.outcome.unwrap(), Value::Null);

        let Message::Response(other) = rx.try_recv().unwrap() else {
            panic!("expected response");
        };
        assert_eq!(other.outcome.unwrap_err().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn loop_survives_garbage_and_unknown_notifications() {
        let (core, _rx) = core_with_queue();
        let slot = core.send_request("a", None).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (mut server, client) = tokio::io::duplex(64 * 1024);
        let reader = tokio::spawn(Dispatcher::new(Arc::clone(&core)).run(client, stop_rx));

        let garbage = b"{definitely not json";
        let mut raw = format!("Content-Length: {}\r\n\r\n", garbage.len()).into_bytes();
        raw.extend_from_slice(garbage);
        tokio::io::AsyncWriteExt::write_all(&mut server, &raw).await.unwrap();

        let mut writer = FrameWriter::new(server);
        writer
            .write_message(&Message::notification("foo/bar", Some(json!({"x": 1}))))
            .await
            .unwrap();
        writer
            .write_message(&Message::response(RequestId::Number(slot.id()), Ok(json!(7))))
            .await
            .unwrap();

        assert_eq!(slot.wait(Duration::from_secs(5)).await.unwrap(), json!(7));
        drop(writer);
        assert_eq!(reader.await.unwrap(), ReaderExit::Eof);
    }

    #[tokio::test]
    async fn connection_loss_releases_pending_and_detaches() {
        let (core, _rx) = core_with_queue();
        let slot = core.send_request("a", None).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (server, client) = tokio::io::duplex(1024);
        let reader = tokio::spawn(Dispatcher::new(Arc::clone(&core)).run(client, stop_rx));

        drop(server);
        assert_eq!(reader.await.unwrap(), ReaderExit::Eof);
        let err = slot.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RequestError::Cancelled));
        assert!(!core.is_connected());
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stall_the_reader() {
        let (core, _rx) = core_with_queue();
        core.handlers().register("boom", |_| panic!("callback bug"));
        let slot = core.send_request("a", None).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (server, client) = tokio::io::duplex(64 * 1024);
        let reader = tokio::spawn(Dispatcher::new(Arc::clone(&core)).run(client, stop_rx));

        let mut writer = FrameWriter::new(server);
        writer
            .write_message(&Message::notification("boom", None))
            .await
            .unwrap();
        writer
            .write_message(&Message::response(RequestId::Number(slot.id()), Ok(json!("ok"))))
            .await
            .unwrap();

        assert_eq!(slot.wait(Duration::from_secs(5)).await.unwrap(), json!("ok"));
        assert!(core.is_connected());
        drop(writer);
        assert_eq!(reader.await.unwrap(), ReaderExit::Eof);
        assert!(!core.is_connected());
    }

    #[tokio::test]
    async fn framing_error_ends_loop() {
        let (core, _rx) = core_with_queue();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (mut server, client) = tokio::io::duplex(1024);
        let reader = tokio::spawn(Dispatcher::new(core).run(client, stop_rx));

        tokio::io::AsyncWriteExt::write_all(&mut server, b"Content-Length: nope\r\n\r\n")
            .await
            .unwrap();
        assert!(matches!(reader.await.unwrap(), ReaderExit::Failed(_)));
    }

    #[tokio::test]
    async fn shutdown_keeps_pending_for_the_owner() {
        let (core, _rx) = core_with_queue();
        let _slot = core.send_request("a", None).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (_server, client) = tokio::io::duplex(1024);
        let reader = tokio::spawn(Dispatcher::new(Arc::clone(&core)).run(client, stop_rx));

        stop_tx.send(true).unwrap();
        assert_eq!(reader.await.unwrap(), ReaderExit::Shutdown);
        assert_eq!(core.pending().len(), 1);
        assert!(core.is_connected());
    }
}
