//! The typed LSP client the editor talks to.
//!
//! [`LspClient`] owns one connection at a time: either a spawned server
//! ([`start`](LspClient::start)) or any byte stream pair
//! ([`connect`](LspClient::connect)). Typed operations build protocol params,
//! wait for the reply under the configured timeout and decode the result.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatch::{Dispatcher, ReaderExit};
use crate::error::{LaunchError, RequestError, SendError, SyncError};
use crate::outbound::{Outbound, run_writer};
use crate::process::{self, ServerProcess};
use crate::protocol::{
    self, CodeAction, CodeActionContext, CodeActionParams, CodeActionsPushParams,
    CompletionContext, CompletionList, CompletionParams, Diagnostic, InitializeParams,
    InitializeResult, Position, PublishDiagnosticsParams, Range, ServerCapabilities,
    TextDocumentIdentifier, TextDocumentPositionParams,
};
use crate::rpc::RpcCore;
use crate::sync::{DocumentSync, SyncOptions};
use crate::types::LspConfig;

struct Session {
    shutdown_tx: watch::Sender<bool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<ReaderExit>,
    process: Option<ServerProcess>,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.reader.is_finished()
    }
}

struct Inner {
    config: LspConfig,
    rpc: Arc<RpcCore>,
    documents: DocumentSync,
    session: Mutex<Option<Session>>,
    capabilities: RwLock<Option<ServerCapabilities>>,
}

/// Handle to the LSP engine. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct LspClient {
    inner: Arc<Inner>,
}

impl LspClient {
    #[must_use]
    pub fn new(config: LspConfig) -> Self {
        let rpc = Arc::new(RpcCore::new());
        let documents = DocumentSync::new(
            Arc::clone(&rpc),
            SyncOptions {
                debounce: config.debounce(),
                request_timeout: config.request_timeout(),
                complete_after_change: config.complete_after_change,
            },
        );
        Self {
            inner: Arc::new(Inner {
                config,
                rpc,
                documents,
                session: Mutex::new(None),
                capabilities: RwLock::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LspConfig {
        &self.inner.config
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Spawn the configured server, with `root` as its working directory.
    pub async fn start(&self, root: Option<&Path>) -> Result<(), LaunchError> {
        let server = self
            .inner
            .config
            .server
            .as_ref()
            .ok_or(LaunchError::NotConfigured)?;
        self.reap_dead_session().await?;

        let mut slot = self.session();
        if slot.as_ref().is_some_and(Session::is_live) {
            return Err(LaunchError::AlreadyRunning);
        }
        let spawned = process::spawn(&server.command, &server.args, root)?;
        *slot = Some(self.open_session(spawned.stdout, spawned.stdin, Some(spawned.process)));
        Ok(())
    }

    /// Attach to an already-running server over an arbitrary byte stream pair.
    pub async fn connect<R, W>(&self, reader: R, writer: W) -> Result<(), LaunchError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.reap_dead_session().await?;

        let mut slot = self.session();
        if slot.as_ref().is_some_and(Session::is_live) {
            return Err(LaunchError::AlreadyRunning);
        }
        *slot = Some(self.open_session(reader, writer, None));
        Ok(())
    }

    /// Tear down a session whose connection was lost, so a new one can start.
    async fn reap_dead_session(&self) -> Result<(), LaunchError> {
        let dead = {
            let mut slot = self.session();
            match slot.as_ref() {
                Some(session) if session.is_live() => return Err(LaunchError::AlreadyRunning),
                Some(_) => slot.take(),
                None => None,
            }
        };
        if let Some(session) = dead {
            tracing::debug!("cleaning up lost LSP session");
            self.teardown(session).await;
        }
        Ok(())
    }

    fn open_session<R, W>(&self, reader: R, writer: W, process: Option<ServerProcess>) -> Session
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound, queue) = Outbound::channel(self.inner.config.queue_capacity);
        self.inner.rpc.attach(outbound);

        let writer = tokio::spawn(run_writer(queue, writer, shutdown_rx.clone()));
        let dispatcher = Dispatcher::new(Arc::clone(&self.inner.rpc));
        let reader = tokio::spawn(dispatcher.run(reader, shutdown_rx));

        Session {
            shutdown_tx,
            writer,
            reader,
            process,
        }
    }

    /// Whether a connection is up and accepting messages.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.rpc.is_connected()
    }

    /// Stop the connection without the LSP exit handshake.
    ///
    /// Pending debounced changes are dropped, documents are forgotten and
    /// every waiting request observes [`RequestError::Cancelled`].
    pub async fn stop(&self) {
        let session = self.session().take();
        if let Some(session) = session {
            self.teardown(session).await;
        }
    }

    async fn teardown(&self, session: Session) {
        let Session {
            shutdown_tx,
            mut writer,
            mut reader,
            process,
        } = session;
        let grace = self.inner.config.shutdown_grace();

        self.inner.rpc.detach();
        let _ = shutdown_tx.send(true);
        self.inner.documents.reset();
        let released = self.inner.rpc.pending().release_all();
        if released > 0 {
            tracing::debug!(released, "released pending LSP requests on stop");
        }
        *self
            .inner
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;

        if tokio::time::timeout(grace, &mut writer).await.is_err() {
            tracing::warn!("LSP writer did not finish in {grace:?}, aborting");
            writer.abort();
        }
        if let Some(process) = process {
            process.stop(grace).await;
        }
        match tokio::time::timeout(grace, &mut reader).await {
            Ok(Ok(exit)) => tracing::debug!(?exit, "LSP reader finished"),
            Ok(Err(e)) => tracing::debug!("LSP reader task ended abnormally: {e}"),
            Err(_) => reader.abort(),
        }
    }

    /// Polite shutdown: `shutdown` request, `exit` notification, then [`stop`](Self::stop).
    pub async fn shutdown(&self) {
        if self.is_running() {
            let grace = self.inner.config.shutdown_grace();
            match self.inner.rpc.send_request(protocol::SHUTDOWN, None) {
                Ok(slot) => {
                    if let Err(e) = slot.wait(grace).await {
                        tracing::warn!("LSP shutdown request failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("could not send LSP shutdown request: {e}"),
            }
            if let Err(e) = self.inner.rpc.send_notification(protocol::EXIT, None) {
                tracing::debug!("could not send LSP exit notification: {e}");
            }
        }
        self.stop().await;
    }

    /// Capabilities from the last successful `initialize`.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Raw messaging ──────────────────────────────────────────────────

    /// Send an arbitrary request and wait for its raw result.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, RequestError> {
        let slot = self.inner.rpc.send_request(method, params)?;
        slot.wait(self.inner.config.request_timeout()).await
    }

    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), SendError> {
        self.inner.rpc.send_notification(method, params)
    }

    /// Route a server notification to `handler`, replacing any previous handler.
    pub fn register_handler<F>(&self, method: &str, handler: F)
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.inner.rpc.handlers().register(method, handler);
    }

    // ── Typed requests ─────────────────────────────────────────────────

    pub async fn initialize(&self, root_uri: &str) -> Result<InitializeResult, RequestError> {
        let result = self
            .inner
            .rpc
            .call(
                protocol::INITIALIZE,
                &InitializeParams::new(root_uri),
                self.inner.config.request_timeout(),
            )
            .await?;
        let init: InitializeResult = decode(protocol::INITIALIZE, serde_json::from_value(result))?;
        if let Some(info) = &init.server_info {
            tracing::info!(
                server = %info.name,
                version = info.version.as_deref().unwrap_or("?"),
                "LSP server initialized"
            );
        }
        *self
            .inner
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(init.capabilities.clone());
        Ok(init)
    }

    pub fn initialized(&self) -> Result<(), SendError> {
        self.inner
            .rpc
            .notify(protocol::INITIALIZED, &serde_json::json!({}))
    }

    /// Hover text at `position`; empty when the server has nothing to say.
    pub async fn hover(&self, uri: &str, position: Position) -> Result<String, RequestError> {
        let params = TextDocumentPositionParams {
            text_document: TextDocumentIdentifier {
                uri: uri.to_string(),
            },
            position,
        };
        let result = self
            .inner
            .rpc
            .call(protocol::HOVER, &params, self.inner.config.request_timeout())
            .await?;
        decode(protocol::HOVER, protocol::decode_hover(result))
    }

    pub async fn completion(
        &self,
        uri: &str,
        position: Position,
        context: Option<CompletionContext>,
    ) -> Result<CompletionList, RequestError> {
        request_completion(
            &self.inner.rpc,
            uri,
            position,
            context,
            self.inner.config.request_timeout(),
        )
        .await
    }

    /// Code actions for `range`, with the diagnostics that apply to it as context.
    pub async fn code_action(
        &self,
        uri: &str,
        range: Range,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<Vec<CodeAction>, RequestError> {
        let params = CodeActionParams {
            text_document: TextDocumentIdentifier {
                uri: uri.to_string(),
            },
            range,
            context: CodeActionContext { diagnostics },
        };
        let result = self
            .inner
            .rpc
            .call(protocol::CODE_ACTION, &params, self.inner.config.request_timeout())
            .await?;
        decode(protocol::CODE_ACTION, protocol::decode_code_actions(result))
    }

    // ── Server pushes ──────────────────────────────────────────────────

    /// Called with `(uri, diagnostics)` for every `publishDiagnostics`.
    pub fn on_diagnostics<F>(&self, callback: F)
    where
        F: Fn(String, Vec<Diagnostic>) + Send + Sync + 'static,
    {
        self.register_handler(protocol::PUBLISH_DIAGNOSTICS, move |params| {
            match params.map(serde_json::from_value::<PublishDiagnosticsParams>) {
                Some(Ok(p)) => callback(p.uri, p.diagnostics),
                Some(Err(e)) => tracing::debug!("malformed publishDiagnostics: {e}"),
                None => tracing::debug!("publishDiagnostics without params"),
            }
        });
    }

    /// Called with `(uri, actions)` when the server pushes code actions.
    pub fn on_code_actions<F>(&self, callback: F)
    where
        F: Fn(String, Vec<CodeAction>) + Send + Sync + 'static,
    {
        self.register_handler(protocol::CODE_ACTION, move |params| {
            match params.map(serde_json::from_value::<CodeActionsPushParams>) {
                Some(Ok(p)) => callback(p.uri, p.actions),
                Some(Err(e)) => tracing::debug!("malformed pushed code actions: {e}"),
                None => tracing::debug!("pushed code actions without params"),
            }
        });
    }

    /// Called with completion results requested by [`notify_change_at`](Self::notify_change_at).
    pub fn on_completions<F>(&self, callback: F)
    where
        F: Fn(String, CompletionList) + Send + Sync + 'static,
    {
        self.inner.documents.set_completion_handler(Arc::new(callback));
    }

    // ── Documents ──────────────────────────────────────────────────────

    pub fn open(&self, uri: &str, language_id: &str, text: &str) -> Result<(), SendError> {
        self.inner.documents.open(uri, language_id, text)
    }

    pub fn notify_change(&self, uri: &str, text: String) -> Result<(), SyncError> {
        self.inner.documents.notify_change(uri, text)
    }

    pub fn notify_change_at(&self, uri: &str, text: String, cursor: Position) -> Result<(), SyncError> {
        self.inner.documents.notify_change_at(uri, text, cursor)
    }

    pub fn save(&self, uri: &str) -> Result<(), SyncError> {
        self.inner.documents.save(uri)
    }

    pub fn close(&self, uri: &str) -> Result<(), SyncError> {
        self.inner.documents.close(uri)
    }

    #[must_use]
    pub fn document_version(&self, uri: &str) -> Option<i32> {
        self.inner.documents.version(uri)
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.rpc.pending().len()
    }
}

fn decode<T>(method: &'static str, result: Result<T, serde_json::Error>) -> Result<T, RequestError> {
    result.map_err(|source| RequestError::Decode { method, source })
}

pub(crate) async fn request_completion(
    rpc: &RpcCore,
    uri: &str,
    position: Position,
    context: Option<CompletionContext>,
    timeout: Duration,
) -> Result<CompletionList, RequestError> {
    let params = CompletionParams {
        text_document: TextDocumentIdentifier {
            uri: uri.to_string(),
        },
        position,
        context,
    };
    let result = rpc.call(protocol::COMPLETION, &params, timeout).await?;
    decode(protocol::COMPLETION, protocol::decode_completion(result))
}
