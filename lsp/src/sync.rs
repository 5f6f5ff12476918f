//! Document synchronization: per-document versions and debounced full-text changes.
//!
//! Each edit (re)schedules one task per document. When the document has been
//! quiet for the configured window the task bumps the version and sends the
//! whole text in a single `didChange`. Version bump and enqueue happen under
//! the same lock, so versions reach the server in increasing order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::{SendError, SyncError};
use crate::protocol::{
    self, CompletionContext, CompletionList, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams, Position,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    VersionedTextDocumentIdentifier,
};
use crate::rpc::RpcCore;

pub type CompletionCallback = Arc<dyn Fn(String, CompletionList) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub complete_after_change: bool,
}

struct DebounceTask {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    rpc: Arc<RpcCore>,
    options: SyncOptions,
    versions: Mutex<HashMap<String, i32>>,
    debounce: Mutex<HashMap<String, DebounceTask>>,
    generation: AtomicU64,
    on_completions: RwLock<Option<CompletionCallback>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct DocumentSync {
    inner: Arc<Inner>,
}

impl DocumentSync {
    #[must_use]
    pub fn new(rpc: Arc<RpcCore>, options: SyncOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                rpc,
                options,
                versions: Mutex::new(HashMap::new()),
                debounce: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                on_completions: RwLock::new(None),
            }),
        }
    }

    /// Receives completion results requested after a debounced change.
    pub fn set_completion_handler(&self, handler: CompletionCallback) {
        *self
            .inner
            .on_completions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Send `didOpen` with version 1.
    ///
    /// Opening a document that is already open sends its text as an
    /// immediate change instead, dropping any pending debounced change.
    pub fn open(&self, uri: &str, language_id: &str, text: &str) -> Result<(), SendError> {
        self.cancel(uri);
        let mut versions = lock(&self.inner.versions);
        if let Some(version) = versions.get_mut(uri) {
            *version += 1;
            tracing::debug!(uri, version = *version, "document reopened, sending full change");
            return self.inner.rpc.notify(
                protocol::DID_CHANGE,
                &change_params(uri, *version, text.to_string()),
            );
        }

        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.to_string(),
                language_id: language_id.to_string(),
                version: 1,
                text: text.to_string(),
            },
        };
        self.inner.rpc.notify(protocol::DID_OPEN, &params)?;
        versions.insert(uri.to_string(), 1);
        Ok(())
    }

    /// Schedule a debounced full-text change.
    pub fn notify_change(&self, uri: &str, text: String) -> Result<(), SyncError> {
        self.schedule(uri, text, None)
    }

    /// Like [`notify_change`](Self::notify_change), then request completion at
    /// `cursor` once the change is sent (when enabled).
    pub fn notify_change_at(&self, uri: &str, text: String, cursor: Position) -> Result<(), SyncError> {
        self.schedule(uri, text, Some(cursor))
    }

    /// Send `didSave` right away.
    pub fn save(&self, uri: &str) -> Result<(), SyncError> {
        self.ensure_open(uri)?;
        let params = DidSaveTextDocumentParams {
            text_document: TextDocumentIdentifier {
                uri: uri.to_string(),
            },
        };
        Ok(self.inner.rpc.notify(protocol::DID_SAVE, &params)?)
    }

    /// Drop pending changes and version state, then send `didClose`.
    pub fn close(&self, uri: &str) -> Result<(), SyncError> {
        self.cancel(uri);
        if lock(&self.inner.versions).remove(uri).is_none() {
            return Err(SyncError::NotOpen(uri.to_string()));
        }
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier {
                uri: uri.to_string(),
            },
        };
        Ok(self.inner.rpc.notify(protocol::DID_CLOSE, &params)?)
    }

    /// Last version sent for `uri`.
    #[must_use]
    pub fn version(&self, uri: &str) -> Option<i32> {
        lock(&self.inner.versions).get(uri).copied()
    }

    #[must_use]
    pub fn is_open(&self, uri: &str) -> bool {
        lock(&self.inner.versions).contains_key(uri)
    }

    #[must_use]
    pub fn has_pending_change(&self, uri: &str) -> bool {
        lock(&self.inner.debounce).contains_key(uri)
    }

    /// Abort every scheduled change.
    pub fn cancel_all(&self) {
        let tasks: Vec<DebounceTask> = lock(&self.inner.debounce).drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.handle.abort();
        }
    }

    /// Abort scheduled changes and forget every document.
    pub fn reset(&self) {
        self.cancel_all();
        lock(&self.inner.versions).clear();
    }

    fn ensure_open(&self, uri: &str) -> Result<(), SyncError> {
        if self.is_open(uri) {
            Ok(())
        } else {
            Err(SyncError::NotOpen(uri.to_string()))
        }
    }

    fn cancel(&self, uri: &str) {
        if let Some(task) = lock(&self.inner.debounce).remove(uri) {
            task.handle.abort();
        }
    }

    fn schedule(&self, uri: &str, text: String, cursor: Option<Position>) -> Result<(), SyncError> {
        self.ensure_open(uri)?;

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = Arc::clone(&self.inner);
        let key = uri.to_string();
        let window = self.inner.options.debounce;

        let mut tasks = lock(&self.inner.debounce);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            inner.fire(key, generation, text, cursor).await;
        });
        if let Some(previous) = tasks.insert(uri.to_string(), DebounceTask { generation, handle }) {
            previous.handle.abort();
        }
        Ok(())
    }
}

impl Inner {
    async fn fire(&self, uri: String, generation: u64, text: String, cursor: Option<Position>) {
        {
            let mut tasks = lock(&self.debounce);
            if tasks.get(&uri).is_some_and(|t| t.generation == generation) {
                tasks.remove(&uri);
            }
        }

        match self.send_change(&uri, text) {
            Ok(Some(version)) => tracing::trace!(uri = %uri, version, "sent didChange"),
            // Closed while the task was waiting.
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(uri = %uri, "failed to send didChange: {e}");
                return;
            }
        }

        if let Some(cursor) = cursor
            && self.options.complete_after_change
        {
            self.complete(uri, cursor).await;
        }
    }

    fn send_change(&self, uri: &str, text: String) -> Result<Option<i32>, SendError> {
        let mut versions = lock(&self.versions);
        let Some(version) = versions.get_mut(uri) else {
            return Ok(None);
        };
        *version += 1;
        self.rpc
            .notify(protocol::DID_CHANGE, &change_params(uri, *version, text))?;
        Ok(Some(*version))
    }

    async fn complete(&self, uri: String, cursor: Position) {
        let result = crate::client::request_completion(
            &self.rpc,
            &uri,
            cursor,
            Some(CompletionContext::invoked()),
            self.options.request_timeout,
        )
        .await;
        match result {
            Ok(list) => {
                let handler = self
                    .on_completions
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(handler) = handler {
                    handler(uri, list);
                }
            }
            Err(e) if e.is_cancellation() => {
                tracing::debug!(uri = %uri, "completion after change abandoned: {e}");
            }
            Err(e) => tracing::warn!(uri = %uri, "completion after change failed: {e}"),
        }
    }
}

fn change_params(uri: &str, version: i32, text: String) -> DidChangeTextDocumentParams {
    DidChangeTextDocumentParams {
        text_document: VersionedTextDocumentIdentifier {
            uri: uri.to_string(),
            version,
        },
        content_changes: vec![TextDocumentContentChangeEvent { text }],
    }
}
