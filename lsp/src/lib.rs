//! LSP client engine: spawns a language server, speaks JSON-RPC to it over
//! stdio and keeps its view of open documents in sync with the editor.

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod message;
pub mod outbound;
pub mod pending;
pub mod process;
pub mod protocol;
pub mod rpc;
pub mod sync;
pub mod types;

mod client;
mod diagnostics;

pub use client::LspClient;
pub use diagnostics::DiagnosticsStore;
pub use error::{LaunchError, RequestError, SendError, SyncError};
pub use protocol::{
    CodeAction, CompletionContext, CompletionItem, CompletionList, Diagnostic, InitializeResult,
    Position, Range, ServerCapabilities,
};
pub use types::{DiagnosticSeverity, DiagnosticsSnapshot, LspConfig, ServerConfig};
