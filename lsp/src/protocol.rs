//! Typed LSP parameter and result structures.
//!
//! Only the slice of the protocol the editor uses is modelled. Decoding is
//! strict everywhere except the two fields servers genuinely disagree on:
//! hover `contents` and the completion result shape.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::DiagnosticSeverity;

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "initialized";
pub const SHUTDOWN: &str = "shutdown";
pub const EXIT: &str = "exit";
pub const DID_OPEN: &str = "textDocument/didOpen";
pub const DID_CHANGE: &str = "textDocument/didChange";
pub const DID_SAVE: &str = "textDocument/didSave";
pub const DID_CLOSE: &str = "textDocument/didClose";
pub const HOVER: &str = "textDocument/hover";
pub const COMPLETION: &str = "textDocument/completion";
pub const CODE_ACTION: &str = "textDocument/codeAction";
pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", .path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

// ── Basic structures ───────────────────────────────────────────────────

/// Zero-based line/character position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Empty range at a single position.
    #[must_use]
    pub const fn at(pos: Position) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    #[must_use]
    pub fn contains_line(&self, line: u32) -> bool {
        self.start.line <= line && line <= self.end.line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedTextDocumentIdentifier {
    pub uri: String,
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

// ── Document synchronization ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenTextDocumentParams {
    pub text_document: TextDocumentItem,
}

/// Full-document change event: no `range`, the text replaces everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentContentChangeEvent {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeTextDocumentParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<TextDocumentContentChangeEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidSaveTextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidCloseTextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

// ── Initialize ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceFolder {
    pub uri: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub process_id: u32,
    pub client_info: ClientInfo,
    pub root_uri: String,
    pub capabilities: Value,
    pub workspace_folders: Vec<WorkspaceFolder>,
}

impl InitializeParams {
    #[must_use]
    pub fn new(root_uri: &str) -> Self {
        Self {
            process_id: std::process::id(),
            client_info: ClientInfo {
                name: "bitcode".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            root_uri: root_uri.to_string(),
            capabilities: client_capabilities(),
            workspace_folders: vec![WorkspaceFolder {
                uri: root_uri.to_string(),
                name: "workspace".to_string(),
            }],
        }
    }
}

fn client_capabilities() -> Value {
    serde_json::json!({
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": false,
                "willSave": false,
                "willSaveWaitUntil": false,
                "didSave": true
            },
            "completion": {
                "completionItem": { "snippetSupport": true },
                "contextSupport": true
            },
            "hover": {
                "contentFormat": ["markdown", "plaintext"]
            },
            "definition": {},
            "codeAction": {},
            "publishDiagnostics": {
                "relatedInformation": false
            }
        },
        "workspace": {
            "applyEdit": true,
            "configuration": true
        }
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    #[serde(default)]
    pub resolve_provider: Option<bool>,
    #[serde(default)]
    pub trigger_characters: Vec<String>,
}

/// The subset of server capabilities the editor consults.
///
/// Providers are booleans or option objects in the protocol; both are kept
/// as raw values and read through the `supports_*` helpers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default)]
    pub text_document_sync: Option<Value>,
    #[serde(default)]
    pub hover_provider: Option<Value>,
    #[serde(default)]
    pub completion_provider: Option<CompletionOptions>,
    #[serde(default)]
    pub definition_provider: Option<Value>,
    #[serde(default)]
    pub code_action_provider: Option<Value>,
}

fn provider_enabled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

impl ServerCapabilities {
    #[must_use]
    pub fn supports_hover(&self) -> bool {
        provider_enabled(self.hover_provider.as_ref())
    }

    #[must_use]
    pub fn supports_completion(&self) -> bool {
        self.completion_provider.is_some()
    }

    #[must_use]
    pub fn supports_code_action(&self) -> bool {
        provider_enabled(self.code_action_provider.as_ref())
    }

    /// Characters that should trigger completion while typing.
    #[must_use]
    pub fn completion_triggers(&self) -> &[String] {
        self.completion_provider
            .as_ref()
            .map_or(&[], |c| c.trigger_characters.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

// ── Diagnostics ────────────────────────────────────────────────────────

/// A diagnostic as it travels on the wire.
///
/// Kept faithful to what the server sent so it can be echoed back in a
/// code action context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

impl Diagnostic {
    /// Severity with the LSP fallback: a missing or unknown value counts as a warning.
    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
            .and_then(DiagnosticSeverity::from_lsp)
            .unwrap_or(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn source_or_unknown(&self) -> &str {
        self.source.as_deref().unwrap_or("unknown")
    }

    /// Format as `uri:line:col: severity: [source] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_uri(&self, uri: &str) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            uri,
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity().label(),
            self.source_or_unknown(),
            self.message,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub version: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Hover ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

#[derive(Debug, Deserialize)]
struct HoverResult {
    #[serde(default)]
    contents: Option<HoverContents>,
}

/// `{kind, value}` markup content or a `{language, value}` marked string.
#[derive(Debug, Deserialize)]
struct MarkupValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HoverPart {
    Plain(String),
    Markup(MarkupValue),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HoverContents {
    Plain(String),
    Markup(MarkupValue),
    Parts(Vec<HoverPart>),
}

/// Flatten a hover result to display text.
///
/// `null` results and absent contents yield an empty string.
pub fn decode_hover(result: Value) -> Result<String, serde_json::Error> {
    if result.is_null() {
        return Ok(String::new());
    }
    let hover: HoverResult = serde_json::from_value(result)?;
    let text = match hover.contents {
        None => String::new(),
        Some(HoverContents::Plain(s)) => s,
        Some(HoverContents::Markup(m)) => m.value,
        Some(HoverContents::Parts(parts)) => parts
            .into_iter()
            .filter_map(|part| match part {
                HoverPart::Plain(s) => Some(s),
                // Empty markup blocks are dropped; plain strings are kept as-is.
                HoverPart::Markup(m) => (!m.value.is_empty()).then_some(m.value),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(text)
}

// ── Completion ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum CompletionTriggerKind {
    Invoked,
    TriggerCharacter,
    TriggerForIncompleteCompletions,
}

impl From<CompletionTriggerKind> for u8 {
    fn from(kind: CompletionTriggerKind) -> Self {
        match kind {
            CompletionTriggerKind::Invoked => 1,
            CompletionTriggerKind::TriggerCharacter => 2,
            CompletionTriggerKind::TriggerForIncompleteCompletions => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionContext {
    pub trigger_kind: CompletionTriggerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_character: Option<String>,
}

impl CompletionContext {
    #[must_use]
    pub fn invoked() -> Self {
        Self {
            trigger_kind: CompletionTriggerKind::Invoked,
            trigger_character: None,
        }
    }

    #[must_use]
    pub fn trigger_character(ch: char) -> Self {
        Self {
            trigger_kind: CompletionTriggerKind::TriggerCharacter,
            trigger_character: Some(ch.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<CompletionContext>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Documentation {
    Plain(String),
    Markup { kind: String, value: String },
}

impl Documentation {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Plain(s) => s,
            Self::Markup { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default)]
    pub kind: Option<u32>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub documentation: Option<Documentation>,
    #[serde(default)]
    pub insert_text: Option<String>,
    #[serde(default)]
    pub sort_text: Option<String>,
}

impl CompletionItem {
    /// Text to insert when the item is accepted.
    #[must_use]
    pub fn insertion(&self) -> &str {
        self.insert_text.as_deref().unwrap_or(&self.label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionList {
    #[serde(default)]
    pub is_incomplete: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<CompletionItem>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CompletionList {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CompletionResponse {
    List(CompletionList),
    Items(Vec<CompletionItem>),
}

/// Normalize a completion result: a wrapped list is tried first, then a bare
/// item array. `null` means no suggestions.
pub fn decode_completion(result: Value) -> Result<CompletionList, serde_json::Error> {
    if result.is_null() {
        return Ok(CompletionList::default());
    }
    Ok(match serde_json::from_value(result)? {
        CompletionResponse::List(list) => list,
        CompletionResponse::Items(items) => CompletionList {
            is_incomplete: false,
            items,
        },
    })
}

// ── Code actions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CodeActionContext {
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeActionParams {
    pub text_document: TextDocumentIdentifier,
    pub range: Range,
    pub context: CodeActionContext,
}

/// A code action, or a bare command (which shares `title` and `command`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAction {
    pub title: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    pub is_preferred: Option<bool>,
    #[serde(default)]
    pub edit: Option<Value>,
    #[serde(default)]
    pub command: Option<Value>,
}

pub fn decode_code_actions(result: Value) -> Result<Vec<CodeAction>, serde_json::Error> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(result)
}

/// Payload of a server-pushed `textDocument/codeAction` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeActionsPushParams {
    pub uri: String,
    #[serde(default)]
    pub actions: Vec<CodeAction>,
}

// ── Server-initiated requests ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigurationParams {
    #[serde(default)]
    pub items: Vec<Value>,
}

// ── Paths and languages ────────────────────────────────────────────────

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}

/// LSP language identifier for a file, by extension.
#[must_use]
pub fn language_id_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "go" => "go",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" => "javascript",
        "jsx" => "javascriptreact",
        "py" => "python",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" => "cpp",
        "rs" => "rust",
        "cs" => "csharp",
        "php" => "php",
        "sh" | "bash" | "zsh" => "shellscript",
        "html" | "htm" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        _ => "plaintext",
    }
}
