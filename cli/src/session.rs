//! One editor session against a language server, recorded into a [`Report`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

use bitcode_lsp::protocol::{language_id_for_path, path_to_file_uri};
use bitcode_lsp::{
    CodeAction, CompletionContext, CompletionList, Diagnostic, DiagnosticsStore, LspClient,
    LspConfig, Position, Range,
};

const DEFAULT_ROOT_MARKERS: &[&str] = &[".git"];

pub struct SessionRequest {
    pub file: PathBuf,
    pub hover: Option<Position>,
    pub complete: Option<Position>,
    pub code_actions: Option<Position>,
    pub edit: Option<String>,
    pub wait: Duration,
}

/// Everything the server told us, in display order.
#[derive(Debug, Default)]
pub struct Report {
    pub uri: String,
    pub server: Option<String>,
    pub hover: Option<(Position, String)>,
    pub completions: Option<(Position, CompletionList)>,
    pub code_actions: Option<(Position, Vec<CodeAction>)>,
    /// Completions the server returned after the edit was synced.
    pub completions_after_edit: Option<CompletionList>,
    /// Each published diagnostic with the fixes offered for its range.
    pub diagnostics: Vec<(Diagnostic, Vec<CodeAction>)>,
    pub pushed_actions: Vec<CodeAction>,
    pub status: String,
    /// Error-level diagnostics left in the document.
    pub errors: usize,
}

impl Report {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

/// Walk up from `start` to the first directory containing one of `markers`.
pub fn find_workspace_root(start: &Path, markers: &[String]) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| markers.iter().any(|m| dir.join(m).exists()))
        .map(Path::to_path_buf)
}

pub async fn run(config: LspConfig, request: &SessionRequest) -> Result<Report> {
    let path = request
        .file
        .canonicalize()
        .with_context(|| format!("opening {}", request.file.display()))?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let dir = path.parent().unwrap_or(&path).to_path_buf();

    let mut markers: Vec<String> = config
        .server
        .as_ref()
        .map(|s| s.root_markers.clone())
        .unwrap_or_default();
    if markers.is_empty() {
        markers = DEFAULT_ROOT_MARKERS.iter().map(ToString::to_string).collect();
    }
    let root = find_workspace_root(&dir, &markers).unwrap_or(dir);
    let uri = path_to_file_uri(&path)?.to_string();
    let root_uri = path_to_file_uri(&root)?.to_string();
    tracing::info!(uri = %uri, root = %root.display(), "starting session");

    let client = LspClient::new(config);
    let store = Arc::new(Mutex::new(DiagnosticsStore::new()));
    let (published_tx, published_rx) = mpsc::unbounded_channel();
    {
        let store = Arc::clone(&store);
        client.on_diagnostics(move |uri, diagnostics| {
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(uri.clone(), diagnostics);
            let _ = published_tx.send(uri);
        });
    }
    let pushed = Arc::new(Mutex::new(Vec::new()));
    {
        let pushed = Arc::clone(&pushed);
        client.on_code_actions(move |_uri, actions| {
            pushed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(actions);
        });
    }
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    client.on_completions(move |_uri, list| {
        let _ = completions_tx.send(list);
    });

    client
        .start(Some(&root))
        .await
        .context("starting language server")?;

    let document = OpenDocument {
        uri: uri.clone(),
        root_uri,
        language_id: language_id_for_path(&path),
        text,
    };
    let mut feeds = Feeds {
        store: Arc::clone(&store),
        published: published_rx,
        completions: completions_rx,
    };
    let mut report = Report {
        uri,
        ..Report::default()
    };
    let outcome = drive(&client, request, &document, &mut feeds, &mut report).await;
    client.shutdown().await;
    outcome?;

    report.pushed_actions =
        std::mem::take(&mut *pushed.lock().unwrap_or_else(PoisonError::into_inner));
    {
        let store = store.lock().unwrap_or_else(PoisonError::into_inner);
        report.status = store.snapshot().status_string();
        report.errors = error_count(&store, &report.uri);
    }
    Ok(report)
}

struct OpenDocument {
    uri: String,
    root_uri: String,
    language_id: &'static str,
    text: String,
}

/// What the server pushes while the session runs.
struct Feeds {
    store: Arc<Mutex<DiagnosticsStore>>,
    published: mpsc::UnboundedReceiver<String>,
    completions: mpsc::UnboundedReceiver<CompletionList>,
}

async fn drive(
    client: &LspClient,
    request: &SessionRequest,
    doc: &OpenDocument,
    feeds: &mut Feeds,
    report: &mut Report,
) -> Result<()> {
    let uri = doc.uri.as_str();
    let init = client.initialize(&doc.root_uri).await.context("initialize")?;
    report.server = init.server_info.map(|info| info.name);
    client.initialized()?;

    client.open(uri, doc.language_id, &doc.text)?;
    let mut expected_publishes = 1;

    if let Some(edit) = &request.edit {
        let edited = format!("{}{edit}", doc.text);
        match request.complete {
            Some(cursor) => client.notify_change_at(uri, edited, cursor)?,
            None => client.notify_change(uri, edited)?,
        }
        expected_publishes += 1;
    }

    if let Some(pos) = request.hover {
        let hover = client.hover(uri, pos).await.context("hover")?;
        report.hover = Some((pos, hover));
    }
    if let Some(pos) = request.complete {
        let list = client
            .completion(uri, pos, Some(CompletionContext::invoked()))
            .await
            .context("completion")?;
        report.completions = Some((pos, list));
    }

    // Diagnostics are pushed; give the server a bounded time to report.
    let deadline = Instant::now() + request.wait;
    while expected_publishes > 0 {
        match timeout_at(deadline, feeds.published.recv()).await {
            Ok(Some(published_uri)) if published_uri == uri => expected_publishes -= 1,
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    if request.edit.is_some()
        && request.complete.is_some()
        && client.config().complete_after_change
        && let Ok(Some(list)) = timeout_at(deadline, feeds.completions.recv()).await
    {
        report.completions_after_edit = Some(list);
    }

    let diagnostics = feeds
        .store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(uri)
        .to_vec();

    if let Some(pos) = request.code_actions {
        let in_range: Vec<Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.range.contains_line(pos.line))
            .cloned()
            .collect();
        let actions = client
            .code_action(uri, Range::at(pos), in_range)
            .await
            .context("code actions")?;
        report.code_actions = Some((pos, actions));
    }

    for diagnostic in diagnostics {
        let actions = match client
            .code_action(uri, diagnostic.range, vec![diagnostic.clone()])
            .await
        {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!("code actions for diagnostic failed: {e}");
                Vec::new()
            }
        };
        report.diagnostics.push((diagnostic, actions));
    }
    Ok(())
}

fn error_count(store: &DiagnosticsStore, uri: &str) -> usize {
    store
        .errors_for(&[uri.to_string()])
        .iter()
        .map(|(_, errors)| errors.len())
        .sum()
}

fn one_based(pos: Position) -> String {
    format!("{}:{}", pos.line + 1, pos.character + 1)
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "document: {}", self.uri)?;
        if let Some(server) = &self.server {
            writeln!(f, "server: {server}")?;
        }
        if let Some((pos, hover)) = &self.hover {
            if hover.is_empty() {
                writeln!(f, "hover {}: (nothing)", one_based(*pos))?;
            } else {
                writeln!(f, "hover {}:", one_based(*pos))?;
                for line in hover.lines() {
                    writeln!(f, "  {line}")?;
                }
            }
        }
        if let Some((pos, list)) = &self.completions {
            write_completions(f, &format!("completions {}", one_based(*pos)), list)?;
        }
        if let Some(list) = &self.completions_after_edit {
            write_completions(f, "completions after edit", list)?;
        }
        if let Some((pos, actions)) = &self.code_actions {
            writeln!(f, "code actions {}: {}", one_based(*pos), actions.len())?;
            for action in actions {
                writeln!(f, "  {}", action.title)?;
            }
        }
        if self.diagnostics.is_empty() {
            writeln!(f, "diagnostics: none")?;
        } else {
            writeln!(f, "diagnostics ({}):", self.status)?;
            for (diagnostic, actions) in &self.diagnostics {
                writeln!(f, "  {}", diagnostic.display_with_uri(&self.uri))?;
                for action in actions {
                    writeln!(f, "    fix: {}", action.title)?;
                }
            }
        }
        if !self.pushed_actions.is_empty() {
            writeln!(f, "pushed code actions:")?;
            for action in &self.pushed_actions {
                writeln!(f, "  {}", action.title)?;
            }
        }
        Ok(())
    }
}

fn write_completions(f: &mut fmt::Formatter<'_>, heading: &str, list: &CompletionList) -> fmt::Result {
    let more = if list.is_incomplete { ", incomplete" } else { "" };
    writeln!(f, "{heading}: {}{more}", list.items.len())?;
    for item in &list.items {
        match &item.detail {
            Some(detail) => writeln!(f, "  {} - {detail}", item.label)?,
            None => writeln!(f, "  {}", item.label)?,
        }
    }
    Ok(())
}
