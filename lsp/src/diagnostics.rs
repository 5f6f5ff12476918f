//! Diagnostics store: the latest published diagnostics per document.

use std::collections::HashMap;

use crate::protocol::Diagnostic;
use crate::types::DiagnosticsSnapshot;

#[derive(Debug, Default)]
pub struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the diagnostics for `uri`. An empty list clears the document.
    pub fn update(&mut self, uri: String, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> &[Diagnostic] {
        self.data.get(uri).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(String, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        // Documents with errors first, then by URI.
        files.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }

    /// Error-level diagnostics of the given documents, skipping clean ones.
    #[must_use]
    pub fn errors_for(&self, uris: &[String]) -> Vec<(String, Vec<Diagnostic>)> {
        uris.iter()
            .filter_map(|uri| {
                let errors: Vec<Diagnostic> = self
                    .data
                    .get(uri)?
                    .iter()
                    .filter(|d| d.severity().is_error())
                    .cloned()
                    .collect();
                (!errors.is_empty()).then(|| (uri.clone(), errors))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Position, Range};
    use crate::types::DiagnosticSeverity;

    fn make_diag(severity: DiagnosticSeverity, msg: &str, line: u32) -> Diagnostic {
        Diagnostic {
            range: Range::at(Position::new(line, 0)),
            severity: Some(severity as u64),
            code: None,
            source: Some("test".into()),
            message: msg.to_string(),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let store = DiagnosticsStore::new();
        let snap = store.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.error_count(), 0);
        assert!(store.get("file:///none.rs").is_empty());
    }

    #[test]
    fn test_update_and_snapshot() {
        let mut store = DiagnosticsStore::new();
        let uri = "file:///src/main.rs".to_string();
        store.update(
            uri.clone(),
            vec![
                make_diag(DiagnosticSeverity::Error, "expected `;`", 10),
                make_diag(DiagnosticSeverity::Warning, "unused variable", 20),
            ],
        );

        let snap = store.snapshot();
        assert_eq!(snap.error_count(), 1);
        assert_eq!(snap.warning_count(), 1);
        assert_eq!(snap.files()[0].0, uri);
        assert_eq!(store.get(&uri).len(), 2);
    }

    #[test]
    fn test_empty_diagnostics_clears_document() {
        let mut store = DiagnosticsStore::new();
        let uri = "file:///main.rs".to_string();
        store.update(uri.clone(), vec![make_diag(DiagnosticSeverity::Error, "err", 1)]);
        assert_eq!(store.snapshot().files().len(), 1);

        store.update(uri, vec![]);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_errors_first_sorting() {
        let mut store = DiagnosticsStore::new();
        store.update(
            "file:///a.rs".into(),
            vec![make_diag(DiagnosticSeverity::Warning, "warn", 1)],
        );
        store.update(
            "file:///b.rs".into(),
            vec![make_diag(DiagnosticSeverity::Error, "err", 1)],
        );

        let snap = store.snapshot();
        assert_eq!(snap.files()[0].0, "file:///b.rs");
        assert_eq!(snap.files()[1].0, "file:///a.rs");
    }

    #[test]
    fn test_errors_for() {
        let mut store = DiagnosticsStore::new();
        let a = "file:///a.rs".to_string();
        let b = "file:///b.rs".to_string();
        store.update(
            a.clone(),
            vec![
                make_diag(DiagnosticSeverity::Error, "err", 1),
                make_diag(DiagnosticSeverity::Warning, "warn", 2),
            ],
        );
        store.update(b.clone(), vec![make_diag(DiagnosticSeverity::Warning, "warn only", 1)]);

        let result = store.errors_for(&[a.clone(), b, "file:///missing.rs".into()]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, a);
        assert_eq!(result[0].1.len(), 1);
    }

    #[test]
    fn test_republish_replaces_previous() {
        let mut store = DiagnosticsStore::new();
        let uri = "file:///main.rs".to_string();
        store.update(
            uri.clone(),
            vec![
                make_diag(DiagnosticSeverity::Error, "err1", 1),
                make_diag(DiagnosticSeverity::Error, "err2", 2),
            ],
        );
        assert_eq!(store.snapshot().error_count(), 2);

        store.update(uri, vec![make_diag(DiagnosticSeverity::Error, "err1", 1)]);
        assert_eq!(store.snapshot().error_count(), 1);
    }
}
