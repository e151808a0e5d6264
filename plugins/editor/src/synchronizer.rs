//! Pushing resolved markup into the live document

use crate::document::EditableDocument;
use crate::html;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the synchronizer did with a resolved value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    /// Empty resolved value, nothing to do
    Skipped,
    /// The document already shows exactly this markup
    Unchanged,
    /// Same structure with different URLs; the URLs were refreshed
    RefreshUrls,
    /// First structural content adopted wholesale
    InitialLoad,
    /// Structure diverged after initialization; local edits were kept
    PreserveLocalEdits,
}

impl SyncDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDecision::Skipped => "skipped",
            SyncDecision::Unchanged => "unchanged",
            SyncDecision::RefreshUrls => "refresh_urls",
            SyncDecision::InitialLoad => "initial_load",
            SyncDecision::PreserveLocalEdits => "preserve_local_edits",
        }
    }

    /// Whether the live document was written
    pub fn applied(&self) -> bool {
        matches!(self, SyncDecision::RefreshUrls | SyncDecision::InitialLoad)
    }
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a resolved value may overwrite the live document
///
/// The live document is never overwritten with structurally different
/// content once it has been initialized, so user edits made while a
/// resolution pass was running survive.
#[derive(Debug, Default, Clone)]
pub struct DocumentSynchronizer {
    initialized: bool,
}

impl DocumentSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Record that the live document now holds content of its own
    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Allow the next structurally different value to be adopted
    pub fn reset(&mut self) {
        self.initialized = false;
    }

    /// Apply a newly published resolved value to the document
    pub fn apply(&mut self, document: &mut EditableDocument, resolved: &str) -> SyncDecision {
        if resolved.is_empty() {
            return SyncDecision::Skipped;
        }

        let decision = if html::structurally_equal(document.html(), resolved) {
            self.initialized = true;
            if document.set_content(resolved) {
                SyncDecision::RefreshUrls
            } else {
                SyncDecision::Unchanged
            }
        } else if !self.initialized {
            document.set_content(resolved);
            self.initialized = true;
            SyncDecision::InitialLoad
        } else {
            SyncDecision::PreserveLocalEdits
        };

        tracing::debug!("Document sync decision: {}", decision);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_value_is_skipped() {
        let mut sync = DocumentSynchronizer::new();
        let mut doc = EditableDocument::new("<p>kept</p>");

        assert_eq!(sync.apply(&mut doc, ""), SyncDecision::Skipped);
        assert_eq!(doc.html(), "<p>kept</p>");
        assert!(!sync.is_initialized());
    }

    #[test]
    fn test_url_refresh_on_equal_structure() {
        let mut sync = DocumentSynchronizer::new();
        let mut doc = EditableDocument::new(r#"<img data-file-path="a.png">"#);

        let resolved = r#"<img data-file-path="a.png" src="https://x/a?v=1">"#;
        assert_eq!(sync.apply(&mut doc, resolved), SyncDecision::RefreshUrls);
        assert_eq!(doc.html(), resolved);
        assert!(sync.is_initialized());

        assert_eq!(sync.apply(&mut doc, resolved), SyncDecision::Unchanged);

        let refreshed = r#"<img data-file-path="a.png" src="https://x/a?v=2">"#;
        assert_eq!(sync.apply(&mut doc, refreshed), SyncDecision::RefreshUrls);
        assert_eq!(doc.html(), refreshed);
    }

    #[test]
    fn test_initial_load_adopts_wholesale() {
        let mut sync = DocumentSynchronizer::new();
        let mut doc = EditableDocument::default();

        let decision = sync.apply(&mut doc, "<p>Loaded</p>");

        assert_eq!(decision, SyncDecision::InitialLoad);
        assert!(decision.applied());
        assert_eq!(doc.html(), "<p>Loaded</p>");
    }

    #[test]
    fn test_diverged_content_is_not_clobbered() {
        let mut sync = DocumentSynchronizer::new();
        let mut doc = EditableDocument::new(r#"<p>Draft</p><img data-file-path="a.png">"#);
        sync.apply(&mut doc, r#"<p>Draft</p><img data-file-path="a.png" src="u1">"#);

        doc.apply_edit(r#"<p>Draft edited</p><img data-file-path="a.png" src="u1">"#, 0)
            .unwrap();
        let stale = r#"<p>Draft</p><img data-file-path="a.png" src="u2">"#;

        assert_eq!(sync.apply(&mut doc, stale), SyncDecision::PreserveLocalEdits);
        assert!(doc.html().contains("Draft edited"));
        assert!(doc.html().contains("src=\"u1\""));
    }

    #[test]
    fn test_reset_allows_adoption_again() {
        let mut sync = DocumentSynchronizer::new();
        let mut doc = EditableDocument::new("<p>one</p>");
        sync.mark_initialized();

        assert_eq!(sync.apply(&mut doc, "<p>two</p>"), SyncDecision::PreserveLocalEdits);
        sync.reset();
        assert_eq!(sync.apply(&mut doc, "<p>two</p>"), SyncDecision::InitialLoad);
        assert_eq!(doc.html(), "<p>two</p>");
    }

    #[test]
    fn test_decision_names() {
        assert_eq!(SyncDecision::RefreshUrls.to_string(), "refresh_urls");
        assert!(!SyncDecision::PreserveLocalEdits.applied());
    }
}
