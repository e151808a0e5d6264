//! Rich-text content pipeline for Mizzen
//!
//! Resolves file references to direct URLs behind a debounce, keeps the live
//! document in sync without clobbering local edits, autosaves, and runs the
//! media attachment flows. [`ContentEditor`] wires it all for one document.

use mizzen_core::MizzenError;

pub mod autosave;
pub mod document;
pub mod file_ref;
pub mod html;
pub mod media;
pub mod scheduler;
pub mod session;
pub mod synchronizer;
pub mod timer;

pub use autosave::{AutosaveController, AutosaveStatus, Persistence, GENERIC_SAVE_ERROR};
pub use document::{EditableDocument, EditingImage, ImageSize, Selection, SharedDocument};
pub use file_ref::{
    FileReferenceResolver, Resolution, ResolutionCache, StaticUrlResolver, UrlResolver,
};
pub use media::{
    ClipboardItem, EditOutcome, EntityRef, FileKind, FileStorage, ImageEditingSurface,
    MediaMediator, MediaPayload, PasteEvent, PasteOutcome, UploadedFile,
};
pub use scheduler::ResolutionScheduler;
pub use session::{ContentEditor, ContentEditorBuilder, EditMode};
pub use synchronizer::{DocumentSynchronizer, SyncDecision};
pub use timer::{Liveness, Timer};

/// Editor-specific errors
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("Invalid caret position: byte {offset}")]
    InvalidCaret { offset: usize },

    #[error("No image selected")]
    NoImageSelected,

    #[error("Cannot link bytes {start}..{end}")]
    InvalidLinkRange { start: usize, end: usize },

    #[error("Image index {index} out of range ({count} images)")]
    ImageIndexOutOfRange { index: usize, count: usize },

    #[error("Unknown image size: {0}")]
    InvalidImageSize(String),

    #[error("Entity type and id are required for uploads")]
    MissingEntity,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Image editing is not available")]
    EditingUnavailable,

    #[error("Editor is in view mode")]
    ReadOnly,

    #[error("Editor has been closed")]
    DocumentClosed,
}

impl EditorError {
    /// Whether the error comes from the media flows
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            EditorError::MissingEntity
                | EditorError::UploadFailed(_)
                | EditorError::EditingUnavailable
        )
    }
}

impl From<EditorError> for MizzenError {
    fn from(err: EditorError) -> Self {
        if err.is_media() {
            MizzenError::Media(err.to_string())
        } else {
            MizzenError::Document(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_error_conversion() {
        let media: MizzenError = EditorError::UploadFailed("quota".into()).into();
        assert!(matches!(media, MizzenError::Media(ref msg) if msg.contains("quota")));

        let document: MizzenError = EditorError::ImageIndexOutOfRange { index: 3, count: 1 }.into();
        match document {
            MizzenError::Document(msg) => assert_eq!(msg, "Image index 3 out of range (1 images)"),
            other => panic!("Expected document error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_only_is_a_document_error() {
        let error: MizzenError = EditorError::ReadOnly.into();
        assert!(matches!(error, MizzenError::Document(_)));
        assert!(!EditorError::ReadOnly.is_media());
        assert!(EditorError::EditingUnavailable.is_media());
    }
}
