//! Media attachment flows
//!
//! Pasted images are uploaded and inserted at the caret, images picked from
//! the media library are inserted without an upload, and the selected image
//! can be edited in place, which stores the edited bytes as a new file.

use crate::document::{EditingImage, SharedDocument};
use crate::timer::Liveness;
use crate::EditorError;
use async_trait::async_trait;
use mizzen_core::{EditorEvent, EventEmitter, RemoteError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// The entity a document (and its attachments) belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Both identifiers are present
    pub fn is_complete(&self) -> bool {
        !self.entity_type.trim().is_empty() && !self.entity_id.trim().is_empty()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Storage category of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Video,
    Audio,
    GpsTrack,
    Document,
    Other,
}

impl FileKind {
    /// Classify a file by MIME type
    pub fn from_mime(mime_type: Option<&str>) -> Self {
        let Some(mime) = mime_type.map(str::trim).filter(|mime| !mime.is_empty()) else {
            return FileKind::Other;
        };
        let mime = mime.to_ascii_lowercase();

        if mime.starts_with("image/") {
            FileKind::Image
        } else if mime.starts_with("video/") {
            FileKind::Video
        } else if mime.starts_with("audio/") {
            FileKind::Audio
        } else if mime.contains("gpx") {
            FileKind::GpsTrack
        } else {
            FileKind::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::GpsTrack => "gps_track",
            FileKind::Document => "document",
            FileKind::Other => "other",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes of a file about to be uploaded
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaPayload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mime(Some(self.mime_type.as_str()))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPayload")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Metadata of a stored file, as returned by uploads and the media library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    #[serde(default)]
    pub id: Option<String>,
    /// Direct, time-limited URL
    pub signed_url: String,
    /// Stable storage path
    pub file_path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl UploadedFile {
    pub fn new(signed_url: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            id: None,
            signed_url: signed_url.into(),
            file_path: file_path.into(),
            name: None,
            mime_type: None,
        }
    }
}

/// One item of a clipboard paste
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardItem {
    pub mime_type: String,
    /// File contents, absent when the item cannot be read as a file
    pub payload: Option<MediaPayload>,
}

impl ClipboardItem {
    pub fn file(payload: MediaPayload) -> Self {
        Self {
            mime_type: payload.mime_type.clone(),
            payload: Some(payload),
        }
    }

    pub fn text(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            payload: None,
        }
    }

    pub fn is_image(&self) -> bool {
        FileKind::from_mime(Some(self.mime_type.as_str())) == FileKind::Image
    }
}

/// A paste reaching the editor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteEvent {
    pub items: Vec<ClipboardItem>,
}

impl PasteEvent {
    pub fn new(items: Vec<ClipboardItem>) -> Self {
        Self { items }
    }

    /// The first image item, if any
    pub fn first_image(&self) -> Option<&ClipboardItem> {
        self.items.iter().find(|item| item.is_image())
    }
}

/// What happened to a paste
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasteOutcome {
    /// No image in the paste; default handling applies
    NotHandled,
    /// The image was uploaded and inserted
    Inserted(UploadedFile),
    /// Handled, but nothing was inserted (unreadable item, no entity, or
    /// the editor closed during the upload)
    Skipped,
    /// The upload failed; the document is unchanged
    Failed(String),
}

impl PasteOutcome {
    /// Whether default paste handling must be suppressed
    pub fn is_handled(&self) -> bool {
        !matches!(self, PasteOutcome::NotHandled)
    }

    pub fn changed_document(&self) -> bool {
        matches!(self, PasteOutcome::Inserted(_))
    }
}

/// What happened to an edit-in-place request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The edited image replaced the original reference
    Replaced(UploadedFile),
    /// The original reference was gone, so the edited image was inserted
    Inserted(UploadedFile),
    Cancelled,
    /// No entity to attach the edited file to, or the editor closed
    Skipped,
    Failed(String),
}

impl EditOutcome {
    pub fn changed_document(&self) -> bool {
        matches!(self, EditOutcome::Replaced(_) | EditOutcome::Inserted(_))
    }
}

/// Remote file storage
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn upload_file(
        &self,
        payload: &MediaPayload,
        entity: &EntityRef,
        kind: FileKind,
    ) -> std::result::Result<UploadedFile, RemoteError>;
}

/// Interactive image editor; `None` means the user cancelled
#[async_trait]
pub trait ImageEditingSurface: Send + Sync {
    async fn edit_image(&self, image: &EditingImage) -> Option<MediaPayload>;
}

struct UploadGuard(Arc<AtomicUsize>);

impl UploadGuard {
    fn start(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs the media flows against a shared document
pub struct MediaMediator {
    storage: Arc<dyn FileStorage>,
    surface: Option<Arc<dyn ImageEditingSurface>>,
    entity: Option<EntityRef>,
    uploading: Arc<AtomicUsize>,
    events: EventEmitter,
    document_id: Uuid,
    liveness: Liveness,
}

impl MediaMediator {
    pub fn new(storage: Arc<dyn FileStorage>, entity: Option<EntityRef>) -> Self {
        Self {
            storage,
            surface: None,
            entity,
            uploading: Arc::new(AtomicUsize::new(0)),
            events: EventEmitter::detached(),
            document_id: Uuid::new_v4(),
            liveness: Liveness::new(),
        }
    }

    pub fn with_surface(mut self, surface: Arc<dyn ImageEditingSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_events(mut self, document_id: Uuid, events: EventEmitter) -> Self {
        self.document_id = document_id;
        self.events = events;
        self
    }

    /// Tie the mediator to its owner; finished uploads are dropped once the
    /// owner shuts down
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        self.entity.as_ref()
    }

    fn closed_during(&self, operation: &str, file: &UploadedFile) -> bool {
        if self.liveness.is_alive() {
            return false;
        }
        tracing::debug!(
            "Editor closed during {}, discarding {}",
            operation,
            file.file_path
        );
        true
    }

    /// Whether any upload is running
    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst) > 0
    }

    fn upload_target(&self, operation: &str) -> Option<&EntityRef> {
        match self.entity.as_ref().filter(|entity| entity.is_complete()) {
            Some(entity) => Some(entity),
            None => {
                tracing::warn!(
                    "{} skipped: {}",
                    operation,
                    EditorError::MissingEntity
                );
                None
            }
        }
    }

    async fn upload(
        &self,
        operation: &str,
        payload: &MediaPayload,
        entity: &EntityRef,
        kind: FileKind,
    ) -> std::result::Result<UploadedFile, String> {
        let _guard = UploadGuard::start(&self.uploading);
        tracing::debug!(
            "Uploading {} ({} bytes, {}) for {}",
            payload.name,
            payload.len(),
            kind,
            entity
        );

        self.storage
            .upload_file(payload, entity, kind)
            .await
            .map_err(|e| {
                let message = e.detail().unwrap_or(&e.message).to_string();
                let error = EditorError::UploadFailed(message.clone());
                tracing::error!("{} failed: {}", operation, error);
                self.events.emit(EditorEvent::media_failed(
                    self.document_id,
                    operation,
                    message.clone(),
                ));
                message
            })
    }

    fn inserted(&self, file: &UploadedFile) {
        tracing::info!("Inserted image {}", file.file_path);
        self.events
            .emit(EditorEvent::media_inserted(self.document_id, file.file_path.clone()));
    }

    /// Handle a paste; only pastes carrying an image are handled
    pub async fn paste(&self, document: &SharedDocument, event: &PasteEvent) -> PasteOutcome {
        let Some(item) = event.first_image() else {
            return PasteOutcome::NotHandled;
        };
        let Some(payload) = item.payload.as_ref() else {
            tracing::debug!("Pasted image item could not be read as a file");
            return PasteOutcome::Skipped;
        };
        let Some(entity) = self.upload_target("Pasted image upload") else {
            return PasteOutcome::Skipped;
        };

        let kind = FileKind::from_mime(Some(item.mime_type.as_str()));
        let uploaded = match self.upload("paste", payload, entity, kind).await {
            Ok(uploaded) => uploaded,
            Err(message) => return PasteOutcome::Failed(message),
        };
        if self.closed_during("paste", &uploaded) {
            return PasteOutcome::Skipped;
        }

        let inserted = document
            .lock()
            .insert_image(&uploaded.signed_url, &uploaded.file_path);
        match inserted {
            Ok(_) => {
                self.inserted(&uploaded);
                PasteOutcome::Inserted(uploaded)
            }
            Err(e) => {
                tracing::error!("Failed to insert pasted image: {}", e);
                PasteOutcome::Failed(e.to_string())
            }
        }
    }

    /// Insert an existing library file at the selection
    pub fn insert_from_library(
        &self,
        document: &SharedDocument,
        file: &UploadedFile,
    ) -> Result<usize, EditorError> {
        let offset = document
            .lock()
            .insert_image(&file.signed_url, &file.file_path)?;
        self.inserted(file);
        Ok(offset)
    }

    /// Edit the selected image and store the result as a new file
    pub async fn edit_selected_image(
        &self,
        document: &SharedDocument,
    ) -> Result<EditOutcome, EditorError> {
        let surface = self.surface.clone().ok_or(EditorError::EditingUnavailable)?;
        let (image, selection, revision) = {
            let doc = document.lock();
            (doc.editing_image()?, doc.selection(), doc.revision())
        };

        let Some(entity) = self.upload_target("Edited image upload") else {
            return Ok(EditOutcome::Skipped);
        };

        let Some(edited) = surface.edit_image(&image).await else {
            tracing::debug!("Image editing cancelled for {}", image.name);
            return Ok(EditOutcome::Cancelled);
        };
        if !self.liveness.is_alive() {
            return Ok(EditOutcome::Skipped);
        }

        let uploaded = match self.upload("edit", &edited, entity, FileKind::Image).await {
            Ok(uploaded) => uploaded,
            Err(message) => return Ok(EditOutcome::Failed(message)),
        };
        if self.closed_during("edit", &uploaded) {
            return Ok(EditOutcome::Skipped);
        }

        let mut doc = document.lock();
        // without a path, only an untouched document identifies the image
        let still_selected = match image.file_path.as_deref() {
            Some(path) => doc
                .selected_image()
                .is_some_and(|tag| tag.file_path() == Some(path)),
            None => doc.revision() == revision && doc.selection() == selection,
        };
        let target = if still_selected {
            true
        } else {
            match image.file_path.as_deref().and_then(|path| doc.find_image(path)) {
                Some(index) => doc.select_image(index).is_ok(),
                None => false,
            }
        };

        let outcome = if target {
            doc.replace_selected_image(&uploaded.signed_url, &uploaded.file_path)?;
            EditOutcome::Replaced(uploaded)
        } else {
            tracing::debug!("Edited image's original reference is gone, inserting instead");
            doc.insert_image(&uploaded.signed_url, &uploaded.file_path)?;
            EditOutcome::Inserted(uploaded)
        };
        drop(doc);

        if let EditOutcome::Replaced(file) | EditOutcome::Inserted(file) = &outcome {
            self.inserted(file);
        }
        Ok(outcome)
    }
}

impl fmt::Debug for MediaMediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaMediator")
            .field("entity", &self.entity)
            .field("editing", &self.surface.is_some())
            .field("uploading", &self.uploading.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EditableDocument;
    use crate::html;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeStorage {
        uploads: Mutex<Vec<(String, EntityRef, FileKind)>>,
        fail_with: Option<RemoteError>,
        latency: Duration,
    }

    #[async_trait]
    impl FileStorage for FakeStorage {
        async fn upload_file(
            &self,
            payload: &MediaPayload,
            entity: &EntityRef,
            kind: FileKind,
        ) -> std::result::Result<UploadedFile, RemoteError> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if let Some(error) = &self.fail_with {
                return Err(error.clone());
            }
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push((payload.name.clone(), entity.clone(), kind));
            let path = format!("{}/{}/{}-{}", entity.entity_type, entity.entity_id, uploads.len(), payload.name);
            Ok(UploadedFile::new(format!("https://cdn/{}", path), path))
        }
    }

    struct FixedSurface(Option<MediaPayload>);

    #[async_trait]
    impl ImageEditingSurface for FixedSurface {
        async fn edit_image(&self, _image: &EditingImage) -> Option<MediaPayload> {
            self.0.clone()
        }
    }

    fn png(name: &str) -> MediaPayload {
        MediaPayload::new(name, "image/png", vec![0x89, b'P', b'N', b'G'])
    }

    fn project() -> Option<EntityRef> {
        Some(EntityRef::new("project", "42"))
    }

    fn document(html: &str) -> SharedDocument {
        SharedDocument::new(EditableDocument::new(html))
    }

    #[test]
    fn test_file_kind_from_mime() {
        assert_eq!(FileKind::from_mime(Some("image/jpeg")), FileKind::Image);
        assert_eq!(FileKind::from_mime(Some("video/mp4")), FileKind::Video);
        assert_eq!(FileKind::from_mime(Some("audio/ogg")), FileKind::Audio);
        assert_eq!(FileKind::from_mime(Some("application/gpx+xml")), FileKind::GpsTrack);
        assert_eq!(FileKind::from_mime(Some("application/pdf")), FileKind::Document);
        assert_eq!(FileKind::from_mime(Some("")), FileKind::Other);
        assert_eq!(FileKind::from_mime(None), FileKind::Other);
        assert_eq!(FileKind::GpsTrack.to_string(), "gps_track");
        assert_eq!(png("a.png").kind(), FileKind::Image);
    }

    #[test]
    fn test_uploaded_file_deserializes_backend_shape() {
        let file: UploadedFile = serde_json::from_str(
            r#"{"id": "f1", "signed_url": "https://cdn/a", "file_path": "p/a.png", "size": 12}"#,
        )
        .unwrap();
        assert_eq!(file.id.as_deref(), Some("f1"));
        assert_eq!(file.file_path, "p/a.png");
        assert_eq!(file.name, None);
    }

    #[tokio::test]
    async fn test_paste_without_image_is_not_handled() {
        let mediator = MediaMediator::new(Arc::new(FakeStorage::default()), project());
        let doc = document("<p>x</p>");

        let outcome = mediator
            .paste(&doc, &PasteEvent::new(vec![ClipboardItem::text("text/plain")]))
            .await;

        assert_eq!(outcome, PasteOutcome::NotHandled);
        assert!(!outcome.is_handled());
        assert_eq!(doc.html(), "<p>x</p>");
    }

    #[tokio::test]
    async fn test_paste_uploads_first_image_and_inserts_at_caret() {
        let storage = Arc::new(FakeStorage::default());
        let mediator = MediaMediator::new(storage.clone(), project());
        let doc = document("<p>AB</p>");
        doc.lock().place_caret(4).unwrap();

        let event = PasteEvent::new(vec![
            ClipboardItem::text("text/html"),
            ClipboardItem::file(png("first.png")),
            ClipboardItem::file(png("second.png")),
        ]);
        let outcome = mediator.paste(&doc, &event).await;

        assert!(outcome.is_handled());
        assert!(outcome.changed_document());
        let uploads = storage.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "first.png");
        assert_eq!(uploads[0].2, FileKind::Image);
        assert_eq!(
            doc.html(),
            r#"<p>A<img src="https://cdn/project/42/1-first.png" data-file-path="project/42/1-first.png">B</p>"#
        );
        assert!(!mediator.is_uploading());
    }

    #[tokio::test]
    async fn test_failed_paste_upload_leaves_document_unchanged() {
        let storage = Arc::new(FakeStorage {
            fail_with: Some(RemoteError::with_detail("Upload failed", "file too large")),
            ..Default::default()
        });
        let mediator = MediaMediator::new(storage, project());
        let doc = document("<p>x</p>");

        let outcome = mediator
            .paste(&doc, &PasteEvent::new(vec![ClipboardItem::file(png("a.png"))]))
            .await;

        assert_eq!(outcome, PasteOutcome::Failed("file too large".to_string()));
        assert!(outcome.is_handled());
        assert_eq!(doc.html(), "<p>x</p>");
        assert_eq!(doc.lock().revision(), 0);
    }

    #[tokio::test]
    async fn test_paste_without_entity_is_skipped() {
        let storage = Arc::new(FakeStorage::default());
        let incomplete = Some(EntityRef::new("project", " "));
        for entity in [None, incomplete] {
            let mediator = MediaMediator::new(storage.clone(), entity);
            let doc = document("<p>x</p>");
            let outcome = mediator
                .paste(&doc, &PasteEvent::new(vec![ClipboardItem::file(png("a.png"))]))
                .await;
            assert_eq!(outcome, PasteOutcome::Skipped);
        }
        assert!(storage.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploading_flag_tracks_in_flight_uploads() {
        let storage = Arc::new(FakeStorage {
            latency: Duration::from_millis(200),
            ..Default::default()
        });
        let mediator = Arc::new(MediaMediator::new(storage, project()));
        let doc = document("");

        let task = {
            let mediator = mediator.clone();
            let doc = doc.clone();
            tokio::spawn(async move {
                mediator
                    .paste(&doc, &PasteEvent::new(vec![ClipboardItem::file(png("a.png"))]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mediator.is_uploading());

        assert!(task.await.unwrap().changed_document());
        assert!(!mediator.is_uploading());
    }

    #[test]
    fn test_insert_from_library_needs_no_upload() {
        let storage = Arc::new(FakeStorage::default());
        let mediator = MediaMediator::new(storage.clone(), None);
        let doc = document("<p>x</p>");

        mediator
            .insert_from_library(&doc, &UploadedFile::new("https://cdn/lib.png", "lib/lib.png"))
            .unwrap();

        assert_eq!(html::file_paths(&doc.html()), vec!["lib/lib.png"]);
        assert!(storage.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_replaces_selected_image() {
        let storage = Arc::new(FakeStorage::default());
        let mediator = MediaMediator::new(storage.clone(), project())
            .with_surface(Arc::new(FixedSurface(Some(png("hull-edited.png")))));
        let doc = document(r#"<p>x</p><img src="https://cdn/old" data-file-path="boats/hull.png">"#);
        doc.lock().select_image(0).unwrap();

        let outcome = mediator.edit_selected_image(&doc).await.unwrap();

        assert!(matches!(outcome, EditOutcome::Replaced(_)));
        assert_eq!(
            html::file_paths(&doc.html()),
            vec!["project/42/1-hull-edited.png"]
        );
        assert_eq!(storage.uploads.lock().unwrap()[0].2, FileKind::Image);
    }

    #[tokio::test]
    async fn test_cancelled_edit_changes_nothing() {
        let storage = Arc::new(FakeStorage::default());
        let mediator = MediaMediator::new(storage.clone(), project())
            .with_surface(Arc::new(FixedSurface(None)));
        let original = r#"<img src="https://cdn/old" data-file-path="boats/hull.png">"#;
        let doc = document(original);
        doc.lock().select_image(0).unwrap();

        let outcome = mediator.edit_selected_image(&doc).await.unwrap();

        assert_eq!(outcome, EditOutcome::Cancelled);
        assert!(!outcome.changed_document());
        assert_eq!(doc.html(), original);
        assert!(storage.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_requires_selection_and_surface() {
        let without_surface = MediaMediator::new(Arc::new(FakeStorage::default()), project());
        let doc = document(r#"<img data-file-path="a.png">"#);
        assert!(matches!(
            without_surface.edit_selected_image(&doc).await,
            Err(EditorError::EditingUnavailable)
        ));

        let mediator = MediaMediator::new(Arc::new(FakeStorage::default()), project())
            .with_surface(Arc::new(FixedSurface(Some(png("x.png")))));
        assert!(matches!(
            mediator.edit_selected_image(&doc).await,
            Err(EditorError::NoImageSelected)
        ));
    }

    #[tokio::test]
    async fn test_failed_edit_upload_keeps_original() {
        let storage = Arc::new(FakeStorage {
            fail_with: Some(RemoteError::new("timeout")),
            ..Default::default()
        });
        let mediator = MediaMediator::new(storage, project())
            .with_surface(Arc::new(FixedSurface(Some(png("x.png")))));
        let original = r#"<img src="https://cdn/old" data-file-path="boats/hull.png">"#;
        let doc = document(original);
        doc.lock().select_image(0).unwrap();

        let outcome = mediator.edit_selected_image(&doc).await.unwrap();

        assert_eq!(outcome, EditOutcome::Failed("timeout".to_string()));
        assert_eq!(doc.html(), original);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_finishing_after_shutdown_is_not_inserted() {
        let storage = Arc::new(FakeStorage {
            latency: Duration::from_millis(200),
            ..Default::default()
        });
        let liveness = Liveness::new();
        let mediator = Arc::new(
            MediaMediator::new(storage.clone(), project()).with_liveness(liveness.clone()),
        );
        let doc = document("<p>x</p>");

        let task = {
            let mediator = mediator.clone();
            let doc = doc.clone();
            tokio::spawn(async move {
                mediator
                    .paste(&doc, &PasteEvent::new(vec![ClipboardItem::file(png("a.png"))]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        liveness.shut_down();

        assert_eq!(task.await.unwrap(), PasteOutcome::Skipped);
        assert_eq!(storage.uploads.lock().unwrap().len(), 1);
        assert_eq!(doc.html(), "<p>x</p>");
        assert!(!mediator.is_uploading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_of_pathless_image_does_not_replace_a_different_one() {
        let storage = Arc::new(FakeStorage {
            latency: Duration::from_millis(200),
            ..Default::default()
        });
        let mediator = Arc::new(
            MediaMediator::new(storage, project())
                .with_surface(Arc::new(FixedSurface(Some(png("edited.png"))))),
        );
        let doc = document(r#"<img src="blob:one"><img src="blob:two">"#);
        doc.lock().select_image(0).unwrap();

        let task = {
            let mediator = mediator.clone();
            let doc = doc.clone();
            tokio::spawn(async move { mediator.edit_selected_image(&doc).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let mut doc = doc.lock();
            doc.delete_selected_image().unwrap();
            doc.select_image(0).unwrap();
        }

        let outcome = task.await.unwrap().unwrap();

        assert!(matches!(outcome, EditOutcome::Inserted(_)));
        let html = doc.html();
        assert!(html.starts_with(r#"<img src="blob:two">"#));
        assert_eq!(html::file_paths(&html), vec!["project/42/1-edited.png"]);
    }
}
