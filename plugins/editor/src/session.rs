//! Content editor sessions
//!
//! A [`ContentEditor`] wires the pipeline for one document: raw content is
//! resolved through the debounced scheduler, resolved values are pushed into
//! the live document by the synchronizer task, live edits feed the autosave
//! controller, and media flows splice new references into the document.

use crate::autosave::{AutosaveController, AutosaveStatus, Persistence};
use crate::document::{EditableDocument, ImageSize, Selection, SharedDocument};
use crate::file_ref::{FileReferenceResolver, ResolutionCache, UrlResolver};
use crate::media::{
    EditOutcome, EntityRef, FileStorage, ImageEditingSurface, MediaMediator, PasteEvent,
    PasteOutcome, UploadedFile,
};
use crate::scheduler::ResolutionScheduler;
use crate::synchronizer::{DocumentSynchronizer, SyncDecision};
use crate::timer::Liveness;
use crate::EditorError;
use mizzen_core::{EditorConfig, EditorEvent, EventEmitter, Result, SaveStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Whether the editor accepts edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    Edit,
    View,
}

impl EditMode {
    pub fn toggled(&self) -> Self {
        match self {
            EditMode::Edit => EditMode::View,
            EditMode::View => EditMode::Edit,
        }
    }
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditMode::Edit => write!(f, "edit"),
            EditMode::View => write!(f, "view"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`ContentEditor`]
pub struct ContentEditorBuilder {
    resolver: Arc<dyn UrlResolver>,
    config: EditorConfig,
    cache: Option<ResolutionCache>,
    persistence: Option<Arc<dyn Persistence>>,
    storage: Option<Arc<dyn FileStorage>>,
    surface: Option<Arc<dyn ImageEditingSurface>>,
    entity: Option<EntityRef>,
    events: EventEmitter,
    mode: Option<EditMode>,
    id: Option<Uuid>,
}

impl ContentEditorBuilder {
    pub fn config(mut self, config: &EditorConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Share a resolution cache with other editors
    pub fn cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn FileStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn surface(mut self, surface: Arc<dyn ImageEditingSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Override the configured initial mode
    pub fn mode(mut self, mode: EditMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Start the editor on `initial` raw content
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self, initial: impl Into<String>) -> ContentEditor {
        let initial = initial.into();
        let id = self.id.unwrap_or_else(Uuid::new_v4);
        let mode = self.mode.unwrap_or(if self.config.initial_edit_mode {
            EditMode::Edit
        } else {
            EditMode::View
        });

        let resolver = FileReferenceResolver::with_cache(self.resolver, self.cache.unwrap_or_default());
        let scheduler = ResolutionScheduler::with_events(
            resolver,
            self.config.resolve_debounce(),
            id,
            self.events.clone(),
        );
        let autosave = AutosaveController::with_events(
            initial.clone(),
            self.persistence,
            &self.config,
            id,
            self.events.clone(),
        );
        let liveness = Liveness::new();
        let media = self.storage.map(|storage| {
            let mediator = MediaMediator::new(storage, self.entity.clone())
                .with_events(id, self.events.clone())
                .with_liveness(liveness.clone());
            match self.surface {
                Some(surface) => mediator.with_surface(surface),
                None => mediator,
            }
        });

        let document = SharedDocument::new(EditableDocument::new(initial.clone()));
        let synchronizer = Arc::new(Mutex::new(DocumentSynchronizer::new()));

        let sync_task = spawn_sync_task(
            id,
            scheduler.subscribe(),
            document.clone(),
            synchronizer.clone(),
            liveness.clone(),
            self.events.clone(),
        );

        scheduler.submit(initial);
        tracing::info!("Opened content editor {} in {} mode", id, mode);

        ContentEditor {
            id,
            document,
            scheduler,
            synchronizer,
            autosave,
            media,
            entity: self.entity,
            mode: Mutex::new(mode),
            sync_task: Mutex::new(Some(sync_task)),
            liveness,
        }
    }
}

fn spawn_sync_task(
    id: Uuid,
    mut resolved: watch::Receiver<String>,
    document: SharedDocument,
    synchronizer: Arc<Mutex<DocumentSynchronizer>>,
    liveness: Liveness,
    events: EventEmitter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while resolved.changed().await.is_ok() {
            if !liveness.is_alive() {
                break;
            }
            let value = resolved.borrow_and_update().clone();
            let decision = {
                let mut doc = document.lock();
                let mut sync = lock(&synchronizer);
                sync.apply(&mut doc, &value)
            };
            if decision != SyncDecision::Skipped {
                events.emit(EditorEvent::document_synced(id, decision.as_str()));
            }
        }
        tracing::debug!("Sync task for editor {} finished", id);
    })
}

/// One document's editing pipeline
pub struct ContentEditor {
    id: Uuid,
    document: SharedDocument,
    scheduler: ResolutionScheduler,
    synchronizer: Arc<Mutex<DocumentSynchronizer>>,
    autosave: AutosaveController,
    media: Option<MediaMediator>,
    entity: Option<EntityRef>,
    mode: Mutex<EditMode>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    liveness: Liveness,
}

impl ContentEditor {
    pub fn builder(resolver: Arc<dyn UrlResolver>) -> ContentEditorBuilder {
        ContentEditorBuilder {
            resolver,
            config: EditorConfig::default(),
            cache: None,
            persistence: None,
            storage: None,
            surface: None,
            entity: None,
            events: EventEmitter::detached(),
            mode: None,
            id: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        self.entity.as_ref()
    }

    fn ensure_open(&self) -> std::result::Result<(), EditorError> {
        if self.liveness.is_alive() {
            Ok(())
        } else {
            Err(EditorError::DocumentClosed)
        }
    }

    fn ensure_editable(&self) -> std::result::Result<(), EditorError> {
        self.ensure_open()?;
        if self.mode() == EditMode::View {
            return Err(EditorError::ReadOnly);
        }
        Ok(())
    }

    /// Route a local document change to autosave and resolution
    fn local_change(&self) {
        let html = self.document.html();
        lock(&self.synchronizer).mark_initialized();
        self.autosave.on_content_change(html.clone());
        self.scheduler.submit(html);
    }

    /// Apply a user edit; the caret ends up at the end of the content
    pub fn edit(&self, html: impl Into<String>) -> Result<()> {
        let html = html.into();
        let caret = html.len();
        self.edit_at(html, caret)
    }

    /// Apply a user edit leaving the caret at `caret`
    pub fn edit_at(&self, html: impl Into<String>, caret: usize) -> Result<()> {
        self.ensure_editable()?;
        self.document.lock().apply_edit(html, caret)?;
        self.local_change();
        Ok(())
    }

    /// Offer a new externally supplied value
    ///
    /// The value is adopted only while no local edits are pending. Returns
    /// whether it was adopted.
    pub fn set_external_value(&self, value: impl Into<String>) -> Result<bool> {
        self.ensure_open()?;
        let value = value.into();
        if !self.autosave.sync_external(value.clone()) {
            return Ok(false);
        }

        self.document.lock().set_content(value.clone());
        lock(&self.synchronizer).reset();
        self.scheduler.submit(value);
        tracing::debug!("Editor {} adopted an external value", self.id);
        Ok(true)
    }

    /// Save now, cancelling any pending autosave
    pub async fn manual_save(&self) -> Result<()> {
        self.ensure_open()?;
        self.autosave.manual_save().await
    }

    /// Switch between edit and view mode
    ///
    /// Leaving edit mode with unsaved changes saves first; if that save
    /// fails the editor stays in edit mode and the error is returned.
    pub async fn toggle_edit_mode(&self) -> Result<EditMode> {
        self.ensure_open()?;
        if self.mode() == EditMode::Edit && self.autosave.flush().await? {
            tracing::debug!("Saved pending changes before leaving edit mode");
        }

        let mut mode = lock(&self.mode);
        *mode = mode.toggled();
        tracing::info!("Editor {} switched to {} mode", self.id, *mode);
        Ok(*mode)
    }

    pub fn mode(&self) -> EditMode {
        *lock(&self.mode)
    }

    pub fn place_caret(&self, offset: usize) -> Result<()> {
        self.ensure_open()?;
        Ok(self.document.lock().place_caret(offset)?)
    }

    pub fn select_image(&self, index: usize) -> Result<()> {
        self.ensure_open()?;
        Ok(self.document.lock().select_image(index)?)
    }

    pub fn selection(&self) -> Selection {
        self.document.lock().selection()
    }

    /// Handle a paste; pastes without images are left to default handling
    pub async fn paste(&self, event: &PasteEvent) -> Result<PasteOutcome> {
        self.ensure_editable()?;
        let Some(media) = &self.media else {
            return Ok(PasteOutcome::NotHandled);
        };

        let outcome = media.paste(&self.document, event).await;
        if outcome.changed_document() {
            self.local_change();
        }
        Ok(outcome)
    }

    /// Insert a file picked from the media library
    pub fn insert_from_library(&self, file: &UploadedFile) -> Result<()> {
        self.ensure_editable()?;
        match &self.media {
            Some(media) => {
                media.insert_from_library(&self.document, file)?;
            }
            None => {
                self.document
                    .lock()
                    .insert_image(&file.signed_url, &file.file_path)?;
            }
        }
        self.local_change();
        Ok(())
    }

    /// Edit the selected image in place
    pub async fn edit_selected_image(&self) -> Result<EditOutcome> {
        self.ensure_editable()?;
        let media = self.media.as_ref().ok_or(EditorError::EditingUnavailable)?;

        let outcome = media.edit_selected_image(&self.document).await?;
        if outcome.changed_document() {
            self.local_change();
        }
        Ok(outcome)
    }

    pub fn resize_selected_image(&self, size: ImageSize) -> Result<()> {
        self.ensure_editable()?;
        self.document.lock().resize_selected_image(size)?;
        self.local_change();
        Ok(())
    }

    pub fn delete_selected_image(&self) -> Result<()> {
        self.ensure_editable()?;
        let removed = self.document.lock().delete_selected_image()?;
        tracing::info!("Removed image {}", removed.name);
        self.local_change();
        Ok(())
    }

    /// Link `range` to `href`; a blank `href` unlinks the text at `range.start`
    pub fn set_link(&self, range: Range<usize>, href: &str) -> Result<()> {
        self.ensure_editable()?;
        self.document.lock().set_link(range, href)?;
        self.local_change();
        Ok(())
    }

    pub fn remove_link(&self) -> Result<bool> {
        self.ensure_editable()?;
        let removed = self.document.lock().remove_link();
        if removed {
            self.local_change();
        }
        Ok(removed)
    }

    pub fn link_at_caret(&self) -> Option<String> {
        self.document.lock().link_at_caret()
    }

    /// Markup currently shown in the live document
    pub fn content(&self) -> String {
        self.document.html()
    }

    /// Latest resolved value published by the scheduler
    pub fn resolved(&self) -> String {
        self.scheduler.current()
    }

    pub fn subscribe_resolved(&self) -> watch::Receiver<String> {
        self.scheduler.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.autosave.subscribe()
    }

    pub fn status(&self) -> AutosaveStatus {
        self.autosave.status()
    }

    pub fn has_changes(&self) -> bool {
        self.autosave.has_changes()
    }

    pub fn is_uploading(&self) -> bool {
        self.media.as_ref().is_some_and(MediaMediator::is_uploading)
    }

    pub fn resolution_cache(&self) -> &ResolutionCache {
        self.scheduler.resolver().cache()
    }

    pub fn is_open(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Stop timers and the sync task; the editor rejects further work
    pub fn shutdown(&self) {
        if !self.liveness.shut_down() {
            return;
        }
        self.scheduler.shutdown();
        self.autosave.shutdown();
        if let Some(task) = lock(&self.sync_task).take() {
            task.abort();
        }
        tracing::info!("Closed content editor {}", self.id);
    }
}

impl Drop for ContentEditor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ContentEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentEditor")
            .field("id", &self.id)
            .field("mode", &self.mode())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_ref::StaticUrlResolver;
    use mizzen_core::MizzenError;
    use std::collections::HashMap;
    use std::time::Duration;

    fn resolver() -> Arc<StaticUrlResolver> {
        Arc::new(StaticUrlResolver::new(HashMap::from([(
            "a.png".to_string(),
            "https://cdn/a.png".to_string(),
        )])))
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_content_is_resolved_into_document() {
        let editor = ContentEditor::builder(resolver()).build(r#"<img data-file-path="a.png">"#);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(
            editor.content(),
            r#"<img data-file-path="a.png" src="https://cdn/a.png">"#
        );
        assert_eq!(editor.resolved(), editor.content());
        assert!(!editor.has_changes());
        assert_eq!(editor.resolution_cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_mode_rejects_edits() {
        let editor = ContentEditor::builder(resolver()).build("<p>x</p>");
        assert_eq!(editor.mode(), EditMode::View);

        let result = editor.edit("<p>y</p>");
        assert!(matches!(result, Err(MizzenError::Document(_))));
        assert_eq!(editor.content(), "<p>x</p>");

        assert_eq!(editor.toggle_edit_mode().await.unwrap(), EditMode::Edit);
        editor.edit("<p>y</p>").unwrap();
        assert!(editor.has_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_library_insert_without_storage() {
        let editor = ContentEditor::builder(resolver())
            .mode(EditMode::Edit)
            .build("<p>x</p>");

        editor
            .insert_from_library(&UploadedFile::new("https://cdn/lib.png", "lib.png"))
            .unwrap();

        assert!(editor.content().ends_with(r#"<img src="https://cdn/lib.png" data-file-path="lib.png">"#));
        assert!(editor.has_changes());
        assert!(matches!(
            editor.edit_selected_image().await,
            Err(MizzenError::Media(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_editor() {
        let editor = ContentEditor::builder(resolver())
            .mode(EditMode::Edit)
            .build("<p>x</p>");

        editor.shutdown();

        assert!(!editor.is_open());
        assert!(editor.edit("<p>y</p>").is_err());
        assert!(editor.manual_save().await.is_err());
        editor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_links_are_user_edits() {
        let editor = ContentEditor::builder(resolver()).build("<p>Read the docs</p>");
        assert!(editor.set_link(12..16, "https://docs.rs").is_err());

        editor.toggle_edit_mode().await.unwrap();
        editor.set_link(12..16, "https://docs.rs").unwrap();
        assert!(editor.has_changes());
        assert_eq!(editor.link_at_caret(), None);

        editor.place_caret(editor.content().find("docs<").unwrap()).unwrap();
        assert_eq!(editor.link_at_caret().as_deref(), Some("https://docs.rs"));
        assert!(editor.remove_link().unwrap());
        assert_eq!(editor.content(), "<p>Read the docs</p>");
        assert!(!editor.has_changes());
    }

    #[test]
    fn test_edit_mode_toggles() {
        assert_eq!(EditMode::Edit.toggled(), EditMode::View);
        assert_eq!(EditMode::View.to_string(), "view");
    }
}
