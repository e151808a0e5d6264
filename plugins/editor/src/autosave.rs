//! Debounced persistence of the live document
//!
//! The controller tracks the live content, the last successfully saved
//! snapshot and a save status. Edits restart an autosave timer; a save moves
//! the status through `saving` to `saved` (reverting to `idle` shortly
//! after) or `error`.

use crate::timer::{Liveness, Timer};
use async_trait::async_trait;
use mizzen_core::{EditorConfig, EditorEvent, EventEmitter, RemoteError, Result, SaveStatus};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex as AsyncMutex};
use uuid::Uuid;

/// Message shown when a failed save carries no detail
pub const GENERIC_SAVE_ERROR: &str = "Failed to save content";

/// Remote persistence of document content
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self, content: &str) -> std::result::Result<(), RemoteError>;
}

/// Snapshot of the autosave state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutosaveStatus {
    pub status: SaveStatus,
    /// Error message of the last failed save
    pub message: Option<String>,
    pub has_changes: bool,
    /// Whether edits schedule saves on their own
    pub enabled: bool,
    pub timer_pending: bool,
    pub last_saved_at: Option<SystemTime>,
}

impl AutosaveStatus {
    /// Whether a manual save makes sense right now
    pub fn can_save(&self) -> bool {
        self.has_changes && self.status != SaveStatus::Saving
    }
}

#[derive(Debug)]
struct AutosaveState {
    content: String,
    saved: String,
    has_changes: bool,
    status: SaveStatus,
    message: Option<String>,
    autosave_timer: Option<Timer>,
    reset_timer: Option<Timer>,
    last_saved_at: Option<SystemTime>,
    /// Bumped by every save; stale revert timers compare against it
    save_generation: u64,
    saves: u64,
}

struct AutosaveInner {
    persistence: Option<Arc<dyn Persistence>>,
    delay: Duration,
    reset_delay: Duration,
    state: Mutex<AutosaveState>,
    status_tx: watch::Sender<SaveStatus>,
    liveness: Liveness,
    events: EventEmitter,
    document_id: Uuid,
    /// Held for the duration of a save so completions land in order
    save_turn: AsyncMutex<()>,
}

impl AutosaveInner {
    fn state(&self) -> MutexGuard<'_, AutosaveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enabled(&self) -> bool {
        !self.delay.is_zero() && self.persistence.is_some()
    }

    fn set_status(&self, state: &mut AutosaveState, status: SaveStatus, message: Option<String>) {
        let changed = state.status != status || state.message != message;
        state.status = status;
        state.message = message.clone();
        if changed {
            self.status_tx.send_replace(status);
            self.events.emit(EditorEvent::save_status_changed(
                self.document_id,
                status,
                message,
            ));
        }
    }
}

/// Autosave state machine for one document
pub struct AutosaveController {
    inner: Arc<AutosaveInner>,
}

impl AutosaveController {
    pub fn new(
        initial: impl Into<String>,
        persistence: Option<Arc<dyn Persistence>>,
        config: &EditorConfig,
    ) -> Self {
        Self::with_events(
            initial,
            persistence,
            config,
            Uuid::new_v4(),
            EventEmitter::detached(),
        )
    }

    /// Create a controller that reports status changes for `document_id`
    pub fn with_events(
        initial: impl Into<String>,
        persistence: Option<Arc<dyn Persistence>>,
        config: &EditorConfig,
        document_id: Uuid,
        events: EventEmitter,
    ) -> Self {
        let initial = initial.into();
        let (status_tx, _) = watch::channel(SaveStatus::Idle);

        Self {
            inner: Arc::new(AutosaveInner {
                persistence,
                delay: config.autosave_delay(),
                reset_delay: config.saved_status_reset(),
                state: Mutex::new(AutosaveState {
                    content: initial.clone(),
                    saved: initial,
                    has_changes: false,
                    status: SaveStatus::Idle,
                    message: None,
                    autosave_timer: None,
                    reset_timer: None,
                    last_saved_at: None,
                    save_generation: 0,
                    saves: 0,
                }),
                status_tx,
                liveness: Liveness::new(),
                events,
                document_id,
                save_turn: AsyncMutex::new(()),
            }),
        }
    }

    /// Record a change of the live content
    pub fn on_content_change(&self, content: impl Into<String>) {
        if !self.inner.liveness.is_alive() {
            return;
        }

        let content = content.into();
        let mut state = self.inner.state();

        if let Some(timer) = state.autosave_timer.take() {
            timer.cancel();
        }

        if content == state.saved {
            state.content = content;
            state.has_changes = false;
            return;
        }

        state.content = content.clone();
        state.has_changes = true;
        if let Some(timer) = state.reset_timer.take() {
            timer.cancel();
        }
        self.inner.set_status(&mut state, SaveStatus::Idle, None);

        if self.inner.enabled() {
            let inner = self.inner.clone();
            state.autosave_timer = Some(Timer::start(self.inner.delay, move || async move {
                tracing::debug!("Autosave timer fired");
                if let Err(e) = Self::run_save(inner, content).await {
                    tracing::debug!("Autosave did not complete: {}", e);
                }
            }));
        }
    }

    /// Save the live content now, cancelling any pending autosave
    pub async fn manual_save(&self) -> Result<()> {
        let content = {
            let mut state = self.inner.state();
            if let Some(timer) = state.autosave_timer.take() {
                timer.cancel();
            }
            state.content.clone()
        };
        Self::run_save(self.inner.clone(), content).await
    }

    /// Save only when there are unsaved changes; returns whether it saved
    pub async fn flush(&self) -> Result<bool> {
        if self.inner.persistence.is_none() || !self.has_changes() {
            return Ok(false);
        }
        self.manual_save().await?;
        Ok(true)
    }

    async fn run_save(inner: Arc<AutosaveInner>, content: String) -> Result<()> {
        let Some(persistence) = inner.persistence.clone() else {
            tracing::debug!("No persistence configured, skipping save");
            return Ok(());
        };

        let _turn = match inner.save_turn.try_lock() {
            Ok(turn) => turn,
            Err(_) => {
                tracing::debug!("Waiting for the previous save to finish");
                let turn = inner.save_turn.lock().await;
                if inner.state().saved == content {
                    tracing::debug!("Content already saved, skipping save");
                    return Ok(());
                }
                turn
            }
        };

        let generation = {
            let mut state = inner.state();
            if !inner.liveness.is_alive() {
                return Ok(());
            }
            if let Some(timer) = state.reset_timer.take() {
                timer.cancel();
            }
            state.save_generation += 1;
            state.saves += 1;
            inner.set_status(&mut state, SaveStatus::Saving, None);
            state.save_generation
        };

        let result = persistence.save(&content).await;

        if !inner.liveness.is_alive() {
            tracing::debug!("Save finished after teardown, ignoring result");
            return result.map_err(Into::into);
        }

        let mut state = inner.state();
        match result {
            Ok(()) => {
                state.has_changes = state.content != content;
                state.saved = content;
                state.last_saved_at = Some(SystemTime::now());
                inner.set_status(&mut state, SaveStatus::Saved, None);
                tracing::info!("Saved document {}", inner.document_id);

                let revert = inner.clone();
                state.reset_timer = Some(Timer::start(inner.reset_delay, move || async move {
                    let mut state = revert.state();
                    if state.save_generation == generation && state.status == SaveStatus::Saved {
                        revert.set_status(&mut state, SaveStatus::Idle, None);
                    }
                }));
                Ok(())
            }
            Err(e) => {
                let message = e.detail().unwrap_or(GENERIC_SAVE_ERROR).to_string();
                tracing::error!("Failed to save document {}: {}", inner.document_id, e);
                inner.set_status(&mut state, SaveStatus::Error, Some(message));
                Err(e.into())
            }
        }
    }

    /// Adopt an externally supplied value when no local edits are pending
    ///
    /// Returns whether the value was adopted.
    pub fn sync_external(&self, value: impl Into<String>) -> bool {
        if !self.inner.liveness.is_alive() {
            return false;
        }

        let value = value.into();
        let mut state = self.inner.state();
        if state.has_changes {
            if value != state.saved {
                tracing::debug!("Ignoring external value while local edits are pending");
            }
            return false;
        }
        if value == state.saved {
            return false;
        }

        state.content = value.clone();
        state.saved = value;
        tracing::debug!("Adopted external value for document {}", self.inner.document_id);
        true
    }

    pub fn content(&self) -> String {
        self.inner.state().content.clone()
    }

    /// The last successfully saved (or adopted) content
    pub fn saved_content(&self) -> String {
        self.inner.state().saved.clone()
    }

    pub fn has_changes(&self) -> bool {
        self.inner.state().has_changes
    }

    pub fn save_status(&self) -> SaveStatus {
        self.inner.state().status
    }

    /// Number of saves started so far
    pub fn save_count(&self) -> u64 {
        self.inner.state().saves
    }

    pub fn status(&self) -> AutosaveStatus {
        let state = self.inner.state();
        AutosaveStatus {
            status: state.status,
            message: state.message.clone(),
            has_changes: state.has_changes,
            enabled: self.inner.enabled(),
            timer_pending: state
                .autosave_timer
                .as_ref()
                .is_some_and(Timer::is_pending),
            last_saved_at: state.last_saved_at,
        }
    }

    /// Receiver of save status transitions
    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Cancel all timers; later continuations do nothing
    pub fn shutdown(&self) {
        if !self.inner.liveness.shut_down() {
            return;
        }
        let mut state = self.inner.state();
        if let Some(timer) = state.autosave_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = state.reset_timer.take() {
            timer.cancel();
        }
        tracing::debug!("Autosave controller shut down");
    }
}

impl Drop for AutosaveController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AutosaveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutosaveController")
            .field("document_id", &self.inner.document_id)
            .field("status", &self.status())
            .finish()
    }
}
