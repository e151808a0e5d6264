//! Event system for observing the content pipeline

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::{ErrorSeverity, Result};

/// Event serialization utilities for persistence and debugging
pub mod serialization {
    use super::*;
    use std::io::Write;

    /// Serialize an event to JSON string
    pub fn serialize_event(event: &EditorEvent) -> Result<String> {
        serde_json::to_string(event).map_err(crate::error::MizzenError::Json)
    }

    /// Deserialize an event from JSON string
    pub fn deserialize_event(json: &str) -> Result<EditorEvent> {
        serde_json::from_str(json).map_err(crate::error::MizzenError::Json)
    }

    /// Write event to a writer as one JSON line
    pub fn write_event<W: Write>(writer: &mut W, event: &EditorEvent) -> Result<()> {
        let json = serialize_event(event)?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Format event for logging with timestamp
    pub fn format_event_for_log(event: &EditorEvent) -> String {
        let timestamp = event
            .timestamp()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        format!(
            "[{}] {}: {}",
            timestamp,
            event.event_type().to_uppercase(),
            event.description()
        )
    }
}

/// Save status as reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

impl std::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveStatus::Idle => write!(f, "idle"),
            SaveStatus::Saving => write!(f, "saving"),
            SaveStatus::Saved => write!(f, "saved"),
            SaveStatus::Error => write!(f, "error"),
        }
    }
}

/// Events emitted while a document moves through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EditorEvent {
    /// A resolution pass finished and published its output
    ContentResolved {
        document_id: Uuid,
        paths: usize,
        duration: Duration,
        timestamp: SystemTime,
    },
    /// The synchronizer evaluated a resolved value against the live document
    DocumentSynced {
        document_id: Uuid,
        decision: String,
        timestamp: SystemTime,
    },
    /// The autosave controller changed state
    SaveStatusChanged {
        document_id: Uuid,
        status: SaveStatus,
        message: Option<String>,
        timestamp: SystemTime,
    },
    /// A file reference was spliced into the document
    MediaInserted {
        document_id: Uuid,
        file_path: String,
        timestamp: SystemTime,
    },
    /// A media operation failed and left the document unchanged
    MediaFailed {
        document_id: Uuid,
        operation: String,
        message: String,
        timestamp: SystemTime,
    },
    /// Pipeline error that has no more specific event
    Error {
        source: String,
        message: String,
        severity: ErrorSeverity,
        timestamp: SystemTime,
    },
}

impl EditorEvent {
    pub fn content_resolved(document_id: Uuid, paths: usize, duration: Duration) -> Self {
        Self::ContentResolved {
            document_id,
            paths,
            duration,
            timestamp: SystemTime::now(),
        }
    }

    pub fn document_synced<S: Into<String>>(document_id: Uuid, decision: S) -> Self {
        Self::DocumentSynced {
            document_id,
            decision: decision.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn save_status_changed(
        document_id: Uuid,
        status: SaveStatus,
        message: Option<String>,
    ) -> Self {
        Self::SaveStatusChanged {
            document_id,
            status,
            message,
            timestamp: SystemTime::now(),
        }
    }

    pub fn media_inserted<S: Into<String>>(document_id: Uuid, file_path: S) -> Self {
        Self::MediaInserted {
            document_id,
            file_path: file_path.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn media_failed<O: Into<String>, M: Into<String>>(
        document_id: Uuid,
        operation: O,
        message: M,
    ) -> Self {
        Self::MediaFailed {
            document_id,
            operation: operation.into(),
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn error<S: Into<String>, M: Into<String>>(
        source: S,
        message: M,
        severity: ErrorSeverity,
    ) -> Self {
        Self::Error {
            source: source.into(),
            message: message.into(),
            severity,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the event type identifier
    pub fn event_type(&self) -> &str {
        match self {
            EditorEvent::ContentResolved { .. } => "content_resolved",
            EditorEvent::DocumentSynced { .. } => "document_synced",
            EditorEvent::SaveStatusChanged { .. } => "save_status_changed",
            EditorEvent::MediaInserted { .. } => "media_inserted",
            EditorEvent::MediaFailed { .. } => "media_failed",
            EditorEvent::Error { .. } => "error",
        }
    }

    /// Get the event timestamp
    pub fn timestamp(&self) -> SystemTime {
        match self {
            EditorEvent::ContentResolved { timestamp, .. }
            | EditorEvent::DocumentSynced { timestamp, .. }
            | EditorEvent::SaveStatusChanged { timestamp, .. }
            | EditorEvent::MediaInserted { timestamp, .. }
            | EditorEvent::MediaFailed { timestamp, .. }
            | EditorEvent::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Document the event belongs to, if any
    pub fn document_id(&self) -> Option<Uuid> {
        match self {
            EditorEvent::ContentResolved { document_id, .. }
            | EditorEvent::DocumentSynced { document_id, .. }
            | EditorEvent::SaveStatusChanged { document_id, .. }
            | EditorEvent::MediaInserted { document_id, .. }
            | EditorEvent::MediaFailed { document_id, .. } => Some(*document_id),
            EditorEvent::Error { .. } => None,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            EditorEvent::ContentResolved {
                document_id,
                paths,
                duration,
                ..
            } => format!(
                "Resolved {} file references for {} in {:?}",
                paths, document_id, duration
            ),
            EditorEvent::DocumentSynced {
                document_id,
                decision,
                ..
            } => format!("Synchronized {}: {}", document_id, decision),
            EditorEvent::SaveStatusChanged {
                document_id,
                status,
                message,
                ..
            } => match message {
                Some(message) => format!("Save status of {} is {} ({})", document_id, status, message),
                None => format!("Save status of {} is {}", document_id, status),
            },
            EditorEvent::MediaInserted {
                document_id,
                file_path,
                ..
            } => format!("Inserted {} into {}", file_path, document_id),
            EditorEvent::MediaFailed {
                document_id,
                operation,
                message,
                ..
            } => format!("{} failed for {}: {}", operation, document_id, message),
            EditorEvent::Error {
                source,
                message,
                severity,
                ..
            } => format!("{} error from {}: {}", severity, source, message),
        }
    }

    /// Check if this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EditorEvent::Error { .. }
                | EditorEvent::MediaFailed { .. }
                | EditorEvent::SaveStatusChanged {
                    status: SaveStatus::Error,
                    ..
                }
        )
    }
}

/// Handler for editor events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an incoming event
    async fn handle_event(&self, event: &EditorEvent) -> Result<()>;

    /// Get handler name for debugging
    fn handler_name(&self) -> &str {
        "UnnamedHandler"
    }
}

/// Event bus for publishing and subscribing to editor events
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to all subscribers
    async fn publish(&self, event: EditorEvent) -> Result<()>;

    /// Subscribe a handler to all events
    async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<SubscriptionId>;

    /// Unsubscribe a handler
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Get the number of active subscriptions
    async fn subscription_count(&self) -> usize;
}

/// Unique identifier for event subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// In-memory implementation of the event bus
pub struct InMemoryEventBus {
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<dyn EventHandler>>>,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: EditorEvent) -> Result<()> {
        let handlers: Vec<Arc<dyn EventHandler>> =
            self.subscriptions.read().await.values().cloned().collect();

        if handlers.is_empty() {
            tracing::trace!("No subscribers for event: {}", event.event_type());
            return Ok(());
        }

        let mut handlers_called = 0;
        for handler in handlers {
            if let Err(e) = handler.handle_event(&event).await {
                tracing::error!(
                    "Handler {} failed to process event {}: {}",
                    handler.handler_name(),
                    event.event_type(),
                    e
                );
            } else {
                handlers_called += 1;
            }
        }

        tracing::debug!(
            "Routed event {} to {} handlers",
            event.event_type(),
            handlers_called
        );
        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<SubscriptionId> {
        let id = SubscriptionId::new();
        tracing::debug!(
            "Created subscription {:?} for handler {}",
            id,
            handler.handler_name()
        );
        self.subscriptions.write().await.insert(id, handler);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if self.subscriptions.write().await.remove(&id).is_some() {
            tracing::debug!("Removed subscription: {:?}", id);
        } else {
            tracing::warn!("Attempted to remove non-existent subscription: {:?}", id);
        }
        Ok(())
    }

    async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

/// Fire-and-forget publisher used from synchronous code paths
///
/// Emitted events go through one queue drained by a single task, so handlers
/// see them in emission order. A detached emitter drops every event.
#[derive(Clone, Default)]
pub struct EventEmitter {
    bus: Option<Arc<dyn EventBus>>,
    queue: Option<mpsc::UnboundedSender<EditorEvent>>,
}

impl EventEmitter {
    /// Attach an emitter to `bus`
    ///
    /// Spawns the draining task, so this must be called inside a tokio
    /// runtime. The task ends once every clone of the emitter is dropped.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel::<EditorEvent>();
        let drain = bus.clone();
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                if let Err(e) = drain.publish(event).await {
                    tracing::warn!("Failed to publish event: {}", e);
                }
            }
        });

        Self {
            bus: Some(bus),
            queue: Some(queue),
        }
    }

    /// An emitter with no bus attached
    pub fn detached() -> Self {
        Self {
            bus: None,
            queue: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.bus.is_some()
    }

    /// Queue an event without waiting for handlers
    pub fn emit(&self, event: EditorEvent) {
        if let Some(queue) = &self.queue {
            if queue.send(event).is_err() {
                tracing::debug!("Event queue closed, dropping event");
            }
        }
    }

    /// Publish and wait for every handler to run
    ///
    /// Bypasses the queue; events emitted earlier may still be pending.
    pub async fn publish(&self, event: EditorEvent) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(event).await {
                tracing::warn!("Failed to publish event: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("attached", &self.is_attached())
            .finish()
    }
}
