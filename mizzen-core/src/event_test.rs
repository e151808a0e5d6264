#[cfg(test)]
mod tests {
    use crate::error::{ErrorSeverity, MizzenError, Result};
    use crate::event::{
        serialization, EditorEvent, EventBus, EventEmitter, EventHandler, InMemoryEventBus,
        SaveStatus,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle_event(&self, event: &EditorEvent) -> Result<()> {
            self.seen.lock().await.push(event.event_type().to_string());
            Ok(())
        }

        fn handler_name(&self) -> &str {
            "RecordingHandler"
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle_event(&self, _event: &EditorEvent) -> Result<()> {
            Err(MizzenError::event_bus("handler exploded"))
        }
    }

    #[test]
    fn test_event_creation_helpers() {
        let id = Uuid::new_v4();
        let resolved = EditorEvent::content_resolved(id, 3, Duration::from_millis(12));
        assert_eq!(resolved.event_type(), "content_resolved");
        assert_eq!(resolved.document_id(), Some(id));
        assert!(!resolved.is_failure());

        let failed_save =
            EditorEvent::save_status_changed(id, SaveStatus::Error, Some("quota exceeded".into()));
        assert!(failed_save.is_failure());
        assert!(failed_save.description().contains("quota exceeded"));

        let error = EditorEvent::error("resolver", "offline", ErrorSeverity::Low);
        assert_eq!(error.document_id(), None);
        assert!(error.is_failure());
    }

    #[test]
    fn test_event_serialization() {
        let event = EditorEvent::media_failed(Uuid::new_v4(), "paste", "upload rejected");

        let json = serialization::serialize_event(&event).unwrap();
        assert!(json.contains("upload rejected"));

        let deserialized = serialization::deserialize_event(&json).unwrap();
        assert_eq!(deserialized.event_type(), event.event_type());
        assert_eq!(deserialized.description(), event.description());

        let mut buffer = Vec::new();
        serialization::write_event(&mut buffer, &event).unwrap();
        assert!(buffer.ends_with(b"\n"));
    }

    #[test]
    fn test_save_status_serializes_lowercase() {
        let json = serde_json::to_string(&SaveStatus::Saving).unwrap();
        assert_eq!(json, "\"saving\"");
        assert_eq!(SaveStatus::default(), SaveStatus::Idle);
    }

    #[test]
    fn test_event_log_formatting() {
        let event = EditorEvent::media_inserted(Uuid::new_v4(), "projects/1/photo.png");
        let line = serialization::format_event_for_log(&event);
        assert!(line.contains("MEDIA_INSERTED"));
        assert!(line.contains("projects/1/photo.png"));
    }

    #[tokio::test]
    async fn test_bus_routes_to_all_handlers() {
        let bus = InMemoryEventBus::new();
        let recorder = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });

        let id = bus.subscribe(recorder.clone()).await.unwrap();
        bus.subscribe(Arc::new(FailingHandler)).await.unwrap();
        assert_eq!(bus.subscription_count().await, 2);

        bus.publish(EditorEvent::document_synced(Uuid::new_v4(), "refresh_urls"))
            .await
            .unwrap();
        assert_eq!(*recorder.seen.lock().await, vec!["document_synced"]);

        bus.unsubscribe(id).await.unwrap();
        assert_eq!(bus.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_emitter_publishes_when_attached() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(recorder.clone()).await.unwrap();

        let emitter = EventEmitter::new(bus);
        emitter
            .publish(EditorEvent::media_inserted(Uuid::new_v4(), "a.png"))
            .await;
        assert_eq!(recorder.seen.lock().await.len(), 1);

        let detached = EventEmitter::detached();
        assert!(!detached.is_attached());
        detached.publish(EditorEvent::media_inserted(Uuid::new_v4(), "b.png")).await;
        assert_eq!(recorder.seen.lock().await.len(), 1);
    }

    /// Records save statuses, taking longest over the first one
    struct SlowStatusHandler {
        statuses: Mutex<Vec<SaveStatus>>,
    }

    #[async_trait]
    impl EventHandler for SlowStatusHandler {
        async fn handle_event(&self, event: &EditorEvent) -> Result<()> {
            if let EditorEvent::SaveStatusChanged { status, .. } = event {
                if *status == SaveStatus::Saving {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                self.statuses.lock().await.push(*status);
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_emitted_events_keep_their_order() {
        let bus = Arc::new(InMemoryEventBus::new());
        let handler = Arc::new(SlowStatusHandler {
            statuses: Mutex::new(Vec::new()),
        });
        bus.subscribe(handler.clone()).await.unwrap();

        let emitter = EventEmitter::new(bus);
        let id = Uuid::new_v4();
        for status in [SaveStatus::Saving, SaveStatus::Saved, SaveStatus::Idle] {
            emitter.emit(EditorEvent::save_status_changed(id, status, None));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.statuses.lock().await.len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            *handler.statuses.lock().await,
            vec![SaveStatus::Saving, SaveStatus::Saved, SaveStatus::Idle]
        );
    }
}
