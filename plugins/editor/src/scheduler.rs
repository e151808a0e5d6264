//! Debounced resolution of raw content
//!
//! Raw content changes arrive in bursts while the user types. The scheduler
//! waits for a quiet period before running a resolution pass, runs at most
//! one pass at a time, and publishes the resolved markup on a watch channel.

use crate::file_ref::FileReferenceResolver;
use crate::timer::{Liveness, Timer};
use mizzen_core::{EditorEvent, ErrorSeverity, EventEmitter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Default)]
struct SchedulerState {
    /// Input of the most recent pass (or of the last empty submission)
    last_seen: Option<String>,
    in_flight: bool,
    /// Latest input that arrived while a pass was running
    deferred: Option<String>,
    timer: Option<Timer>,
    /// Bumped by every submission that supersedes earlier work
    generation: u64,
    passes: u64,
}

struct SchedulerInner {
    resolver: FileReferenceResolver,
    delay: Duration,
    state: Mutex<SchedulerState>,
    output: watch::Sender<String>,
    liveness: Liveness,
    events: EventEmitter,
    document_id: Uuid,
}

impl SchedulerInner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coalesces raw content changes into resolution passes
pub struct ResolutionScheduler {
    inner: Arc<SchedulerInner>,
}

impl ResolutionScheduler {
    pub fn new(resolver: FileReferenceResolver, delay: Duration) -> Self {
        Self::with_events(resolver, delay, Uuid::new_v4(), EventEmitter::detached())
    }

    /// Create a scheduler that reports finished passes for `document_id`
    pub fn with_events(
        resolver: FileReferenceResolver,
        delay: Duration,
        document_id: Uuid,
        events: EventEmitter,
    ) -> Self {
        let (output, _) = watch::channel(String::new());
        Self {
            inner: Arc::new(SchedulerInner {
                resolver,
                delay,
                state: Mutex::new(SchedulerState::default()),
                output,
                liveness: Liveness::new(),
                events,
                document_id,
            }),
        }
    }

    /// Receiver of published resolved values
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.inner.output.subscribe()
    }

    /// The most recently published resolved value
    pub fn current(&self) -> String {
        self.inner.output.borrow().clone()
    }

    pub fn resolver(&self) -> &FileReferenceResolver {
        &self.inner.resolver
    }

    /// Submit a new raw value
    ///
    /// Identical input is ignored. Input arriving during a pass supersedes
    /// it: the running pass publishes nothing and the new input is
    /// submitted once it finishes. Empty input is published right away.
    pub fn submit(&self, raw: impl Into<String>) {
        Self::submit_inner(&self.inner, raw.into());
    }

    fn submit_inner(inner: &Arc<SchedulerInner>, raw: String) {
        if !inner.liveness.is_alive() {
            return;
        }

        let mut state = inner.state();

        if raw.is_empty() {
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.generation += 1;
            state.deferred = None;
            state.last_seen = Some(String::new());
            drop(state);

            tracing::debug!("Publishing empty content without resolution");
            inner.output.send_if_modified(|current| {
                let changed = !current.is_empty();
                current.clear();
                changed
            });
            return;
        }

        if state.in_flight {
            tracing::debug!("Resolution pass in flight, deferring new input");
            state.generation += 1;
            state.deferred = Some(raw);
            return;
        }

        if state.last_seen.as_deref() == Some(raw.as_str()) {
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.deferred = None;
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        if let Some(previous) = state.timer.take() {
            previous.cancel();
        }

        let pass_inner = inner.clone();
        state.timer = Some(Timer::start(inner.delay, move || {
            Self::run_pass(pass_inner, raw, generation)
        }));
    }

    async fn run_pass(inner: Arc<SchedulerInner>, raw: String, generation: u64) {
        {
            let mut state = inner.state();
            if state.generation != generation || !inner.liveness.is_alive() {
                return;
            }
            state.in_flight = true;
            state.last_seen = Some(raw.clone());
            state.passes += 1;
            state.timer = None;
        }

        let resolution = inner.resolver.resolve(&raw).await;

        let (current, deferred) = {
            let mut state = inner.state();
            state.in_flight = false;
            let current = state.generation == generation && inner.liveness.is_alive();
            if !current && state.last_seen.as_deref() == Some(raw.as_str()) {
                state.last_seen = None;
            }
            (current, state.deferred.take())
        };

        if current {
            if resolution.degraded {
                inner.events.emit(EditorEvent::error(
                    "resolver",
                    format!(
                        "{} file references left unresolved in document {}",
                        resolution.references, inner.document_id
                    ),
                    ErrorSeverity::Low,
                ));
            }
            tracing::debug!(
                "Resolved {} file references in {:?}",
                resolution.references,
                resolution.duration
            );
            inner.events.emit(EditorEvent::content_resolved(
                inner.document_id,
                resolution.references,
                resolution.duration,
            ));
            let html = resolution.html;
            inner.output.send_if_modified(move |published| {
                if *published == html {
                    false
                } else {
                    *published = html;
                    true
                }
            });
        } else {
            tracing::debug!("Discarding superseded resolution pass");
        }

        if let Some(next) = deferred {
            Self::submit_inner(&inner, next);
        }
    }

    /// Whether a quiet-period timer is waiting
    pub fn is_pending(&self) -> bool {
        self.inner
            .state()
            .timer
            .as_ref()
            .is_some_and(Timer::is_pending)
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.state().in_flight
    }

    /// Number of resolution passes started so far
    pub fn passes(&self) -> u64 {
        self.inner.state().passes
    }

    /// Cancel pending work and stop publishing
    pub fn shutdown(&self) {
        if !self.inner.liveness.shut_down() {
            return;
        }
        let mut state = self.inner.state();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.deferred = None;
        state.generation += 1;
        tracing::debug!("Resolution scheduler shut down");
    }
}

impl Drop for ResolutionScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ResolutionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionScheduler")
            .field("delay", &self.inner.delay)
            .field("document_id", &self.inner.document_id)
            .finish()
    }
}
