//! Reconciliation events.
//!
//! Components take an [`EventSink`] at construction and publish
//! progress through it instead of logging directly, so tests can
//! assert on emitted events without capturing process-wide log state.

use serde::Serialize;
use std::sync::Arc;

use super::Platform;

/// Events emitted while an update cycle runs.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ReconcileEvent {
    CycleStarted {
        candidates: usize,
    },
    CycleFinished {
        fetched: usize,
        skipped: usize,
        stubbed: usize,
        dropped: usize,
    },

    RefreshDecided {
        app_id: String,
        reason: String,
    },
    AppRefreshed {
        app_id: String,
    },
    AppStubbed {
        app_id: String,
        reason: String,
    },
    AppDropped {
        app_id: String,
    },
    RemovalPending {
        app_id: String,
    },
    FreeGameRefreshed {
        url: String,
    },

    PairRepaired {
        full_id: String,
        demo_id: String,
    },
    StubResolved {
        from: String,
        to: String,
    },
    UnifiedFallback {
        app_id: String,
    },

    LinkApproved {
        app_id: String,
        platform: Platform,
        url: String,
    },
    LinkDenied {
        app_id: String,
        platform: Platform,
        url: String,
        reason: String,
    },
    LinkRetracted {
        app_id: String,
        url: String,
    },

    ValidationFailed {
        errors: usize,
    },
    CommitCompleted {
        apps: usize,
        free_games: usize,
    },
}

/// Observer seam for reconciliation progress.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ReconcileEvent);
}

/// Default sink that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &ReconcileEvent) {
        match event {
            ReconcileEvent::ValidationFailed { errors } => {
                tracing::error!(errors, "validation failed, commit aborted");
            }
            ReconcileEvent::UnifiedFallback { app_id } => {
                tracing::warn!(app_id, "demo/full counterpart missing, standalone fallback");
            }
            ReconcileEvent::AppStubbed { app_id, reason } => {
                tracing::warn!(app_id, reason, "catalog entry converted to stub");
            }
            ReconcileEvent::LinkDenied {
                app_id,
                platform,
                url,
                reason,
            } => {
                tracing::debug!(app_id, %platform, url, reason, "auto-link denied");
            }
            other => {
                tracing::debug!(event = ?other, "reconcile event");
            }
        }
    }
}

/// Sink that drops every event. Used where no observer is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &ReconcileEvent) {}
}

/// Sink that records events in memory for test assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<ReconcileEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<ReconcileEvent> {
        self.events.lock().expect("event lock poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &ReconcileEvent) {
        self.events
            .lock()
            .expect("event lock poisoned")
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_captures_in_order() {
        let sink = RecordingSink::new();
        sink.publish(&ReconcileEvent::CycleStarted { candidates: 2 });
        sink.publish(&ReconcileEvent::AppRefreshed {
            app_id: "10".to_string(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ReconcileEvent::CycleStarted { candidates: 2 });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ReconcileEvent::AppDropped {
            app_id: "10".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"AppDropped\""));
    }
}
