//! Structured notifications emitted by the mirror.
//!
//! Every event is also logged through `tracing`; an observer is only needed
//! by callers that want to react programmatically.

use crate::conflict::ConflictKey;
use semilattice_types::{EntityKind, EntityUuid};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

/// Something noteworthy that happened during a sync cycle or operation.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// Nodes disagreed; the cycle will poll again.
    DivergenceRetry { attempt: u32, attempts: u32 },
    /// A newly observed entity was added to the mirror.
    EntityMerged { kind: EntityKind, id: EntityUuid },
    /// An entity the cluster tombstoned was dropped from the mirror.
    EntityRemoved { kind: EntityKind, id: EntityUuid },
    /// A value conflict was seen for the first time and registered.
    ConflictDetected { key: ConflictKey, values: Vec<Value> },
    /// An already registered conflict is still reported.
    ConflictPending { key: ConflictKey },
    /// A conflict was resolved with the given value.
    ConflictResolved { key: ConflictKey, value: Value },
    /// A table's blueprint became satisfied.
    BlueprintSatisfied { table: EntityUuid, elapsed: Duration },
}

/// Receives [`MirrorEvent`]s.
pub trait MirrorObserver: Send + Sync {
    fn on_event(&self, event: &MirrorEvent);
}

/// Observer that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<MirrorEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<MirrorEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of received events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MirrorEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| predicate(e))
            .count()
    }
}

impl MirrorObserver for RecordingObserver {
    fn on_event(&self, event: &MirrorEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
