//! Runtime event surface.
//!
//! The runtime emits a small set of lifecycle events after the fact; sinks
//! observe but never influence execution. The default bus logs through
//! `tracing`; a [`ChannelSink`] streams events to external consumers and a
//! [`MemorySink`] collects them for assertions in tests.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Lifecycle events emitted by the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// A step committed for a lineage.
    StepCommitted {
        identity: String,
        step: u64,
        rules_applied: usize,
    },
    /// A step aborted; the previous context stays current.
    StepFailed {
        identity: String,
        step: u64,
        error: String,
    },
    /// A snapshot was persisted.
    CheckpointSaved {
        identity: String,
        step: u64,
        digest: String,
    },
    /// A lineage was forked from a snapshot.
    LineageForked {
        source: String,
        step: u64,
        new_identity: String,
    },
}

/// Observer of runtime events. Must not block.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &RuntimeEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn handle(&self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::StepCommitted {
                identity,
                step,
                rules_applied,
            } => {
                tracing::info!(%identity, step, rules_applied, "step committed");
            }
            RuntimeEvent::StepFailed {
                identity,
                step,
                error,
            } => {
                tracing::warn!(%identity, step, %error, "step failed");
            }
            RuntimeEvent::CheckpointSaved {
                identity,
                step,
                digest,
            } => {
                tracing::info!(%identity, step, %digest, "checkpoint saved");
            }
            RuntimeEvent::LineageForked {
                source,
                step,
                new_identity,
            } => {
                tracing::info!(%source, step, %new_identity, "lineage forked");
            }
        }
    }
}

/// Forwards events over a flume channel. Drops events when the receiver is
/// gone or the channel is full.
#[derive(Debug)]
pub struct ChannelSink {
    sender: flume::Sender<RuntimeEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(sender: flume::Sender<RuntimeEvent>) -> Self {
        ChannelSink { sender }
    }
}

impl EventSink for ChannelSink {
    fn handle(&self, event: &RuntimeEvent) {
        let _ = self.sender.try_send(event.clone());
    }
}

/// Collects events in memory, for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything observed so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RuntimeEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for MemorySink {
    fn handle(&self, event: &RuntimeEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Fan-out of runtime events to registered sinks.
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl Default for EventBus {
    /// A bus with a single [`TracingSink`].
    fn default() -> Self {
        EventBus {
            sinks: RwLock::new(vec![Arc::new(TracingSink)]),
        }
    }
}

impl EventBus {
    /// An empty bus with no sinks.
    #[must_use]
    pub fn new() -> Self {
        EventBus {
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn emit(&self, event: RuntimeEvent) {
        for sink in self.sinks.read().iter() {
            sink.handle(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.read().len())
            .finish()
    }
}
