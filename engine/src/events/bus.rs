//! Event multiplexer (§4.F): two consumer classes — raw-log
//! subscribers and structured-event subscribers — fed by a single
//! `tokio::sync::broadcast` channel each. Grounded on the structure of
//! the original pub/sub event bus, with the persistence-to-store
//! option dropped: events here are purely in-process fanout, not an
//! audit log (that role belongs to the store's `test_runs` table).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{EngineEvent, RawLine};

const CHANNEL_CAPACITY: usize = 1024;

pub type SharedEventBus = Arc<EventBus>;

/// Fan-out point for a single orchestrator run. One raw-line channel,
/// one structured-event channel; a line that matches the grammar is
/// published to both.
pub struct EventBus {
    raw: broadcast::Sender<RawLine>,
    structured: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (raw, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (structured, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { raw, structured }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish a sanitized raw line. Never fails on zero subscribers —
    /// a bus with nobody listening still drains correctly.
    pub fn publish_raw(&self, line: RawLine) {
        debug!(feature_id = ?line.feature_id, "raw line published");
        let _ = self.raw.send(line);
    }

    pub fn publish_structured(&self, event: EngineEvent) {
        debug!(event_type = event.event_type(), "structured event published");
        let _ = self.structured.send(event);
    }

    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawLine> {
        self.raw.subscribe()
    }

    pub fn subscribe_structured(&self) -> broadcast::Receiver<EngineEvent> {
        self.structured.subscribe()
    }

    pub fn raw_subscriber_count(&self) -> usize {
        self.raw.receiver_count()
    }

    pub fn structured_subscriber_count(&self) -> usize {
        self.structured.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribes to the structured channel, yielding only events for one
/// feature id. Used by a CLI `watch` command that only cares about a
/// single feature's progress.
pub struct FeatureFilteredReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
    feature_id: i64,
}

impl FeatureFilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<EngineEvent>, feature_id: i64) -> Self {
        Self { receiver, feature_id }
    }

    pub async fn recv(&mut self) -> Result<EngineEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.feature_id() == Some(self.feature_id) {
                return Ok(event);
            }
        }
    }
}
