//! Event sink trait and implementations.

use crate::core::PipelineEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, Level};

/// Receives pipeline lifecycle events.
///
/// Sinks must never fail the pipeline: delivery problems are logged and
/// swallowed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: PipelineEvent) {
        self.try_emit(&event);
    }

    /// Emits an event without awaiting.
    fn try_emit(&self, event: &PipelineEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: &PipelineEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        let payload = serde_json::to_string(&event.kind).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(
                job_id = %event.job_id,
                event_type = event.event_type(),
                event_data = %payload,
                "Event: {}", event.event_type()
            );
        } else {
            info!(
                job_id = %event.job_id,
                event_type = event.event_type(),
                event_data = %payload,
                "Event: {}", event.event_type()
            );
        }
    }
}

/// Stores events in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(PipelineEvent::event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

/// Publishes events to any number of subscribers for progress reporting.
///
/// Lagging subscribers lose the oldest events; the pipeline never waits.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<PipelineEvent>,
}

impl BroadcastEventSink {
    /// Creates a broadcast sink buffering up to `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        // No subscribers is not an error.
        if self.sender.send(event.clone()).is_err() {
            debug!(event_type = event.event_type(), "No event subscribers");
        }
    }
}

/// Forwards every event to several sinks.
#[derive(Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for FanoutEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutEventSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutEventSink {
    /// Creates an empty fanout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    async fn emit(&self, event: PipelineEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }

    fn try_emit(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.try_emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventKind, JobId, StageId};

    fn started(stage: u32) -> PipelineEvent {
        PipelineEvent::new(
            JobId::from("job-1"),
            EventKind::StageStarted {
                stage_id: StageId(stage),
                stage_name: format!("stage_{stage}"),
            },
        )
    }

    fn completed() -> PipelineEvent {
        PipelineEvent::new(JobId::from("job-1"), EventKind::JobCompleted { duration_ms: 12.0 })
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(started(1)).await;
        let sink = LoggingEventSink::debug();
        sink.emit(started(1)).await;
        sink.try_emit(&completed());
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(started(1)).await;
        sink.try_emit(&started(2));
        sink.emit(completed()).await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.event_types(), vec!["stage.started", "stage.started", "job.completed"]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastEventSink::new(8);
        // Emitting without subscribers is fine.
        sink.try_emit(&started(1));

        let mut rx = sink.subscribe();
        sink.emit(started(2)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.stage_id(), Some(StageId(2)));
    }

    #[tokio::test]
    async fn test_fanout_sink() {
        let a = Arc::new(CollectingEventSink::new());
        let b = Arc::new(CollectingEventSink::new());
        let fanout = FanoutEventSink::new().with_sink(a.clone()).with_sink(b.clone());

        fanout.emit(started(1)).await;
        fanout.try_emit(&completed());

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
    }
}
