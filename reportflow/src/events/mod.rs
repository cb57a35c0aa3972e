//! Event sinks for pipeline lifecycle events.
//!
//! The orchestrator reports job and stage transitions as typed
//! [`PipelineEvent`](crate::core::PipelineEvent)s. Sinks log them, collect
//! them for tests, or broadcast them to progress subscribers.

mod sink;

pub use sink::{
    BroadcastEventSink, CollectingEventSink, EventSink, FanoutEventSink, LoggingEventSink,
    NoOpEventSink,
};
