//! Stage timing and span attributes.

use crate::core::{JobId, StageId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::Span;

/// Attributes recorded for one stage execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSpanAttributes {
    /// Job id.
    pub job_id: String,
    /// Stage id.
    pub stage_id: u32,
    /// Stage name.
    pub stage_name: String,
    /// Whether the stage fans out over documents.
    pub fan_out: bool,
    /// Final status ("completed" or "failed").
    pub status: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Retries used.
    pub retry_count: Option<usize>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl StageSpanAttributes {
    /// Creates attributes for a stage of a job.
    #[must_use]
    pub fn new(job_id: &JobId, stage_id: StageId, stage_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage_id: stage_id.0,
            stage_name: stage_name.into(),
            ..Default::default()
        }
    }

    /// Marks the stage as fanning out.
    #[must_use]
    pub fn with_fan_out(mut self, fan_out: bool) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Records a successful completion.
    #[must_use]
    pub fn completed(mut self, duration_ms: f64, retry_count: usize) -> Self {
        self.status = Some("completed".to_string());
        self.duration_ms = Some(duration_ms);
        self.retry_count = Some(retry_count);
        self
    }

    /// Records a failure.
    #[must_use]
    pub fn failed(mut self, duration_ms: f64, error: impl Into<String>) -> Self {
        self.status = Some("failed".to_string());
        self.duration_ms = Some(duration_ms);
        self.error = Some(error.into());
        self
    }

    /// Opens a `tracing` span carrying the identifying attributes.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "stage",
            job_id = %self.job_id,
            stage_id = self.stage_id,
            stage_name = %self.stage_name,
            fan_out = self.fan_out,
        )
    }

    /// Flattens the attributes into dotted keys.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("job.id".to_string(), self.job_id.clone());
        attrs.insert("stage.id".to_string(), self.stage_id.to_string());
        attrs.insert("stage.name".to_string(), self.stage_name.clone());
        attrs.insert("stage.fan_out".to_string(), self.fan_out.to_string());
        if let Some(ref v) = self.status {
            attrs.insert("stage.status".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("stage.duration_ms".to_string(), v.to_string());
        }
        if let Some(v) = self.retry_count {
            attrs.insert("stage.retry_count".to_string(), v.to_string());
        }
        if let Some(ref v) = self.error {
            attrs.insert("stage.error".to_string(), v.clone());
        }
        attrs
    }
}

/// Measures wall-clock time of a named operation.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attributes() {
        let attrs = StageSpanAttributes::new(&JobId::from("job-1"), StageId(2), "earnings")
            .with_fan_out(true)
            .completed(123.45, 1);

        let flat = attrs.to_attributes();
        assert_eq!(flat.get("stage.name"), Some(&"earnings".to_string()));
        assert_eq!(flat.get("stage.status"), Some(&"completed".to_string()));
        assert_eq!(flat.get("stage.duration_ms"), Some(&"123.45".to_string()));
        assert_eq!(flat.get("stage.retry_count"), Some(&"1".to_string()));
        assert!(!flat.contains_key("stage.error"));
    }

    #[test]
    fn test_failed_attributes() {
        let attrs = StageSpanAttributes::new(&JobId::from("j"), StageId(1), "x").failed(5.0, "boom");
        assert_eq!(attrs.to_attributes().get("stage.error"), Some(&"boom".to_string()));
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("stage");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.name(), "stage");
        assert!(timer.finish() >= 10.0);
    }
}
