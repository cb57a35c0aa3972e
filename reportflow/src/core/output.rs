//! Stage output type.

use super::StageId;
use crate::generator::Usage;
use crate::parsing::{migrate_to_current, ShapeError, SCHEMA_VERSION};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The parsed structured result of one stage for one job.
///
/// For fan-out stages this is the merged result across documents. Outputs
/// are immutable once persisted and are replaced only by re-running the
/// stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// The producing stage.
    pub stage_id: StageId,
    /// The producing stage's name.
    pub stage_name: String,
    /// Schema version of `data`.
    pub schema_version: u32,
    /// The structured result.
    pub data: Value,
    /// Structural problems reported by the stage's shape validator.
    #[serde(default)]
    pub shape_problems: Vec<ShapeError>,
    /// Generator units consumed, across retries and documents.
    #[serde(default)]
    pub usage: Usage,
    /// Retries used (summed across documents for fan-out stages).
    #[serde(default)]
    pub retry_count: usize,
    /// Number of documents merged, for fan-out stages.
    #[serde(default)]
    pub document_count: Option<usize>,
    /// SHA-256 of the request payload(s) that produced this output.
    pub input_fingerprint: String,
    /// Dependencies that were missing when the stage ran in force mode.
    #[serde(default)]
    pub missing_dependencies: Vec<StageId>,
    /// Wall-clock duration.
    #[serde(default)]
    pub duration_ms: f64,
    /// When the output was produced.
    pub completed_at: Timestamp,
}

impl StageOutput {
    /// Creates an output at the current schema version.
    #[must_use]
    pub fn new(stage_id: StageId, stage_name: impl Into<String>, data: Value) -> Self {
        Self {
            stage_id,
            stage_name: stage_name.into(),
            schema_version: SCHEMA_VERSION,
            data,
            shape_problems: Vec::new(),
            usage: Usage::default(),
            retry_count: 0,
            document_count: None,
            input_fingerprint: String::new(),
            missing_dependencies: Vec::new(),
            duration_ms: 0.0,
            completed_at: now_utc(),
        }
    }

    /// Returns true if a dependency was missing when this output was produced.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.missing_dependencies.is_empty()
    }

    /// Returns true if the shape validator reported no problems.
    #[must_use]
    pub fn is_shape_valid(&self) -> bool {
        self.shape_problems.is_empty()
    }

    /// Gets a top-level field of the data.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Gets a nested field by dotted path (e.g. "summary.period_count").
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.data, |value, segment| value.get(segment))
    }

    /// Upgrades data persisted under an older schema version in place.
    pub fn upgrade(&mut self) {
        if self.schema_version < SCHEMA_VERSION {
            let data = std::mem::take(&mut self.data);
            self.data = migrate_to_current(data, self.schema_version);
            self.schema_version = SCHEMA_VERSION;
        }
    }

    /// Returns true if two outputs carry the same content, ignoring timing.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.stage_id == other.stage_id
            && self.schema_version == other.schema_version
            && self.data == other.data
            && self.input_fingerprint == other.input_fingerprint
            && self.shape_problems == other.shape_problems
            && self.missing_dependencies == other.missing_dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path() {
        let output = StageOutput::new(
            StageId(1),
            "extraction",
            json!({"summary": {"period_count": 2}}),
        );
        assert_eq!(output.get_path("summary.period_count"), Some(&json!(2)));
        assert!(output.get_path("summary.missing").is_none());
        assert!(output.get("summary").is_some());
    }

    #[test]
    fn test_upgrade_from_v1_renames_legacy_fields() {
        let mut output = StageOutput::new(
            StageId(1),
            "extraction",
            json!({"yearly_data": [{"fiscal_year": 2023, "totalRevenue": 10}]}),
        );
        output.schema_version = 1;
        output.upgrade();
        assert_eq!(output.schema_version, SCHEMA_VERSION);
        assert_eq!(output.data["periods"][0]["period"], json!(2023));
        assert_eq!(output.data["periods"][0]["revenue"], json!(10));
    }

    #[test]
    fn test_same_content_ignores_timing() {
        let a = StageOutput::new(StageId(1), "s", json!({"x": 1}));
        let mut b = a.clone();
        b.duration_ms = 99.0;
        b.completed_at = now_utc();
        assert!(a.same_content(&b));
        b.data = json!({"x": 2});
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_degraded_flag() {
        let mut output = StageOutput::new(StageId(3), "s", json!({}));
        assert!(!output.is_degraded());
        output.missing_dependencies.push(StageId(2));
        assert!(output.is_degraded());
    }
}
