//! The calculation engine's output.

use super::metric::{Approach, EarningsBasis};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One approach's contribution to the final value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachResult {
    /// The approach.
    pub approach: Approach,
    /// The value the approach indicates.
    pub value: f64,
    /// The approach's weight as a fraction.
    pub weight: f64,
}

/// A snapshot cannot back a value store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SnapshotError {
    /// A number is NaN or infinite.
    #[error("Snapshot field '{0}' is not a finite number")]
    NonFinite(String),

    /// An approach appears twice.
    #[error("Approach '{0}' appears more than once in the snapshot")]
    DuplicateApproach(Approach),

    /// The JSON could not be decoded.
    #[error("Invalid snapshot JSON: {0}")]
    Decode(String),
}

/// Authoritative numbers produced by the calculation engine.
///
/// Rates (`cap_rate`) and weights are fractions; currency values are
/// dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationSnapshot {
    /// The concluded value.
    pub final_value: f64,
    /// Low end of the value range.
    pub range_low: f64,
    /// High end of the value range.
    pub range_high: f64,
    /// Per-approach values and weights.
    #[serde(default)]
    pub approaches: Vec<ApproachResult>,
    /// Annual revenue.
    #[serde(default)]
    pub revenue: Option<f64>,
    /// Seller's discretionary earnings.
    #[serde(default)]
    pub sde: Option<f64>,
    /// EBITDA.
    #[serde(default)]
    pub ebitda: Option<f64>,
    /// The selected market multiple.
    #[serde(default)]
    pub multiple: Option<f64>,
    /// The earnings the multiple applies to.
    #[serde(default)]
    pub multiple_basis: Option<EarningsBasis>,
    /// Capitalization rate as a fraction.
    #[serde(default)]
    pub cap_rate: Option<f64>,
    /// Industry used to pick multiple bands.
    #[serde(default)]
    pub industry: Option<String>,
    /// When the engine produced the numbers.
    #[serde(default = "now_utc")]
    pub computed_at: Timestamp,
}

impl CalculationSnapshot {
    /// Creates a snapshot with a final value and range.
    #[must_use]
    pub fn new(final_value: f64, range_low: f64, range_high: f64) -> Self {
        Self {
            final_value,
            range_low,
            range_high,
            approaches: Vec::new(),
            revenue: None,
            sde: None,
            ebitda: None,
            multiple: None,
            multiple_basis: None,
            cap_rate: None,
            industry: None,
            computed_at: now_utc(),
        }
    }

    /// Decodes a snapshot from JSON.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SnapshotError> {
        serde_json::from_value(value).map_err(|e| SnapshotError::Decode(e.to_string()))
    }

    /// Adds an approach result.
    #[must_use]
    pub fn with_approach(mut self, approach: Approach, value: f64, weight: f64) -> Self {
        self.approaches.push(ApproachResult {
            approach,
            value,
            weight,
        });
        self
    }

    /// Sets revenue.
    #[must_use]
    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = Some(revenue);
        self
    }

    /// Sets an earnings measure.
    #[must_use]
    pub fn with_earnings(mut self, basis: EarningsBasis, value: f64) -> Self {
        match basis {
            EarningsBasis::Sde => self.sde = Some(value),
            EarningsBasis::Ebitda => self.ebitda = Some(value),
        }
        self
    }

    /// Sets the market multiple and its basis.
    #[must_use]
    pub fn with_multiple(mut self, multiple: f64, basis: EarningsBasis) -> Self {
        self.multiple = Some(multiple);
        self.multiple_basis = Some(basis);
        self
    }

    /// Sets the capitalization rate as a fraction.
    #[must_use]
    pub fn with_cap_rate(mut self, cap_rate: f64) -> Self {
        self.cap_rate = Some(cap_rate);
        self
    }

    /// Sets the industry.
    #[must_use]
    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    /// Checks that every number is finite and approaches are unique.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let scalars = [
            ("final_value", Some(self.final_value)),
            ("range_low", Some(self.range_low)),
            ("range_high", Some(self.range_high)),
            ("revenue", self.revenue),
            ("sde", self.sde),
            ("ebitda", self.ebitda),
            ("multiple", self.multiple),
            ("cap_rate", self.cap_rate),
        ];
        for (name, value) in scalars {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(SnapshotError::NonFinite(name.to_string()));
            }
        }
        for (i, result) in self.approaches.iter().enumerate() {
            if !result.value.is_finite() || !result.weight.is_finite() {
                return Err(SnapshotError::NonFinite(format!("approaches[{i}]")));
            }
            if self.approaches[..i].iter().any(|r| r.approach == result.approach) {
                return Err(SnapshotError::DuplicateApproach(result.approach));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_rejects_nan_and_duplicates() {
        let ok = CalculationSnapshot::new(1.0, 0.9, 1.1).with_approach(Approach::Asset, 1.0, 1.0);
        assert!(ok.validate().is_ok());

        let nan = CalculationSnapshot::new(f64::NAN, 0.0, 1.0);
        assert_eq!(nan.validate(), Err(SnapshotError::NonFinite("final_value".into())));

        let dup = CalculationSnapshot::new(1.0, 0.9, 1.1)
            .with_approach(Approach::Market, 1.0, 0.5)
            .with_approach(Approach::Market, 1.0, 0.5);
        assert_eq!(dup.validate(), Err(SnapshotError::DuplicateApproach(Approach::Market)));
    }

    #[test]
    fn test_from_json_defaults_optional_fields() {
        let snapshot = CalculationSnapshot::from_json(json!({
            "final_value": 1_000_000.0,
            "range_low": 900_000.0,
            "range_high": 1_100_000.0,
            "approaches": [{"approach": "income", "value": 1_000_000.0, "weight": 1.0}],
            "multiple_basis": "sde"
        }))
        .unwrap();
        assert_eq!(snapshot.approaches[0].approach, Approach::Income);
        assert_eq!(snapshot.multiple_basis, Some(EarningsBasis::Sde));
        assert!(snapshot.revenue.is_none());

        assert!(matches!(
            CalculationSnapshot::from_json(json!({"final_value": "lots"})),
            Err(SnapshotError::Decode(_))
        ));
    }
}
