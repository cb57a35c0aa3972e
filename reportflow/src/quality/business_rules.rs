//! Valuation sanity rules.

use super::finding::{CheckCategory, ValidationFinding};
use crate::valuation::{format_currency, format_multiple, format_percentage, CanonicalValueStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An inclusive numeric band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl Band {
    /// Creates a band.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True when `value` lies inside the band.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

fn default_weight_tolerance() -> f64 {
    0.01
}

fn default_cap_rate_band() -> Band {
    Band::new(0.10, 0.50)
}

fn default_range_spread_band() -> Band {
    Band::new(0.05, 0.60)
}

fn default_multiple_band() -> Band {
    Band::new(0.5, 8.0)
}

fn default_industry_multiple_bands() -> BTreeMap<String, Band> {
    [
        ("construction", Band::new(1.5, 4.0)),
        ("healthcare", Band::new(2.0, 6.0)),
        ("manufacturing", Band::new(2.5, 6.0)),
        ("professional services", Band::new(1.5, 5.0)),
        ("restaurant", Band::new(1.0, 3.5)),
        ("retail", Band::new(1.0, 4.0)),
        ("technology", Band::new(2.5, 8.0)),
    ]
    .into_iter()
    .map(|(industry, band)| (industry.to_string(), band))
    .collect()
}

/// Bands and tolerances for the business-rule check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRuleConfig {
    /// Allowed distance of the weight total from 1.0.
    #[serde(default = "default_weight_tolerance")]
    pub weight_tolerance: f64,
    /// Capitalization rate band, as fractions.
    #[serde(default = "default_cap_rate_band")]
    pub cap_rate_band: Band,
    /// `(high - low) / final` band.
    #[serde(default = "default_range_spread_band")]
    pub range_spread_band: Band,
    /// Multiple band for industries without their own.
    #[serde(default = "default_multiple_band")]
    pub default_multiple_band: Band,
    /// Multiple bands keyed by lowercase industry name.
    #[serde(default = "default_industry_multiple_bands")]
    pub industry_multiple_bands: BTreeMap<String, Band>,
}

impl Default for BusinessRuleConfig {
    fn default() -> Self {
        Self {
            weight_tolerance: default_weight_tolerance(),
            cap_rate_band: default_cap_rate_band(),
            range_spread_band: default_range_spread_band(),
            default_multiple_band: default_multiple_band(),
            industry_multiple_bands: default_industry_multiple_bands(),
        }
    }
}

impl BusinessRuleConfig {
    /// Returns the multiple band for `industry`.
    #[must_use]
    pub fn multiple_band(&self, industry: Option<&str>) -> Band {
        industry
            .map(|i| i.trim().to_lowercase())
            .and_then(|i| self.industry_multiple_bands.get(&i).copied())
            .unwrap_or(self.default_multiple_band)
    }
}

fn error(code: &str, message: String) -> ValidationFinding {
    ValidationFinding::error(CheckCategory::BusinessRules, code, message)
}

fn warning(code: &str, message: String) -> ValidationFinding {
    ValidationFinding::warning(CheckCategory::BusinessRules, code, message)
}

/// Checks the snapshot behind `store` against the rules.
#[must_use]
pub fn check_business_rules(store: &CanonicalValueStore, config: &BusinessRuleConfig) -> Vec<ValidationFinding> {
    let snapshot = store.snapshot();
    let mut findings = Vec::new();

    if snapshot.approaches.is_empty() {
        findings.push(error("no_approaches", "No valuation approach was applied".into()));
    } else {
        let total = store.weights_total();
        if (total - 1.0).abs() > config.weight_tolerance {
            findings.push(error(
                "weights_sum",
                format!(
                    "Approach weights sum to {}, expected 100.0% (tolerance {})",
                    format_percentage(total),
                    format_percentage(config.weight_tolerance)
                ),
            ));
        }
        for result in &snapshot.approaches {
            if result.weight < 0.0 {
                findings.push(error(
                    "negative_weight",
                    format!("{} has a negative weight", result.approach),
                ));
            }
            if result.weight > 0.0 && result.value <= 0.0 {
                findings.push(error(
                    "approach_value_nonpositive",
                    format!(
                        "{} is weighted but indicates {}",
                        result.approach,
                        format_currency(result.value, 0)
                    ),
                ));
            }
        }
    }

    if snapshot.final_value <= 0.0 {
        findings.push(error(
            "final_value_nonpositive",
            format!("Final value must be positive, got {}", format_currency(snapshot.final_value, 0)),
        ));
    }

    let (low, high) = store.range();
    if low > high {
        findings.push(error(
            "range_inverted",
            format!(
                "Value range low {} exceeds high {}",
                format_currency(low, 0),
                format_currency(high, 0)
            ),
        ));
    } else if snapshot.final_value > 0.0 {
        let spread = (high - low) / snapshot.final_value;
        if !config.range_spread_band.contains(spread) {
            findings.push(warning(
                "range_spread",
                format!(
                    "Value range spread {} is outside {} to {}",
                    format_percentage(spread),
                    format_percentage(config.range_spread_band.min),
                    format_percentage(config.range_spread_band.max)
                ),
            ));
        }
        if snapshot.final_value < low || snapshot.final_value > high {
            findings.push(warning(
                "final_outside_range",
                format!(
                    "Final value {} lies outside the range {}",
                    store.final_value_formatted(),
                    store.range_formatted()
                ),
            ));
        }
    }

    if let Some(multiple) = store.multiple() {
        let band = config.multiple_band(store.industry());
        if !band.contains(multiple) {
            findings.push(warning(
                "multiple_out_of_band",
                format!(
                    "Multiple {} is outside the {} band {} to {}",
                    format_multiple(multiple),
                    store.industry().unwrap_or("default"),
                    format_multiple(band.min),
                    format_multiple(band.max)
                ),
            ));
        }
    }

    if let Some(cap_rate) = store.cap_rate() {
        if !config.cap_rate_band.contains(cap_rate) {
            findings.push(warning(
                "cap_rate_out_of_band",
                format!(
                    "Capitalization rate {} is outside {} to {}",
                    format_percentage(cap_rate),
                    format_percentage(config.cap_rate_band.min),
                    format_percentage(config.cap_rate_band.max)
                ),
            ));
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::{Approach, CalculationSnapshot, EarningsBasis};

    fn codes(findings: &[ValidationFinding]) -> Vec<&str> {
        findings.iter().map(|f| f.code.as_str()).collect()
    }

    fn base() -> CalculationSnapshot {
        CalculationSnapshot::new(1_000_000.0, 900_000.0, 1_150_000.0)
            .with_approach(Approach::Asset, 600_000.0, 0.2)
            .with_approach(Approach::Income, 1_100_000.0, 0.4)
            .with_approach(Approach::Market, 1_100_000.0, 0.4)
    }

    fn check(snapshot: CalculationSnapshot) -> Vec<ValidationFinding> {
        check_business_rules(&CanonicalValueStore::new(snapshot).unwrap(), &BusinessRuleConfig::default())
    }

    #[test]
    fn test_clean_snapshot_passes() {
        let snapshot = base()
            .with_multiple(3.2, EarningsBasis::Sde)
            .with_cap_rate(0.25)
            .with_industry("Retail");
        assert!(check(snapshot).is_empty());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let snapshot = CalculationSnapshot::new(1_000_000.0, 900_000.0, 1_150_000.0)
            .with_approach(Approach::Asset, 600_000.0, 0.2)
            .with_approach(Approach::Income, 1_100_000.0, 0.3)
            .with_approach(Approach::Market, 1_100_000.0, 0.4);
        let findings = check(snapshot);
        assert_eq!(codes(&findings), vec!["weights_sum"]);
        assert!(findings[0].is_blocking());
        assert!(findings[0].message.contains("90.0%"));
    }

    #[test]
    fn test_blocking_value_rules() {
        let snapshot = CalculationSnapshot::new(0.0, 10.0, 5.0).with_approach(Approach::Market, 0.0, 1.0);
        assert_eq!(
            codes(&check(snapshot)),
            vec!["approach_value_nonpositive", "final_value_nonpositive", "range_inverted"]
        );
        assert_eq!(
            codes(&check(CalculationSnapshot::new(1.0, 0.9, 1.1))),
            vec!["no_approaches"]
        );
    }

    #[test]
    fn test_band_warnings() {
        let snapshot = CalculationSnapshot::new(1_000_000.0, 990_000.0, 1_005_000.0)
            .with_approach(Approach::Market, 1_000_000.0, 1.0)
            .with_multiple(4.5, EarningsBasis::Sde)
            .with_industry("restaurant")
            .with_cap_rate(0.6);
        let findings = check(snapshot);
        assert_eq!(
            codes(&findings),
            vec!["range_spread", "multiple_out_of_band", "cap_rate_out_of_band"]
        );
        assert!(findings.iter().all(|f| !f.is_blocking()));
    }

    #[test]
    fn test_unknown_industry_uses_default_band() {
        let config = BusinessRuleConfig::default();
        assert_eq!(config.multiple_band(Some("Shipbuilding")), default_multiple_band());
        assert_eq!(config.multiple_band(Some(" Technology ")), Band::new(2.5, 8.0));
        assert_eq!(config.multiple_band(None), default_multiple_band());
    }
}
