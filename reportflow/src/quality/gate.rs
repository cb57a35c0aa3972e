//! The weighted quality gate.

use super::business_rules::{check_business_rules, BusinessRuleConfig};
use super::completeness::{check_completeness, default_required_sections, RequiredSection};
use super::consistency::{ConsistencyConfig, ValueConsistencyValidator};
use super::data_integrity::{check_forbidden_tokens, default_forbidden_tokens};
use super::finding::{CheckCategory, Severity, ValidationFinding};
use super::formatting::{check_formatting, default_critical_fields};
use super::narrative::NarrativeSection;
use crate::errors::QualityGateBlocked;
use crate::valuation::CanonicalValueStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How numeric-consistency findings count toward release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStrictness {
    /// Every mismatch is a warning.
    #[default]
    Advisory,
    /// Mismatches in critical sections block release.
    CriticalBlocking,
}

/// Per-category weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeights {
    /// Data integrity weight.
    pub data_integrity: f64,
    /// Business rules weight.
    pub business_rules: f64,
    /// Completeness weight.
    pub completeness: f64,
    /// Formatting weight.
    pub formatting: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            data_integrity: 0.35,
            business_rules: 0.25,
            completeness: 0.25,
            formatting: 0.15,
        }
    }
}

impl CategoryWeights {
    /// Returns the weight of `category`.
    #[must_use]
    pub fn get(&self, category: CheckCategory) -> f64 {
        match category {
            CheckCategory::DataIntegrity => self.data_integrity,
            CheckCategory::BusinessRules => self.business_rules,
            CheckCategory::Completeness => self.completeness,
            CheckCategory::Formatting => self.formatting,
        }
    }

    /// Sum of all weights.
    #[must_use]
    pub fn total(&self) -> f64 {
        CheckCategory::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

fn default_pass_threshold() -> f64 {
    70.0
}

fn default_error_deduction() -> f64 {
    25.0
}

fn default_warning_deduction() -> f64 {
    5.0
}

/// Gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Category weights; must sum to 1.
    #[serde(default)]
    pub weights: CategoryWeights,
    /// Minimum score for `passed`.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Points deducted per error.
    #[serde(default = "default_error_deduction")]
    pub error_deduction: f64,
    /// Points deducted per warning.
    #[serde(default = "default_warning_deduction")]
    pub warning_deduction: f64,
    /// Treatment of consistency findings.
    #[serde(default)]
    pub strictness: ConsistencyStrictness,
    /// Consistency tolerances and window.
    #[serde(default)]
    pub consistency: ConsistencyConfig,
    /// Business-rule bands.
    #[serde(default)]
    pub business_rules: BusinessRuleConfig,
    /// Sections the report must contain.
    #[serde(default = "default_required_sections")]
    pub required_sections: Vec<RequiredSection>,
    /// Field labels that may never read N/A.
    #[serde(default = "default_critical_fields")]
    pub critical_fields: Vec<String>,
    /// Literal tokens that block release.
    #[serde(default = "default_forbidden_tokens")]
    pub forbidden_tokens: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            weights: CategoryWeights::default(),
            pass_threshold: default_pass_threshold(),
            error_deduction: default_error_deduction(),
            warning_deduction: default_warning_deduction(),
            strictness: ConsistencyStrictness::default(),
            consistency: ConsistencyConfig::default(),
            business_rules: BusinessRuleConfig::default(),
            required_sections: default_required_sections(),
            critical_fields: default_critical_fields(),
            forbidden_tokens: default_forbidden_tokens(),
        }
    }
}

impl GateConfig {
    /// Sets the consistency strictness.
    #[must_use]
    pub fn with_strictness(mut self, strictness: ConsistencyStrictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Sets the required sections.
    #[must_use]
    pub fn with_required_sections(mut self, sections: Vec<RequiredSection>) -> Self {
        self.required_sections = sections;
        self
    }

    /// Describes every nonsensical setting.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let total = self.weights.total();
        if (total - 1.0).abs() > 1e-6 {
            problems.push(format!("gate weights sum to {total:.3}, expected 1.0"));
        }
        if CheckCategory::ALL.iter().any(|c| self.weights.get(*c) < 0.0) {
            problems.push("gate weights must not be negative".to_string());
        }
        if !(0.0..=100.0).contains(&self.pass_threshold) {
            problems.push(format!(
                "pass threshold {} is outside 0-100",
                self.pass_threshold
            ));
        }
        if self.error_deduction < 0.0 || self.warning_deduction < 0.0 {
            problems.push("deductions must not be negative".to_string());
        }
        if self.consistency.currency_tolerance < 0.0 || self.consistency.ratio_tolerance < 0.0 {
            problems.push("consistency tolerances must not be negative".to_string());
        }
        problems
    }
}

/// Score and finding counts for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    /// The category.
    pub category: CheckCategory,
    /// `100 - deductions`, floored at 0.
    pub score: f64,
    /// The category weight.
    pub weight: f64,
    /// Number of errors.
    pub errors: usize,
    /// Number of warnings.
    pub warnings: usize,
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Weighted score, 0-100.
    pub score: f64,
    /// `can_proceed` and score at or above the threshold.
    pub passed: bool,
    /// True when there are no blocking errors.
    pub can_proceed: bool,
    /// Blocking error messages in report order.
    pub blocking_errors: Vec<String>,
    /// Warning messages in report order.
    pub warnings: Vec<String>,
    /// Per-category breakdown.
    pub categories: Vec<CategoryScore>,
    /// Every finding.
    pub findings: Vec<ValidationFinding>,
}

impl GateResult {
    /// Returns the category breakdown for `category`.
    #[must_use]
    pub fn category(&self, category: CheckCategory) -> Option<&CategoryScore> {
        self.categories.iter().find(|c| c.category == category)
    }

    /// Refuses release when any blocking error exists.
    pub fn ensure_releasable(&self) -> Result<(), QualityGateBlocked> {
        if self.can_proceed {
            Ok(())
        } else {
            Err(QualityGateBlocked {
                errors: self.blocking_errors.clone(),
                score: self.score,
            })
        }
    }
}

/// Scores a report and decides whether it may be released.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: GateConfig,
    consistency: ValueConsistencyValidator,
}

impl QualityGate {
    /// Creates a gate.
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        let consistency = ValueConsistencyValidator::new(config.consistency.clone());
        Self {
            config,
            consistency,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Runs every check.
    ///
    /// `raw` is the rendered report text; forbidden-token and formatting
    /// checks read it, the others read `sections`.
    #[must_use]
    pub fn evaluate(&self, store: &CanonicalValueStore, sections: &[NarrativeSection], raw: &str) -> GateResult {
        let mut findings = check_forbidden_tokens(raw, &self.config.forbidden_tokens);
        findings.extend(self.consistency.check(store, sections).findings.into_iter().map(|f| {
            let severity = match self.config.strictness {
                ConsistencyStrictness::Advisory => Severity::Warning,
                ConsistencyStrictness::CriticalBlocking => f.severity,
            };
            f.reclassified(CheckCategory::DataIntegrity, severity)
        }));
        findings.extend(check_business_rules(store, &self.config.business_rules));
        findings.extend(check_completeness(sections, &self.config.required_sections));
        findings.extend(check_formatting(raw, &self.config.critical_fields));

        let categories: Vec<CategoryScore> = CheckCategory::ALL
            .iter()
            .map(|category| self.score_category(*category, &findings))
            .collect();
        let total_weight = self.config.weights.total();
        let score = if total_weight > 0.0 {
            categories.iter().map(|c| c.score * c.weight).sum::<f64>() / total_weight
        } else {
            0.0
        };

        let blocking_errors: Vec<String> = findings
            .iter()
            .filter(|f| f.is_blocking())
            .map(ToString::to_string)
            .collect();
        let warnings: Vec<String> = findings
            .iter()
            .filter(|f| !f.is_blocking())
            .map(ToString::to_string)
            .collect();
        let can_proceed = blocking_errors.is_empty();
        let passed = can_proceed && score >= self.config.pass_threshold;

        info!(
            score,
            passed,
            can_proceed,
            blocking = blocking_errors.len(),
            warnings = warnings.len(),
            "Quality gate evaluated"
        );

        GateResult {
            score,
            passed,
            can_proceed,
            blocking_errors,
            warnings,
            categories,
            findings,
        }
    }

    /// Evaluates and fails with every blocking error when release is not
    /// allowed. Warnings are logged and the result returned.
    pub fn evaluate_or_throw(
        &self,
        store: &CanonicalValueStore,
        sections: &[NarrativeSection],
        raw: &str,
    ) -> Result<GateResult, QualityGateBlocked> {
        let result = self.evaluate(store, sections, raw);
        result.ensure_releasable()?;
        for warning in &result.warnings {
            warn!(warning = %warning, "Quality gate warning");
        }
        Ok(result)
    }

    #[allow(clippy::cast_precision_loss)]
    fn score_category(&self, category: CheckCategory, findings: &[ValidationFinding]) -> CategoryScore {
        let (errors, warnings) = findings
            .iter()
            .filter(|f| f.category == category)
            .fold((0usize, 0usize), |(e, w), f| {
                if f.is_blocking() {
                    (e + 1, w)
                } else {
                    (e, w + 1)
                }
            });
        let deductions =
            errors as f64 * self.config.error_deduction + warnings as f64 * self.config.warning_deduction;
        CategoryScore {
            category,
            score: (100.0 - deductions).max(0.0),
            weight: self.config.weights.get(category),
            errors,
            warnings,
        }
    }
}
