//! Release checks for a finished report.
//!
//! The [`QualityGate`] scores four categories (data integrity, business
//! rules, completeness, formatting) and refuses release while any blocking
//! error remains. Findings never halt the pipeline that produced the report.

mod business_rules;
mod completeness;
mod consistency;
mod data_integrity;
mod finding;
mod formatting;
mod gate;
mod narrative;

pub use business_rules::{check_business_rules, Band, BusinessRuleConfig};
pub use completeness::{check_completeness, default_required_sections, RequiredSection};
pub use consistency::{
    extract_mentions, ConsistencyConfig, ConsistencyReport, Correction, NarrativeValueInjector,
    ValueConsistencyValidator, ValueMention,
};
pub use data_integrity::{check_forbidden_tokens, default_forbidden_tokens};
pub use finding::{CheckCategory, FindingLocation, Severity, ValidationFinding};
pub use formatting::{check_formatting, default_critical_fields};
pub use gate::{
    CategoryScore, CategoryWeights, ConsistencyStrictness, GateConfig, GateResult, QualityGate,
};
pub use narrative::{render_sections, sections_from_output, NarrativeSection};
