//! The default business valuation report pipeline.
//!
//! Six stages run in a fixed order:
//!
//! 1. `financial_extraction` - per document, with attachments
//! 2. `earnings_normalization` - per document, sees the merged extraction
//! 3. `industry_analysis`
//! 4. `risk_assessment`
//! 5. `valuation_inputs`
//! 6. `narrative_synthesis`

mod prompt;

pub use prompt::ProjectionPrompt;

use crate::core::StageId;
use crate::errors::PipelineValidationError;
use crate::parsing::{FieldKind, ObjectShape};
use crate::pipeline::{GenerationConfig, MergePolicy, PipelineBuilder, StageDefinition, StageGraph};
use std::sync::Arc;

/// Stage ids of the default pipeline.
pub mod stages {
    use crate::core::StageId;

    /// Per-document statement extraction.
    pub const FINANCIAL_EXTRACTION: StageId = StageId(1);
    /// Per-document earnings normalization.
    pub const EARNINGS_NORMALIZATION: StageId = StageId(2);
    /// Industry context and multiple ranges.
    pub const INDUSTRY_ANALYSIS: StageId = StageId(3);
    /// Risk factors.
    pub const RISK_ASSESSMENT: StageId = StageId(4);
    /// Inputs handed to the calculation engine.
    pub const VALUATION_INPUTS: StageId = StageId(5);
    /// Report prose.
    pub const NARRATIVE_SYNTHESIS: StageId = StageId(6);
}

use stages::{
    EARNINGS_NORMALIZATION, FINANCIAL_EXTRACTION, INDUSTRY_ANALYSIS, NARRATIVE_SYNTHESIS, RISK_ASSESSMENT,
    VALUATION_INPUTS,
};

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else.";

fn system_prompt(role: &str) -> String {
    format!("You are {role} preparing a small-business valuation report. {JSON_ONLY}")
}

fn financial_extraction() -> StageDefinition {
    StageDefinition::new(
        FINANCIAL_EXTRACTION,
        "financial_extraction",
        Arc::new(ProjectionPrompt::new(
            "Extract every fiscal period in this document as `periods`: objects with `period`, \
             `revenue`, `cost_of_goods_sold`, `operating_expenses`, `net_income`, `owner_compensation`, \
             `depreciation`, `interest` and `taxes`. List concerns in `quality_notes`, absent statements \
             in `missing_items` and anomalies in `flags`.",
        )),
    )
    .per_document(MergePolicy::financial_statements())
    .with_attachments()
    .with_system_prompt(system_prompt("a forensic accountant"))
    .with_generation(GenerationConfig::new(8192, 0.0))
    .with_shape(Arc::new(
        ObjectShape::new()
            .require("periods", FieldKind::NonEmptyArray)
            .optional("quality_notes", FieldKind::Array)
            .optional("missing_items", FieldKind::Array)
            .optional("flags", FieldKind::Array),
    ))
}

fn earnings_normalization() -> StageDefinition {
    StageDefinition::new(
        EARNINGS_NORMALIZATION,
        "earnings_normalization",
        Arc::new(
            ProjectionPrompt::new(
                "Normalize earnings for each period in this document. Return `periods` with `period`, \
                 `sde` and `ebitda`, and describe each add-back in `adjustments`.",
            )
            .project(FINANCIAL_EXTRACTION, "financials", &["periods", "summary", "quality_notes"]),
        ),
    )
    .with_dependency(FINANCIAL_EXTRACTION)
    .per_document(MergePolicy::normalized_earnings())
    .with_system_prompt(system_prompt("a business appraiser"))
    .with_generation(GenerationConfig::new(4096, 0.1))
    .with_shape(Arc::new(
        ObjectShape::new()
            .require("periods", FieldKind::NonEmptyArray)
            .optional("adjustments", FieldKind::Array),
    ))
}

fn industry_analysis() -> StageDefinition {
    StageDefinition::new(
        INDUSTRY_ANALYSIS,
        "industry_analysis",
        Arc::new(
            ProjectionPrompt::new(
                "Identify the `industry`, a `multiple_range` object with `low` and `high`, and a \
                 `growth_outlook` for the business.",
            )
            .project(FINANCIAL_EXTRACTION, "financials", &["summary"]),
        ),
    )
    .with_dependency(FINANCIAL_EXTRACTION)
    .with_system_prompt(system_prompt("an industry analyst"))
    .with_generation(GenerationConfig::new(3000, 0.3))
    .with_shape(Arc::new(
        ObjectShape::new()
            .require("industry", FieldKind::String)
            .optional("multiple_range", FieldKind::Object)
            .optional("growth_outlook", FieldKind::String),
    ))
}

fn risk_assessment() -> StageDefinition {
    StageDefinition::new(
        RISK_ASSESSMENT,
        "risk_assessment",
        Arc::new(
            ProjectionPrompt::new(
                "Assess the business risks. Return `risks` as objects with `name`, `severity` and \
                 `mitigation`, plus an `overall_risk` rating.",
            )
            .project(FINANCIAL_EXTRACTION, "financials", &["summary", "flags"])
            .project(EARNINGS_NORMALIZATION, "earnings", &["summary", "adjustments"])
            .project(INDUSTRY_ANALYSIS, "industry", &["industry", "growth_outlook"]),
        ),
    )
    .with_dependencies([FINANCIAL_EXTRACTION, EARNINGS_NORMALIZATION, INDUSTRY_ANALYSIS])
    .with_system_prompt(system_prompt("a risk analyst"))
    .with_generation(GenerationConfig::new(3000, 0.2))
    .with_shape(Arc::new(
        ObjectShape::new()
            .require("risks", FieldKind::Array)
            .optional("overall_risk", FieldKind::String),
    ))
}

fn valuation_inputs() -> StageDefinition {
    StageDefinition::new(
        VALUATION_INPUTS,
        "valuation_inputs",
        Arc::new(
            ProjectionPrompt::new(
                "Choose the valuation inputs: `earnings_basis` (sde or ebitda), `selected_multiple`, \
                 `cap_rate` as a fraction and a `rationale`.",
            )
            .project(EARNINGS_NORMALIZATION, "earnings", &["periods", "summary"])
            .project(INDUSTRY_ANALYSIS, "industry", &["industry", "multiple_range"])
            .project(RISK_ASSESSMENT, "risk", &["overall_risk", "risks"]),
        ),
    )
    .with_dependencies([EARNINGS_NORMALIZATION, INDUSTRY_ANALYSIS, RISK_ASSESSMENT])
    .with_system_prompt(system_prompt("a certified valuation analyst"))
    .with_generation(GenerationConfig::new(2000, 0.0))
    .with_shape(Arc::new(
        ObjectShape::new()
            .require("earnings_basis", FieldKind::String)
            .require("selected_multiple", FieldKind::Number)
            .require("cap_rate", FieldKind::Number)
            .optional("rationale", FieldKind::String),
    ))
}

fn narrative_synthesis() -> StageDefinition {
    StageDefinition::new(
        NARRATIVE_SYNTHESIS,
        "narrative_synthesis",
        Arc::new(
            ProjectionPrompt::new(
                "Write the report as `sections`: objects with `id`, `title` and `text`. Quote values \
                 exactly as provided.",
            )
            .project(FINANCIAL_EXTRACTION, "financials", &["summary"])
            .project(EARNINGS_NORMALIZATION, "earnings", &["summary"])
            .project(INDUSTRY_ANALYSIS, "industry", &[])
            .project(RISK_ASSESSMENT, "risk", &[])
            .project(VALUATION_INPUTS, "valuation_inputs", &[]),
        ),
    )
    .with_dependencies([
        FINANCIAL_EXTRACTION,
        EARNINGS_NORMALIZATION,
        INDUSTRY_ANALYSIS,
        RISK_ASSESSMENT,
        VALUATION_INPUTS,
    ])
    .with_system_prompt(system_prompt("a valuation report writer"))
    .with_generation(GenerationConfig::new(8192, 0.4))
    .with_shape(Arc::new(ObjectShape::new().require("sections", FieldKind::NonEmptyArray)))
}

/// Every stage definition of the default pipeline, in execution order.
#[must_use]
pub fn default_stages() -> Vec<StageDefinition> {
    vec![
        financial_extraction(),
        earnings_normalization(),
        industry_analysis(),
        risk_assessment(),
        valuation_inputs(),
        narrative_synthesis(),
    ]
}

/// Builds the default report pipeline.
pub fn default_report_pipeline() -> Result<StageGraph, PipelineValidationError> {
    default_stages()
        .into_iter()
        .fold(PipelineBuilder::new("valuation_report"), PipelineBuilder::stage)
        .build()
}

/// Returns the stage id with `name` in the default pipeline.
#[must_use]
pub fn stage_id(name: &str) -> Option<StageId> {
    default_stages().into_iter().find(|s| s.name == name).map(|s| s.id)
}
