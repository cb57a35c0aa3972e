//! Fixture builders for snapshots, narratives, documents and scripted runs.

use super::mocks::ScriptedGenerator;
use crate::core::SourceDocument;
use crate::quality::{render_sections, NarrativeSection};
use crate::valuation::{Approach, CalculationSnapshot, CanonicalValueStore, EarningsBasis, Metric};
use serde_json::{json, Value};

/// A consistent snapshot: weights 20/40/40, positive approach values, every
/// band satisfied.
#[must_use]
pub fn sample_snapshot() -> CalculationSnapshot {
    CalculationSnapshot::new(1_224_000.0, 1_100_000.0, 1_350_000.0)
        .with_approach(Approach::Asset, 820_000.0, 0.2)
        .with_approach(Approach::Income, 1_300_000.0, 0.4)
        .with_approach(Approach::Market, 1_350_000.0, 0.4)
        .with_revenue(1_850_000.0)
        .with_earnings(EarningsBasis::Sde, 275_000.0)
        .with_earnings(EarningsBasis::Ebitda, 240_000.0)
        .with_multiple(4.9, EarningsBasis::Sde)
        .with_cap_rate(0.21)
        .with_industry("Professional Services")
}

/// A value store over [`sample_snapshot`].
#[must_use]
pub fn sample_store() -> CanonicalValueStore {
    CanonicalValueStore::new(sample_snapshot()).expect("sample snapshot is valid")
}

fn quoted(store: &CanonicalValueStore, metric: Metric) -> String {
    store
        .metric_formatted(metric)
        .unwrap_or_else(|| format!("[missing {}]", metric.key()))
}

/// The six standard report sections, quoting `store` exactly and meeting
/// every default length requirement.
#[must_use]
pub fn standard_sections(store: &CanonicalValueStore) -> Vec<NarrativeSection> {
    let final_value = quoted(store, Metric::FinalValue);
    let low = quoted(store, Metric::RangeLow);
    let high = quoted(store, Metric::RangeHigh);
    vec![
        NarrativeSection::new(
            "executive_summary",
            "Executive Summary",
            format!(
                "Based on our analysis, the fair market value of Harbor Dental Group is {final_value}. \
                 Our conclusion reflects a blend of the asset, income and market approaches applied to \
                 normalized earnings and the operating history provided by management. The value range \
                 spans a low end of {low} and a high end of {high} for the periods reviewed."
            ),
        ),
        NarrativeSection::new(
            "company_overview",
            "Company Overview",
            "Harbor Dental Group is a professional services practice founded in 2009 that operates \
             three clinics. The company serves a stable patient base, employs a seasoned clinical team \
             and relies on recurring hygiene visits for a large share of its appointments.",
        ),
        NarrativeSection::new(
            "financial_analysis",
            "Financial Analysis",
            format!(
                "Annual revenue reached {} in the most recent fiscal year, supported by steady patient \
                 volumes. Seller's discretionary earnings of {} were derived after normalizing owner \
                 compensation and removing non-recurring expenses. Margins have remained consistent \
                 across the periods reviewed, and working capital needs are modest relative to the size \
                 of the practice.",
                quoted(store, Metric::Revenue),
                quoted(store, Metric::Earnings(EarningsBasis::Sde)),
            ),
        ),
        NarrativeSection::new(
            "valuation_approaches",
            "Valuation Approaches",
            format!(
                "The asset approach indicated {} based on adjusted net assets. The income approach \
                 capitalized earnings at a cap rate of {} and indicated {}. The market approach \
                 indicated {} by applying a multiple of {} to SDE. The approaches were weighted to reflect the \
                 reliability of each indication for an established practice.",
                quoted(store, Metric::ApproachValue(Approach::Asset)),
                quoted(store, Metric::CapRate),
                quoted(store, Metric::ApproachValue(Approach::Income)),
                quoted(store, Metric::ApproachValue(Approach::Market)),
                quoted(store, Metric::Multiple),
            ),
        ),
        NarrativeSection::new(
            "risk_factors",
            "Risk Factors",
            "Key risks include reliance on the founding dentist, competition from corporate dental \
             chains entering the region, and potential changes in insurance reimbursement. A transition \
             plan and staff retention agreements partially mitigate these concerns for a prospective \
             buyer.",
        ),
        NarrativeSection::new(
            "valuation_conclusion",
            "Valuation Conclusion",
            format!(
                "We conclude that the fair market value of the business is {final_value}, within a value \
                 range of {low} to {high}, as of the valuation date."
            ),
        ),
    ]
}

/// The rendered report for [`standard_sections`].
#[must_use]
pub fn standard_report(store: &CanonicalValueStore) -> String {
    render_sections(&standard_sections(store))
}

/// Encodes sections as a narrative stage reply.
#[must_use]
pub fn sections_json(sections: &[NarrativeSection]) -> Value {
    json!({ "sections": sections })
}

/// `count` small PDF documents named `statement-{n}.pdf`.
#[must_use]
pub fn sample_documents(count: usize) -> Vec<SourceDocument> {
    (1..=count)
        .map(|n| {
            SourceDocument::new(
                format!("statement-{n}.pdf"),
                "application/pdf",
                format!("%PDF-1.7 statement {n}").into_bytes(),
            )
        })
        .collect()
}

/// A generator scripted with a valid reply for every stage of the default
/// catalog. Replies are persistent, so any number of runs succeed.
#[must_use]
pub fn scripted_report_generator() -> ScriptedGenerator {
    let generator = ScriptedGenerator::new();
    generator.reply(
        "financial_extraction",
        json!({
            "periods": [
                {"period": "2022", "revenue": 1_720_000, "net_income": 190_000},
                {"period": "2023", "revenue": 1_850_000, "net_income": 210_000}
            ],
            "quality_notes": ["Statements are reviewed, not audited"]
        })
        .to_string(),
    );
    generator.reply(
        "earnings_normalization",
        json!({
            "periods": [
                {"period": "2022", "sde": 255_000, "ebitda": 222_000},
                {"period": "2023", "sde": 275_000, "ebitda": 240_000}
            ],
            "adjustments": ["Owner compensation normalized to market rate"]
        })
        .to_string(),
    );
    generator.reply(
        "industry_analysis",
        json!({
            "industry": "Professional Services",
            "multiple_range": {"low": 1.5, "high": 5.0},
            "growth_outlook": "stable"
        })
        .to_string(),
    );
    generator.reply(
        "risk_assessment",
        json!({
            "risks": [{"name": "Key person dependence", "severity": "high", "mitigation": "Transition plan"}],
            "overall_risk": "moderate"
        })
        .to_string(),
    );
    generator.reply(
        "valuation_inputs",
        json!({"earnings_basis": "sde", "selected_multiple": 4.9, "cap_rate": 0.21, "rationale": "Stable earnings"})
            .to_string(),
    );
    generator.reply(
        "narrative_synthesis",
        format!(
            "Here is the report:\n```json\n{}\n```",
            sections_json(&standard_sections(&sample_store()))
        ),
    );
    generator
}
