//! Deterministic merge of per-document partial results.
//!
//! The merged value never depends on document order: partials are put in a
//! canonical order first and every conflict is resolved by a total order on
//! the competing values.

use crate::valuation::parse_amount;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// A list of records keyed by period (e.g. one record per fiscal year).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicField {
    /// Field holding the record array.
    pub field: String,
    /// Record key naming the period.
    pub period_key: String,
    /// Record key whose magnitude measures completeness.
    pub completeness_key: String,
}

impl PeriodicField {
    /// Creates a periodic field description.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        period_key: impl Into<String>,
        completeness_key: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            period_key: period_key.into(),
            completeness_key: completeness_key.into(),
        }
    }
}

/// Recomputes summary fields from merged periodic data.
pub trait Summarizer: Send + Sync + fmt::Debug {
    /// Rewrites summary fields of `merged` in place.
    fn summarize(&self, merged: &mut Map<String, Value>);
}

/// How a fan-out stage's partial results are combined.
#[derive(Debug, Clone, Default)]
pub struct MergePolicy {
    /// Fields merged by period.
    pub periodic: Vec<PeriodicField>,
    /// Fields merged by set union.
    pub sets: Vec<String>,
    /// Recomputes scalar summaries after merging.
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

impl MergePolicy {
    /// Creates an empty policy; every field is merged as a scalar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a periodic field.
    #[must_use]
    pub fn with_periodic(mut self, field: PeriodicField) -> Self {
        self.periodic.push(field);
        self
    }

    /// Adds a set-valued field.
    #[must_use]
    pub fn with_set(mut self, field: impl Into<String>) -> Self {
        self.sets.push(field.into());
        self
    }

    /// Sets the summarizer.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Merges partial results into one object.
    ///
    /// - periodic fields: one record per period; a duplicate keeps the record
    ///   with the larger completeness value, then the one with more non-null
    ///   fields, then the canonically larger one. Records are never averaged.
    /// - set fields: union, sorted canonically.
    /// - other fields: the non-null value with the longest canonical form,
    ///   ties broken canonically.
    /// - then the summarizer recomputes summary fields.
    #[must_use]
    pub fn merge(&self, partials: &[Value]) -> Value {
        let mut objects: Vec<&Map<String, Value>> =
            partials.iter().filter_map(Value::as_object).collect();
        objects.sort_by_cached_key(|o| canonical(&Value::Object((*o).clone())));

        let mut merged = Map::new();

        for periodic in &self.periodic {
            let records = merge_periodic(&objects, periodic);
            merged.insert(periodic.field.clone(), Value::Array(records));
        }

        for field in &self.sets {
            let mut union: BTreeMap<String, Value> = BTreeMap::new();
            for object in &objects {
                match object.get(field) {
                    Some(Value::Array(items)) => {
                        for item in items.iter().filter(|v| !v.is_null()) {
                            union.entry(canonical(item)).or_insert_with(|| item.clone());
                        }
                    }
                    Some(Value::Null) | None => {}
                    Some(single) => {
                        union.entry(canonical(single)).or_insert_with(|| single.clone());
                    }
                }
            }
            merged.insert(field.clone(), Value::Array(union.into_values().collect()));
        }

        let handled: BTreeSet<&str> = self
            .periodic
            .iter()
            .map(|p| p.field.as_str())
            .chain(self.sets.iter().map(String::as_str))
            .collect();
        let scalar_keys: BTreeSet<&String> = objects
            .iter()
            .flat_map(|o| o.keys())
            .filter(|k| !handled.contains(k.as_str()))
            .collect();
        for key in scalar_keys {
            let best = objects
                .iter()
                .filter_map(|o| o.get(key))
                .max_by(|a, b| compare_scalar(a, b));
            if let Some(best) = best {
                merged.insert(key.clone(), best.clone());
            }
        }

        if let Some(summarizer) = &self.summarizer {
            summarizer.summarize(&mut merged);
        }

        Value::Object(merged)
    }
}

fn canonical(value: &Value) -> String {
    // serde_json maps are ordered by key, so this is a canonical form.
    value.to_string()
}

fn compare_scalar(a: &Value, b: &Value) -> Ordering {
    let a_form = canonical(a);
    let b_form = canonical(b);
    (!a.is_null())
        .cmp(&!b.is_null())
        .then(a_form.len().cmp(&b_form.len()))
        .then(a_form.cmp(&b_form))
}

/// Normalizes a period label: numbers become integers, "FY2023" and
/// "fy 2023" become "2023".
#[must_use]
pub fn period_key(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_f64().map(|f| format!("{f}"))),
        Value::String(s) => {
            let trimmed = s.trim();
            let stripped = trimmed
                .strip_prefix("FY")
                .or_else(|| trimmed.strip_prefix("fy"))
                .or_else(|| trimmed.strip_prefix("Fy"))
                .unwrap_or(trimmed)
                .trim();
            (!stripped.is_empty()).then(|| stripped.to_string())
        }
        _ => None,
    }
}

/// Reads a number from a JSON number or a numeric string such as "$620,000".
#[must_use]
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn non_null_fields(record: &Map<String, Value>) -> usize {
    record.values().filter(|v| !v.is_null()).count()
}

fn compare_records(a: &Map<String, Value>, b: &Map<String, Value>, completeness_key: &str) -> Ordering {
    let a_complete = a.get(completeness_key).and_then(numeric_value).map(f64::abs);
    let b_complete = b.get(completeness_key).and_then(numeric_value).map(f64::abs);
    let by_completeness = match (a_complete, b_complete) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    };
    by_completeness
        .then(non_null_fields(a).cmp(&non_null_fields(b)))
        .then_with(|| {
            canonical(&Value::Object(a.clone())).cmp(&canonical(&Value::Object(b.clone())))
        })
}

fn merge_periodic(objects: &[&Map<String, Value>], periodic: &PeriodicField) -> Vec<Value> {
    let mut by_period: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for object in objects {
        let Some(Value::Array(records)) = object.get(&periodic.field) else {
            continue;
        };
        for record in records.iter().filter_map(Value::as_object) {
            let Some(key) = record.get(&periodic.period_key).and_then(period_key) else {
                continue;
            };
            let replace = by_period.get(&key).map_or(true, |existing| {
                compare_records(record, existing, &periodic.completeness_key) == Ordering::Greater
            });
            if replace {
                by_period.insert(key, record.clone());
            }
        }
    }
    let mut records: Vec<(String, Map<String, Value>)> = by_period.into_iter().collect();
    records.sort_by(|(a, _), (b, _)| compare_periods(a, b));
    records
        .into_iter()
        .map(|(key, mut record)| {
            record.insert(periodic.period_key.clone(), Value::String(key));
            Value::Object(record)
        })
        .collect()
}

/// First run of digits in a period label: "2023" for "2023-Q4", 9 for "9".
fn period_year(label: &str) -> Option<i64> {
    let start = label.find(|c: char| c.is_ascii_digit())?;
    let digits: String = label[start..].chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Chronological order on period labels; labels without a year sort last.
fn compare_periods(a: &str, b: &str) -> Ordering {
    match (period_year(a), period_year(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Recomputes margins and revenue summaries for merged financial statements.
///
/// Per period: `gross_margin`, `net_margin` and `ebitda_margin` from the
/// period's revenue. Summary: `period_count`, `total_revenue`,
/// `average_revenue`, `latest_period`, `latest_revenue` and `revenue_cagr`.
/// Periods are ordered by year and the growth rate spans the years between
/// the first and latest period.
#[derive(Debug, Clone)]
pub struct FinancialSummarizer {
    periods_field: String,
    period_key: String,
    revenue_key: String,
}

impl Default for FinancialSummarizer {
    fn default() -> Self {
        Self::new("periods", "revenue")
    }
}

impl FinancialSummarizer {
    /// Creates a summarizer over the given periodic field and revenue key.
    /// Periods are read from the `period` key.
    #[must_use]
    pub fn new(periods_field: impl Into<String>, revenue_key: impl Into<String>) -> Self {
        Self {
            periods_field: periods_field.into(),
            period_key: "period".to_string(),
            revenue_key: revenue_key.into(),
        }
    }

    /// Creates a summarizer reading the field and period key of `periodic`.
    #[must_use]
    pub fn for_field(periodic: &PeriodicField, revenue_key: impl Into<String>) -> Self {
        Self::new(periodic.field.clone(), revenue_key).with_period_key(periodic.period_key.clone())
    }

    /// Sets the record key naming the period.
    #[must_use]
    pub fn with_period_key(mut self, period_key: impl Into<String>) -> Self {
        self.period_key = period_key.into();
        self
    }
}

const MARGINS: &[(&str, &str)] = &[
    ("gross_profit", "gross_margin"),
    ("net_income", "net_margin"),
    ("ebitda", "ebitda_margin"),
];

impl Summarizer for FinancialSummarizer {
    #[allow(clippy::cast_precision_loss)]
    fn summarize(&self, merged: &mut Map<String, Value>) {
        let mut revenues: Vec<(String, f64)> = Vec::new();

        if let Some(Value::Array(periods)) = merged.get_mut(&self.periods_field) {
            for record in periods.iter_mut().filter_map(Value::as_object_mut) {
                let revenue = record.get(&self.revenue_key).and_then(numeric_value);
                for (source, margin) in MARGINS {
                    let computed = match (revenue, record.get(*source).and_then(numeric_value)) {
                        (Some(rev), Some(part)) if rev > 0.0 => number(round4(part / rev)),
                        _ => Value::Null,
                    };
                    if computed.is_null() {
                        record.remove(*margin);
                    } else {
                        record.insert((*margin).to_string(), computed);
                    }
                }
                if let (Some(period), Some(rev)) =
                    (record.get(&self.period_key).and_then(period_key), revenue)
                {
                    revenues.push((period, rev));
                }
            }
        }

        let period_count = merged
            .get(&self.periods_field)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        let mut summary = Map::new();
        summary.insert("period_count".to_string(), Value::from(period_count));
        revenues.sort_by(|(a, _), (b, _)| compare_periods(a, b));
        if !revenues.is_empty() {
            let total: f64 = revenues.iter().map(|(_, r)| r).sum();
            summary.insert("total_revenue".to_string(), number(total));
            summary.insert(
                "average_revenue".to_string(),
                number(round4(total / revenues.len() as f64)),
            );
            if let Some((period, revenue)) = revenues.last() {
                summary.insert("latest_period".to_string(), Value::String(period.clone()));
                summary.insert("latest_revenue".to_string(), number(*revenue));
            }
            if let (Some((first_period, first)), Some((last_period, last))) =
                (revenues.first(), revenues.last())
            {
                // Labels without a year fall back to one year per period.
                let years = match (period_year(first_period), period_year(last_period)) {
                    (Some(start), Some(end)) => end - start,
                    _ => i64::try_from(revenues.len() - 1).unwrap_or(0),
                };
                if years > 0 && *first > 0.0 && *last > 0.0 {
                    let cagr = (last / first).powf(1.0 / years as f64) - 1.0;
                    summary.insert("revenue_cagr".to_string(), number(round4(cagr)));
                }
            }
        }
        merged.insert("summary".to_string(), Value::Object(summary));
    }
}

/// Recomputes averages of earnings measures across merged periods.
///
/// Writes `summary.period_count`, and for each value key `average_<key>` and
/// `latest_<key>`.
#[derive(Debug, Clone)]
pub struct PeriodAverageSummarizer {
    periods_field: String,
    value_keys: Vec<String>,
}

impl PeriodAverageSummarizer {
    /// Creates a summarizer over `periods_field` averaging `value_keys`.
    #[must_use]
    pub fn new<I, S>(periods_field: impl Into<String>, value_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            periods_field: periods_field.into(),
            value_keys: value_keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Summarizer for PeriodAverageSummarizer {
    #[allow(clippy::cast_precision_loss)]
    fn summarize(&self, merged: &mut Map<String, Value>) {
        let records: Vec<Map<String, Value>> = merged
            .get(&self.periods_field)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_object).cloned().collect())
            .unwrap_or_default();

        let mut summary = Map::new();
        summary.insert("period_count".to_string(), Value::from(records.len()));
        for key in &self.value_keys {
            let values: Vec<f64> = records
                .iter()
                .filter_map(|r| r.get(key).and_then(numeric_value))
                .collect();
            if let Some(latest) = values.last() {
                let average = values.iter().sum::<f64>() / values.len() as f64;
                summary.insert(format!("average_{key}"), number(round4(average)));
                summary.insert(format!("latest_{key}"), number(*latest));
            }
        }
        merged.insert("summary".to_string(), Value::Object(summary));
    }
}

impl MergePolicy {
    /// Policy for extracted financial statements.
    #[must_use]
    pub fn financial_statements() -> Self {
        let periods = PeriodicField::new("periods", "period", "revenue");
        let summarizer = FinancialSummarizer::for_field(&periods, "revenue");
        Self::new()
            .with_periodic(periods)
            .with_set("quality_notes")
            .with_set("missing_items")
            .with_set("flags")
            .with_summarizer(Arc::new(summarizer))
    }

    /// Policy for normalized earnings.
    #[must_use]
    pub fn normalized_earnings() -> Self {
        Self::new()
            .with_periodic(PeriodicField::new("periods", "period", "sde"))
            .with_set("adjustments")
            .with_set("quality_notes")
            .with_set("flags")
            .with_summarizer(Arc::new(PeriodAverageSummarizer::new(
                "periods",
                ["sde", "ebitda"],
            )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_duplicate_period_keeps_larger_revenue_and_recomputes_margin() {
        let doc_a = json!({
            "periods": [{"period": "FY2023", "revenue": 500_000, "net_income": 50_000}],
            "quality_notes": ["draft statements"]
        });
        let doc_b = json!({
            "periods": [{"period": 2023, "revenue": 620_000, "net_income": 62_000}],
            "quality_notes": ["audited"]
        });

        let merged = MergePolicy::financial_statements().merge(&[doc_a, doc_b]);

        let periods = merged["periods"].as_array().unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0]["revenue"], json!(620_000));
        assert_eq!(periods[0]["period"], json!("2023"));
        assert_eq!(periods[0]["net_margin"], json!(0.1));
        assert_eq!(merged["summary"]["period_count"], json!(1));
        assert_eq!(merged["summary"]["latest_revenue"], json!(620_000.0));
        assert_eq!(merged["quality_notes"], json!(["audited", "draft statements"]));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = json!({
            "periods": [{"period": "2022", "revenue": 400_000}, {"period": "2023", "revenue": 500_000}],
            "flags": ["x"],
            "company_name": "Acme"
        });
        let b = json!({
            "periods": [{"period": "2023", "revenue": 500_000, "net_income": 1}],
            "flags": ["y", "x"],
            "company_name": "Acme Holdings LLC"
        });
        let c = json!({"periods": [{"period": "2021", "revenue": "$300,000"}], "missing_items": ["2020 return"]});

        let policy = MergePolicy::financial_statements();
        let forward = policy.merge(&[a.clone(), b.clone(), c.clone()]);
        let backward = policy.merge(&[c, b, a]);

        assert_eq!(forward, backward);
        assert_eq!(forward["company_name"], json!("Acme Holdings LLC"));
        assert_eq!(forward["periods"].as_array().unwrap().len(), 3);
        // Equal revenue: the record with more fields wins.
        assert_eq!(forward["periods"][2]["net_income"], json!(1));
        assert_eq!(forward["flags"], json!(["x", "y"]));
    }

    #[test]
    fn test_summary_recomputed_not_merged() {
        let a = json!({"periods": [{"period": "2022", "revenue": 100.0}], "summary": {"period_count": 9}});
        let b = json!({"periods": [{"period": "2023", "revenue": 121.0}], "summary": {"period_count": 7}});
        let merged = MergePolicy::financial_statements().merge(&[a, b]);

        assert_eq!(merged["summary"]["period_count"], json!(2));
        assert_eq!(merged["summary"]["average_revenue"], json!(110.5));
        assert_eq!(merged["summary"]["revenue_cagr"], json!(0.21));
        assert_eq!(merged["summary"]["latest_period"], json!("2023"));
    }

    #[test]
    fn test_short_fiscal_years_sort_numerically() {
        let a = json!({"periods": [{"period": "FY9", "revenue": 100.0}]});
        let b = json!({"periods": [{"period": "FY10", "revenue": 150.0}]});
        let merged = MergePolicy::financial_statements().merge(&[a, b]);

        assert_eq!(merged["periods"][0]["period"], json!("9"));
        assert_eq!(merged["periods"][1]["period"], json!("10"));
        assert_eq!(merged["summary"]["latest_period"], json!("10"));
        assert_eq!(merged["summary"]["latest_revenue"], json!(150.0));
        assert_eq!(merged["summary"]["revenue_cagr"], json!(0.5));
    }

    #[test]
    fn test_growth_rate_spans_missing_years() {
        let a = json!({"periods": [{"period": "2019", "revenue": 100.0}]});
        let b = json!({"periods": [{"period": "2023", "revenue": 146.41}]});
        let merged = MergePolicy::financial_statements().merge(&[a, b]);

        assert_eq!(merged["summary"]["period_count"], json!(2));
        assert_eq!(merged["summary"]["revenue_cagr"], json!(0.1));
    }

    #[test]
    fn test_summarizer_reads_configured_period_key() {
        let years = PeriodicField::new("years", "fiscal_year", "sales");
        let policy = MergePolicy::new()
            .with_periodic(years.clone())
            .with_summarizer(Arc::new(FinancialSummarizer::for_field(&years, "sales")));
        let a = json!({"years": [{"fiscal_year": "FY2022", "sales": 200.0, "net_income": 20.0}]});
        let b = json!({"years": [{"fiscal_year": 2023, "sales": 250.0}]});
        let merged = policy.merge(&[a, b]);

        assert_eq!(merged["years"][0]["net_margin"], json!(0.1));
        assert_eq!(merged["summary"]["latest_period"], json!("2023"));
        assert_eq!(merged["summary"]["total_revenue"], json!(450.0));
        assert_eq!(merged["summary"]["revenue_cagr"], json!(0.25));
    }

    #[test]
    fn test_period_average_summarizer() {
        let a = json!({"periods": [{"period": "2022", "sde": 200_000}]});
        let b = json!({"periods": [{"period": "2023", "sde": 300_000, "ebitda": 250_000}]});
        let merged = MergePolicy::normalized_earnings().merge(&[b, a]);

        assert_eq!(merged["summary"]["average_sde"], json!(250_000.0));
        assert_eq!(merged["summary"]["latest_sde"], json!(300_000.0));
        assert_eq!(merged["summary"]["latest_ebitda"], json!(250_000.0));
    }

    #[test]
    fn test_period_key_normalization() {
        assert_eq!(period_key(&json!(2023)), Some("2023".into()));
        assert_eq!(period_key(&json!("FY 2023")), Some("2023".into()));
        assert_eq!(period_key(&json!("fy2023")), Some("2023".into()));
        assert_eq!(period_key(&json!("")), None);
        assert_eq!(period_key(&json!(null)), None);
    }

    #[test]
    fn test_non_objects_ignored() {
        let merged = MergePolicy::new().merge(&[json!("text"), json!({"a": 1})]);
        assert_eq!(merged, json!({"a": 1}));
    }
}
