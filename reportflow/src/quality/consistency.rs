//! Cross-checks numbers quoted in prose against the canonical values.
//!
//! A number is only checked when it sits within a bounded window of a
//! keyword that names a metric ("fair market value", "cap rate", ...). Numbers
//! far from any keyword are ignored, so incidental figures never produce
//! findings.

use super::finding::{CheckCategory, FindingLocation, Severity, ValidationFinding};
use super::narrative::NarrativeSection;
use crate::valuation::{parse_amount, CanonicalValueStore, Metric, MetricKind};
use regex::{Match, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\$\s?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?(?:\s?(?:million|billion|thousand|mm|bn|[mkb])\b)?",
    )
    .expect("currency pattern is valid")
});

static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+(?:\.\d+)?\s?(?:%|percent\b)").expect("percent pattern is valid")
});

static MULTIPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+(?:\.\d+)?\s?(?:x\b|×|times\b)").expect("multiple pattern is valid")
});

fn default_currency_tolerance() -> f64 {
    0.01
}

fn default_ratio_tolerance() -> f64 {
    0.05
}

fn default_window_chars() -> usize {
    150
}

fn default_critical_sections() -> BTreeMap<String, Vec<String>> {
    let headline = ["executive_summary", "valuation_conclusion"];
    let approaches = ["valuation_approaches", "valuation_conclusion"];
    let mut map = BTreeMap::new();
    for metric in Metric::ALL {
        let sections: &[&str] = match metric {
            Metric::FinalValue | Metric::RangeLow | Metric::RangeHigh => &headline,
            Metric::ApproachValue(_) => &approaches,
            Metric::Multiple | Metric::CapRate => &approaches[..1],
            Metric::Earnings(_) | Metric::Revenue => &[],
        };
        if !sections.is_empty() {
            map.insert(
                metric.key().to_string(),
                sections.iter().map(|s| (*s).to_string()).collect(),
            );
        }
    }
    map
}

/// Tolerances, window size and critical sections for the consistency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Relative tolerance for dollar amounts.
    #[serde(default = "default_currency_tolerance")]
    pub currency_tolerance: f64,
    /// Relative tolerance for multiples and rates.
    #[serde(default = "default_ratio_tolerance")]
    pub ratio_tolerance: f64,
    /// Maximum characters between a number and a metric keyword.
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    /// Section ids where a mismatch is an error, keyed by metric key.
    #[serde(default = "default_critical_sections")]
    pub critical_sections: BTreeMap<String, Vec<String>>,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            currency_tolerance: default_currency_tolerance(),
            ratio_tolerance: default_ratio_tolerance(),
            window_chars: default_window_chars(),
            critical_sections: default_critical_sections(),
        }
    }
}

impl ConsistencyConfig {
    /// Returns the relative tolerance for a metric kind.
    #[must_use]
    pub fn tolerance(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Currency => self.currency_tolerance,
            MetricKind::Multiple | MetricKind::Rate => self.ratio_tolerance,
        }
    }

    /// True when a mismatch of `metric` in `section_id` is an error.
    #[must_use]
    pub fn is_critical(&self, metric: Metric, section_id: &str) -> bool {
        self.critical_sections
            .get(metric.key())
            .is_some_and(|ids| ids.iter().any(|id| id == section_id))
    }
}

/// A number found in prose.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueMention {
    /// How the number is written.
    pub kind: MetricKind,
    /// The value in prose units (dollars, percent points, times).
    pub value: f64,
    /// Byte offset of the match.
    pub start: usize,
    /// Byte offset one past the match.
    pub end: usize,
    /// The matched text.
    pub text: String,
    /// Absolute slack for compact amounts such as `$1.2M`.
    pub slack: f64,
}

impl ValueMention {
    fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

fn leading_number(text: &str) -> Option<(f64, i32)> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(text.len());
    let number: String = text[..end].chars().filter(|c| *c != ',').collect();
    let decimals = number.split_once('.').map_or(0, |(_, frac)| frac.len());
    Some((number.parse().ok()?, i32::try_from(decimals).unwrap_or(0)))
}

fn currency_mention(m: Match<'_>) -> Option<ValueMention> {
    let text = m.as_str();
    let value = parse_amount(text)?;
    let body = text.trim_start_matches('$').trim_start();
    let (_, decimals) = leading_number(body)?;
    let suffix = body
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ',')
        .trim()
        .to_ascii_lowercase();
    let scale = match suffix.as_str() {
        "" => 1.0,
        "k" | "thousand" => 1e3,
        "m" | "mm" | "million" => 1e6,
        _ => 1e9,
    };
    let slack = if scale > 1.0 {
        0.5 * scale * 10f64.powi(-decimals)
    } else {
        0.0
    };
    Some(ValueMention {
        kind: MetricKind::Currency,
        value,
        start: m.start(),
        end: m.end(),
        text: text.to_string(),
        slack,
    })
}

fn ratio_mention(m: Match<'_>, kind: MetricKind) -> Option<ValueMention> {
    let (value, _) = leading_number(m.as_str())?;
    Some(ValueMention {
        kind,
        value,
        start: m.start(),
        end: m.end(),
        text: m.as_str().to_string(),
        slack: 0.0,
    })
}

/// Extracts currency, percentage and multiple mentions in text order.
///
/// Overlapping matches keep the earliest.
#[must_use]
pub fn extract_mentions(text: &str) -> Vec<ValueMention> {
    let mut mentions: Vec<ValueMention> = CURRENCY
        .find_iter(text)
        .filter_map(currency_mention)
        .chain(
            PERCENT
                .find_iter(text)
                .filter_map(|m| ratio_mention(m, MetricKind::Rate)),
        )
        .chain(
            MULTIPLE
                .find_iter(text)
                .filter_map(|m| ratio_mention(m, MetricKind::Multiple)),
        )
        .collect();
    mentions.sort_by_key(|m| m.start);

    let mut kept: Vec<ValueMention> = Vec::with_capacity(mentions.len());
    for mention in mentions {
        if kept.last().is_some_and(|prev| mention.start < prev.end) {
            continue;
        }
        kept.push(mention);
    }
    kept
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(char::is_alphanumeric)
}

/// Finds `keyword` in lowercase `text` on word boundaries, allowing a plural
/// `s`.
fn keyword_spans(text: &str, keyword: &str) -> Vec<(usize, usize)> {
    text.match_indices(keyword)
        .filter_map(|(start, _)| {
            let mut end = start + keyword.len();
            if is_word_char(text[..start].chars().next_back()) {
                return None;
            }
            let mut rest = text[end..].chars();
            let next = rest.next();
            let after = rest.next();
            match next {
                Some('s') if !is_word_char(after) => end += 1,
                c if is_word_char(c) => return None,
                _ => {}
            }
            Some((start, end))
        })
        .collect()
}

/// Characters between two spans; zero when they overlap.
fn gap_chars(text: &str, a: (usize, usize), b: (usize, usize)) -> usize {
    if a.1 <= b.0 {
        text[a.1..b.0].chars().count()
    } else if b.1 <= a.0 {
        text[b.1..a.0].chars().count()
    } else {
        0
    }
}

/// Result of a consistency check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    /// Mismatches in section order.
    pub findings: Vec<ValidationFinding>,
    /// Number of mentions that were compared against a metric.
    pub checked: usize,
}

impl ConsistencyReport {
    /// True when no mismatch was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }

    /// Number of mismatches in critical sections.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_blocking()).count()
    }

    /// Number of mismatches elsewhere.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.findings.len() - self.error_count()
    }
}

/// Compares narrative numbers with a [`CanonicalValueStore`].
#[derive(Debug, Clone, Default)]
pub struct ValueConsistencyValidator {
    config: ConsistencyConfig,
}

impl ValueConsistencyValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ConsistencyConfig {
        &self.config
    }

    /// Checks every section.
    ///
    /// Each mention is attributed to the metric whose keyword is nearest
    /// inside the window, preferring keywords that precede the number, and is
    /// flagged when it is outside that metric's tolerance. Metrics sharing
    /// the nearest keyword (the range bounds) are all eligible.
    #[must_use]
    pub fn check(&self, store: &CanonicalValueStore, sections: &[NarrativeSection]) -> ConsistencyReport {
        let metrics = store.metrics();
        let mut report = ConsistencyReport::default();

        for section in sections {
            let lower = section.text.to_ascii_lowercase();
            let anchors: Vec<(Metric, f64, Vec<(usize, usize)>)> = metrics
                .iter()
                .map(|(metric, value)| {
                    let spans: Vec<(usize, usize)> = metric
                        .keywords()
                        .iter()
                        .flat_map(|k| keyword_spans(&lower, k))
                        .collect();
                    (*metric, *value, spans)
                })
                .filter(|(_, _, spans)| !spans.is_empty())
                .collect();
            if anchors.is_empty() {
                continue;
            }

            for mention in extract_mentions(&section.text) {
                let candidates: Vec<(Metric, f64, usize)> = anchors
                    .iter()
                    .filter(|(metric, _, _)| metric.kind() == mention.kind)
                    .filter_map(|(metric, value, spans)| {
                        spans
                            .iter()
                            .filter_map(|span| self.rank(&section.text, *span, &mention))
                            .min()
                            .map(|rank| (*metric, *value, rank))
                    })
                    .collect();
                let Some(nearest) = candidates.iter().map(|(_, _, rank)| *rank).min() else {
                    continue;
                };
                report.checked += 1;
                let attributed: Vec<(Metric, f64)> = candidates
                    .iter()
                    .filter(|(_, _, rank)| *rank == nearest)
                    .map(|(metric, value, _)| (*metric, *value))
                    .collect();
                if attributed
                    .iter()
                    .any(|(_, value)| self.matches(&mention, *value))
                {
                    continue;
                }

                let (metric, authoritative) = attributed[0];
                report
                    .findings
                    .push(self.mismatch(store, section, &mention, metric, authoritative));
            }
        }

        debug!(
            checked = report.checked,
            mismatches = report.findings.len(),
            "Consistency check finished"
        );
        report
    }

    /// Distance used to pick the metric a mention refers to, or `None` when
    /// the keyword is outside the window. Keywords after the number rank
    /// behind every keyword before it.
    fn rank(&self, text: &str, keyword: (usize, usize), mention: &ValueMention) -> Option<usize> {
        let gap = gap_chars(text, keyword, mention.span());
        if gap > self.config.window_chars {
            None
        } else if keyword.1 <= mention.start {
            Some(gap)
        } else {
            Some(gap + self.config.window_chars + 1)
        }
    }

    fn matches(&self, mention: &ValueMention, authoritative: f64) -> bool {
        let tolerance = self.config.tolerance(mention.kind);
        (mention.value - authoritative).abs() <= tolerance * authoritative.abs() + mention.slack + 1e-9
    }

    fn mismatch(
        &self,
        store: &CanonicalValueStore,
        section: &NarrativeSection,
        mention: &ValueMention,
        metric: Metric,
        authoritative: f64,
    ) -> ValidationFinding {
        let severity = if self.config.is_critical(metric, &section.id) {
            Severity::Error
        } else {
            Severity::Warning
        };
        let canonical = store
            .metric_formatted(metric)
            .unwrap_or_else(|| authoritative.to_string());
        ValidationFinding::new(
            CheckCategory::DataIntegrity,
            severity,
            "value_mismatch",
            format!(
                "{} in section '{}' reads {} but the calculated value is {canonical}",
                metric.label(),
                section.id,
                mention.text
            ),
        )
        .with_values(metric, authoritative, mention.value)
        .at(FindingLocation {
            section_id: section.id.clone(),
            start: mention.start,
            end: mention.end,
            text: mention.text.clone(),
        })
    }
}

/// One rewritten mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// Section id.
    pub section_id: String,
    /// The metric the mention referred to.
    pub metric: Metric,
    /// The text that was replaced.
    pub original: String,
    /// The canonical formatted value written in its place.
    pub replacement: String,
}

/// Rewrites inconsistent mentions with canonical formatted values.
#[derive(Debug, Clone, Default)]
pub struct NarrativeValueInjector {
    validator: ValueConsistencyValidator,
}

impl NarrativeValueInjector {
    /// Creates an injector using `config` to detect mismatches.
    #[must_use]
    pub fn new(config: ConsistencyConfig) -> Self {
        Self {
            validator: ValueConsistencyValidator::new(config),
        }
    }

    /// Returns corrected copies of `sections` and the corrections made.
    #[must_use]
    pub fn inject(
        &self,
        store: &CanonicalValueStore,
        sections: &[NarrativeSection],
    ) -> (Vec<NarrativeSection>, Vec<Correction>) {
        let report = self.validator.check(store, sections);
        let mut corrections = Vec::new();
        let corrected = sections
            .iter()
            .map(|section| {
                let mut edits: Vec<(&FindingLocation, Metric)> = report
                    .findings
                    .iter()
                    .filter_map(|f| Some((f.location.as_ref()?, f.metric?)))
                    .filter(|(loc, _)| loc.section_id == section.id)
                    .collect();
                // Apply from the end so earlier offsets stay valid.
                edits.sort_by_key(|(loc, _)| std::cmp::Reverse(loc.start));

                let mut text = section.text.clone();
                let mut applied = Vec::with_capacity(edits.len());
                for (loc, metric) in edits {
                    let Some(replacement) = store.metric_formatted(metric) else {
                        continue;
                    };
                    if text.get(loc.start..loc.end) != Some(loc.text.as_str()) {
                        continue;
                    }
                    text.replace_range(loc.start..loc.end, &replacement);
                    applied.push(Correction {
                        section_id: section.id.clone(),
                        metric,
                        original: loc.text.clone(),
                        replacement,
                    });
                }
                applied.reverse();
                corrections.extend(applied);
                NarrativeSection {
                    text,
                    ..section.clone()
                }
            })
            .collect();
        (corrected, corrections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::{Approach, CalculationSnapshot, EarningsBasis};

    const FILLER: &str = "lorem ipsum dolor sit amet ";

    fn store() -> CanonicalValueStore {
        CanonicalValueStore::new(
            CalculationSnapshot::new(1_234_567.0, 1_100_000.0, 1_350_000.0)
                .with_approach(Approach::Income, 1_300_000.0, 0.5)
                .with_approach(Approach::Market, 1_200_000.0, 0.5)
                .with_earnings(EarningsBasis::Sde, 275_000.0)
                .with_multiple(4.9, EarningsBasis::Sde)
                .with_cap_rate(0.25),
        )
        .unwrap()
    }

    fn section(id: &str, text: &str) -> NarrativeSection {
        NarrativeSection::new(id, id, text)
    }

    #[test]
    fn test_extract_mentions() {
        let mentions = extract_mentions("Worth $1,234,567 or $1.2M at 4.9x with a 15.5% rate and 4.9 times SDE.");
        let kinds: Vec<_> = mentions.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MetricKind::Currency,
                MetricKind::Currency,
                MetricKind::Multiple,
                MetricKind::Rate,
                MetricKind::Multiple
            ]
        );
        assert!((mentions[0].value - 1_234_567.0).abs() < f64::EPSILON);
        assert!((mentions[1].value - 1_200_000.0).abs() < 1e-6);
        assert!((mentions[1].slack - 50_000.0).abs() < 1e-6);
        assert!((mentions[3].value - 15.5).abs() < f64::EPSILON);
        assert_eq!(mentions[4].text, "4.9 times");
    }

    #[test]
    fn test_keyword_boundaries() {
        assert_eq!(keyword_spans("the sde was", "sde"), vec![(4, 7)]);
        assert!(keyword_spans("misdeed", "sde").is_empty());
        assert_eq!(keyword_spans("market multiples", "multiple"), vec![(7, 16)]);
    }

    #[test]
    fn test_exact_values_are_consistent() {
        let report = ValueConsistencyValidator::default().check(
            &store(),
            &[section(
                "executive_summary",
                "The fair market value is $1,234,567, with a low end of $1,100,000 and a high end of \
                 $1,350,000. We applied a 4.90x multiple to SDE of $275,000 and a cap rate of 25.0%.",
            )],
        );
        assert!(report.is_consistent(), "{:?}", report.findings);
        assert_eq!(report.checked, 6);
    }

    #[test]
    fn test_compact_amount_within_rounding() {
        let report = ValueConsistencyValidator::default().check(
            &store(),
            &[section("executive_summary", "The concluded value is roughly $1.2M.")],
        );
        assert!(report.is_consistent());
        assert_eq!(report.checked, 1);
    }

    #[test]
    fn test_in_tolerance_never_flagged() {
        let validator = ValueConsistencyValidator::default();
        // Currency within 1%, multiples and rates within 5%.
        for text in [
            "The fair market value is $1,240,000.",
            "The fair market value is $1,222,222.",
            "The selected multiple is 5.1x.",
            "The selected multiple is 4.7x.",
            "The cap rate is 26%.",
            "The cap rate is 24%.",
        ] {
            let report = validator.check(&store(), &[section("executive_summary", text)]);
            assert!(report.is_consistent(), "flagged: {text}");
            assert_eq!(report.checked, 1, "not checked: {text}");
        }
    }

    #[test]
    fn test_out_of_tolerance_always_flagged() {
        let validator = ValueConsistencyValidator::default();
        for (text, metric) in [
            ("The fair market value is $1,260,000.", Metric::FinalValue),
            ("The fair market value is $1,200,000.", Metric::FinalValue),
            ("The selected multiple is 5.2x.", Metric::Multiple),
            ("The cap rate is 27%.", Metric::CapRate),
        ] {
            let report = validator.check(&store(), &[section("executive_summary", text)]);
            assert_eq!(report.findings.len(), 1, "not flagged: {text}");
            assert_eq!(report.findings[0].metric, Some(metric));
        }
    }

    #[test]
    fn test_only_inside_keyword_window() {
        let far = format!("The fair market value was discussed. {} Elsewhere we paid $9,999.", FILLER.repeat(8));
        let report = ValueConsistencyValidator::default().check(&store(), &[section("executive_summary", &far)]);
        assert!(report.is_consistent());
        assert_eq!(report.checked, 0);

        let near = "The fair market value was discussed; elsewhere we paid $9,999.";
        let report = ValueConsistencyValidator::default().check(&store(), &[section("executive_summary", near)]);
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn test_severity_depends_on_section() {
        let text = "The fair market value is $2,000,000.";
        let validator = ValueConsistencyValidator::default();
        let critical = validator.check(&store(), &[section("executive_summary", text)]);
        assert_eq!(critical.error_count(), 1);

        let other = validator.check(&store(), &[section("company_overview", text)]);
        assert_eq!(other.error_count(), 0);
        assert_eq!(other.warning_count(), 1);
        let location = other.findings[0].location.as_ref().unwrap();
        assert_eq!(location.text, "$2,000,000");
        assert_eq!(&text[location.start..location.end], "$2,000,000");
    }

    #[test]
    fn test_nearest_preceding_keyword_wins() {
        // $1,300,000 is near both keywords and belongs to the income approach.
        let report = ValueConsistencyValidator::default().check(
            &store(),
            &[section(
                "valuation_approaches",
                "Against a fair market value of $1,234,567, the income approach indicated $1,300,000.",
            )],
        );
        assert!(report.is_consistent());
    }

    #[test]
    fn test_misquote_matching_another_metric_is_flagged() {
        // The quoted amount equals the range high, but it is attributed to
        // the final value whose keyword precedes it.
        let report = ValueConsistencyValidator::default().check(
            &store(),
            &[section(
                "executive_summary",
                "The concluded fair market value is $1,350,000, at the top of the value range.",
            )],
        );
        assert_eq!(report.checked, 1);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].metric, Some(Metric::FinalValue));
        assert_eq!(report.findings[0].severity, Severity::Error);
    }

    #[test]
    fn test_shared_range_keyword_accepts_either_bound() {
        let report = ValueConsistencyValidator::default().check(
            &store(),
            &[section(
                "valuation_conclusion",
                "The business falls within a value range of $1,100,000 to $1,350,000.",
            )],
        );
        assert!(report.is_consistent(), "{:?}", report.findings);
        assert_eq!(report.checked, 2);

        let report = ValueConsistencyValidator::default().check(
            &store(),
            &[section("valuation_conclusion", "The business falls within a value range of $900,000.")],
        );
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].metric, Some(Metric::RangeLow));
    }

    #[test]
    fn test_injector_rewrites_mismatches() {
        let sections = vec![
            section(
                "executive_summary",
                "The fair market value is $1,500,000 and the multiple is 6.5x.",
            ),
            section("risk_factors", "No numbers here."),
        ];
        let injector = NarrativeValueInjector::default();
        let (corrected, corrections) = injector.inject(&store(), &sections);

        assert_eq!(
            corrected[0].text,
            "The fair market value is $1,234,567 and the multiple is 4.90x."
        );
        assert_eq!(corrected[1], sections[1]);
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections[0].original, "$1,500,000");
        assert_eq!(corrections[1].replacement, "4.90x");

        let recheck = ValueConsistencyValidator::default().check(&store(), &corrected);
        assert!(recheck.is_consistent());
    }
}
