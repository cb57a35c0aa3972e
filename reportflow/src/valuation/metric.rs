//! The metrics a narrative may quote.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A valuation approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    /// Adjusted net assets.
    Asset,
    /// Capitalized earnings.
    Income,
    /// Comparable transactions.
    Market,
}

impl Approach {
    /// Every approach, in report order.
    pub const ALL: [Self; 3] = [Self::Asset, Self::Income, Self::Market];

    /// Returns the human-readable name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Asset => "Asset approach",
            Self::Income => "Income approach",
            Self::Market => "Market approach",
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The earnings measure a multiple applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarningsBasis {
    /// Seller's discretionary earnings.
    Sde,
    /// Earnings before interest, taxes, depreciation and amortization.
    Ebitda,
}

impl EarningsBasis {
    /// Returns the abbreviation used in reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Sde => "SDE",
            Self::Ebitda => "EBITDA",
        }
    }
}

/// How a metric is written in prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Dollar amounts.
    Currency,
    /// Multiples such as `4.9x`.
    Multiple,
    /// Percentages.
    Rate,
}

/// A canonical value the narrative may quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "metric", content = "of")]
pub enum Metric {
    /// The concluded value.
    FinalValue,
    /// The value indicated by one approach.
    ApproachValue(Approach),
    /// Normalized earnings.
    Earnings(EarningsBasis),
    /// Annual revenue.
    Revenue,
    /// The selected market multiple.
    Multiple,
    /// The capitalization rate.
    CapRate,
    /// The low end of the value range.
    RangeLow,
    /// The high end of the value range.
    RangeHigh,
}

impl Metric {
    /// Every metric, in check order.
    pub const ALL: [Self; 11] = [
        Self::FinalValue,
        Self::ApproachValue(Approach::Asset),
        Self::ApproachValue(Approach::Income),
        Self::ApproachValue(Approach::Market),
        Self::Earnings(EarningsBasis::Sde),
        Self::Earnings(EarningsBasis::Ebitda),
        Self::Revenue,
        Self::Multiple,
        Self::CapRate,
        Self::RangeLow,
        Self::RangeHigh,
    ];

    /// Returns how the metric is written.
    #[must_use]
    pub fn kind(self) -> MetricKind {
        match self {
            Self::Multiple => MetricKind::Multiple,
            Self::CapRate => MetricKind::Rate,
            _ => MetricKind::Currency,
        }
    }

    /// Returns a stable machine key.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::FinalValue => "final_value",
            Self::ApproachValue(Approach::Asset) => "asset_approach_value",
            Self::ApproachValue(Approach::Income) => "income_approach_value",
            Self::ApproachValue(Approach::Market) => "market_approach_value",
            Self::Earnings(EarningsBasis::Sde) => "sde",
            Self::Earnings(EarningsBasis::Ebitda) => "ebitda",
            Self::Revenue => "revenue",
            Self::Multiple => "multiple",
            Self::CapRate => "cap_rate",
            Self::RangeLow => "range_low",
            Self::RangeHigh => "range_high",
        }
    }

    /// Returns the human-readable name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::FinalValue => "Final value",
            Self::ApproachValue(approach) => approach.label(),
            Self::Earnings(basis) => basis.label(),
            Self::Revenue => "Revenue",
            Self::Multiple => "Valuation multiple",
            Self::CapRate => "Capitalization rate",
            Self::RangeLow => "Value range low",
            Self::RangeHigh => "Value range high",
        }
    }

    /// Returns the lowercase phrases that introduce the metric in prose.
    #[must_use]
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::FinalValue => &[
                "fair market value",
                "concluded value",
                "final value",
                "estimated value",
                "valued at",
                "business value",
            ],
            Self::ApproachValue(Approach::Asset) => {
                &["asset approach", "asset-based approach", "adjusted net asset"]
            }
            Self::ApproachValue(Approach::Income) => &[
                "income approach",
                "capitalization of earnings",
                "capitalized earnings",
            ],
            Self::ApproachValue(Approach::Market) => {
                &["market approach", "comparable sales", "comparable transactions"]
            }
            Self::Earnings(EarningsBasis::Sde) => &[
                "sde",
                "seller's discretionary earnings",
                "discretionary earnings",
            ],
            Self::Earnings(EarningsBasis::Ebitda) => &["ebitda"],
            Self::Revenue => &["revenue", "annual sales", "gross sales", "top line"],
            Self::Multiple => &["multiple", "multiplier"],
            Self::CapRate => &["capitalization rate", "cap rate"],
            Self::RangeLow => &["low end", "lower bound", "value range", "ranging from", "range of"],
            Self::RangeHigh => &["high end", "upper bound", "value range", "ranging from", "range of"],
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_unique() {
        let keys: HashSet<_> = Metric::ALL.iter().map(|m| m.key()).collect();
        assert_eq!(keys.len(), Metric::ALL.len());
    }

    #[test]
    fn test_keywords_are_lowercase() {
        for metric in Metric::ALL {
            assert!(!metric.keywords().is_empty());
            for keyword in metric.keywords() {
                assert_eq!(*keyword, keyword.to_lowercase());
            }
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Metric::CapRate.kind(), MetricKind::Rate);
        assert_eq!(Metric::Multiple.kind(), MetricKind::Multiple);
        assert_eq!(Metric::ApproachValue(Approach::Market).kind(), MetricKind::Currency);
        assert_eq!(Metric::Earnings(EarningsBasis::Sde).label(), "SDE");
    }
}
