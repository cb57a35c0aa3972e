//! Read-only access to canonical values.

use super::format::{format_currency, format_multiple, format_percentage};
use super::metric::{Approach, EarningsBasis, Metric, MetricKind};
use super::snapshot::{CalculationSnapshot, SnapshotError};
use parking_lot::RwLock;
use std::sync::Arc;

/// Typed, formatted accessors over one [`CalculationSnapshot`].
///
/// Every getter reads exactly one snapshot field. There are no setters: a
/// changed calculation produces a new store.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalValueStore {
    snapshot: CalculationSnapshot,
}

impl CanonicalValueStore {
    /// Creates a store after validating the snapshot.
    pub fn new(snapshot: CalculationSnapshot) -> Result<Self, SnapshotError> {
        snapshot.validate()?;
        Ok(Self { snapshot })
    }

    /// Returns the underlying snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &CalculationSnapshot {
        &self.snapshot
    }

    /// True when the engine produced a positive final value.
    #[must_use]
    pub fn has_results(&self) -> bool {
        self.snapshot.final_value > 0.0
    }

    /// The concluded value.
    #[must_use]
    pub fn final_value(&self) -> f64 {
        self.snapshot.final_value
    }

    /// The concluded value, formatted.
    #[must_use]
    pub fn final_value_formatted(&self) -> String {
        format_currency(self.snapshot.final_value, 0)
    }

    /// The value range as `(low, high)`.
    #[must_use]
    pub fn range(&self) -> (f64, f64) {
        (self.snapshot.range_low, self.snapshot.range_high)
    }

    /// The value range, formatted as `"$low - $high"`.
    #[must_use]
    pub fn range_formatted(&self) -> String {
        format!(
            "{} - {}",
            format_currency(self.snapshot.range_low, 0),
            format_currency(self.snapshot.range_high, 0)
        )
    }

    /// The value indicated by `approach`, if it was used.
    #[must_use]
    pub fn approach_value(&self, approach: Approach) -> Option<f64> {
        self.snapshot
            .approaches
            .iter()
            .find(|r| r.approach == approach)
            .map(|r| r.value)
    }

    /// The weight of `approach`, if it was used.
    #[must_use]
    pub fn approach_weight(&self, approach: Approach) -> Option<f64> {
        self.snapshot
            .approaches
            .iter()
            .find(|r| r.approach == approach)
            .map(|r| r.weight)
    }

    /// Sum of all approach weights.
    #[must_use]
    pub fn weights_total(&self) -> f64 {
        self.snapshot.approaches.iter().map(|r| r.weight).sum()
    }

    /// Annual revenue.
    #[must_use]
    pub fn revenue(&self) -> Option<f64> {
        self.snapshot.revenue
    }

    /// An earnings measure.
    #[must_use]
    pub fn earnings(&self, basis: EarningsBasis) -> Option<f64> {
        match basis {
            EarningsBasis::Sde => self.snapshot.sde,
            EarningsBasis::Ebitda => self.snapshot.ebitda,
        }
    }

    /// The market multiple.
    #[must_use]
    pub fn multiple(&self) -> Option<f64> {
        self.snapshot.multiple
    }

    /// The market multiple, formatted as `4.90x`.
    #[must_use]
    pub fn multiple_formatted(&self) -> Option<String> {
        self.snapshot.multiple.map(format_multiple)
    }

    /// The capitalization rate as a fraction.
    #[must_use]
    pub fn cap_rate(&self) -> Option<f64> {
        self.snapshot.cap_rate
    }

    /// The capitalization rate, formatted as `25.0%`.
    #[must_use]
    pub fn cap_rate_formatted(&self) -> Option<String> {
        self.snapshot.cap_rate.map(format_percentage)
    }

    /// The industry, if known.
    #[must_use]
    pub fn industry(&self) -> Option<&str> {
        self.snapshot.industry.as_deref()
    }

    /// The value of `metric` in the units prose uses.
    ///
    /// Rates come back in percent (`0.25` -> `25.0`) so they compare directly
    /// against `25%` in text.
    #[must_use]
    pub fn metric_value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::FinalValue => Some(self.snapshot.final_value),
            Metric::ApproachValue(approach) => self.approach_value(approach),
            Metric::Earnings(basis) => self.earnings(basis),
            Metric::Revenue => self.snapshot.revenue,
            Metric::Multiple => self.snapshot.multiple,
            Metric::CapRate => self.snapshot.cap_rate.map(|r| r * 100.0),
            Metric::RangeLow => Some(self.snapshot.range_low),
            Metric::RangeHigh => Some(self.snapshot.range_high),
        }
    }

    /// The canonical formatted text for `metric`.
    #[must_use]
    pub fn metric_formatted(&self, metric: Metric) -> Option<String> {
        let value = self.metric_value(metric)?;
        Some(match metric.kind() {
            MetricKind::Currency => format_currency(value, 0),
            MetricKind::Multiple => format_multiple(value),
            MetricKind::Rate => format_percentage(value / 100.0),
        })
    }

    /// Every metric with a value, in check order.
    #[must_use]
    pub fn metrics(&self) -> Vec<(Metric, f64)> {
        Metric::ALL
            .iter()
            .filter_map(|m| self.metric_value(*m).map(|v| (*m, v)))
            .collect()
    }
}

/// Holds the current value store and swaps it wholesale.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Option<Arc<CanonicalValueStore>>>,
}

impl SnapshotCell {
    /// Creates an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current store.
    #[must_use]
    pub fn current(&self) -> Option<Arc<CanonicalValueStore>> {
        self.current.read().clone()
    }

    /// Installs a new store, returning the previous one.
    pub fn replace(&self, store: CanonicalValueStore) -> Option<Arc<CanonicalValueStore>> {
        self.current.write().replace(Arc::new(store))
    }

    /// Builds a store from `snapshot` and installs it.
    pub fn publish(&self, snapshot: CalculationSnapshot) -> Result<Arc<CanonicalValueStore>, SnapshotError> {
        let store = Arc::new(CanonicalValueStore::new(snapshot)?);
        *self.current.write() = Some(store.clone());
        Ok(store)
    }

    /// Removes the current store.
    pub fn clear(&self) -> Option<Arc<CanonicalValueStore>> {
        self.current.write().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CalculationSnapshot {
        CalculationSnapshot::new(1_234_567.0, 1_100_000.0, 1_350_000.0)
            .with_approach(Approach::Asset, 800_000.0, 0.2)
            .with_approach(Approach::Income, 1_300_000.0, 0.4)
            .with_approach(Approach::Market, 1_350_000.0, 0.4)
            .with_earnings(EarningsBasis::Sde, 275_000.0)
            .with_multiple(4.9, EarningsBasis::Sde)
            .with_cap_rate(0.255)
    }

    #[test]
    fn test_formatted_getters() {
        let store = CanonicalValueStore::new(snapshot()).unwrap();
        assert!(store.has_results());
        assert_eq!(store.final_value_formatted(), "$1,234,567");
        assert_eq!(store.range_formatted(), "$1,100,000 - $1,350,000");
        assert_eq!(store.multiple_formatted().as_deref(), Some("4.90x"));
        assert_eq!(store.cap_rate_formatted().as_deref(), Some("25.5%"));
        assert!((store.weights_total() - 1.0).abs() < 1e-9);
        assert_eq!(store.revenue(), None);
    }

    #[test]
    fn test_metric_values_use_prose_units() {
        let store = CanonicalValueStore::new(snapshot()).unwrap();
        assert!((store.metric_value(Metric::CapRate).unwrap() - 25.5).abs() < 1e-9);
        assert_eq!(
            store.metric_formatted(Metric::ApproachValue(Approach::Income)).as_deref(),
            Some("$1,300,000")
        );
        assert_eq!(store.metric_formatted(Metric::CapRate).as_deref(), Some("25.5%"));
        // Revenue and EBITDA are absent.
        assert_eq!(store.metrics().len(), Metric::ALL.len() - 2);
    }

    #[test]
    fn test_zero_final_value_has_no_results() {
        let store = CanonicalValueStore::new(CalculationSnapshot::new(0.0, 0.0, 0.0)).unwrap();
        assert!(!store.has_results());
    }

    #[test]
    fn test_cell_replaces_wholesale() {
        let cell = SnapshotCell::new();
        assert!(cell.current().is_none());

        let first = cell.publish(snapshot()).unwrap();
        let held = cell.current().unwrap();

        let previous = cell
            .replace(CanonicalValueStore::new(CalculationSnapshot::new(2.0, 1.0, 3.0)).unwrap())
            .unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        // Readers holding the old store still see the old numbers.
        assert!((held.final_value() - 1_234_567.0).abs() < f64::EPSILON);
        assert!((cell.current().unwrap().final_value() - 2.0).abs() < f64::EPSILON);

        assert!(cell.clear().is_some());
        assert!(cell.current().is_none());
    }
}
