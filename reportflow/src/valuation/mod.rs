//! The authoritative numeric results of a valuation and their formatting.
//!
//! An external calculation engine produces a [`CalculationSnapshot`]. The
//! [`CanonicalValueStore`] wraps it in read-only, typed accessors and is the
//! only place narrative checks take numbers from.

mod format;
mod metric;
mod snapshot;
mod store;

pub use format::{format_currency, format_multiple, format_percentage, parse_amount, round_half_away};
pub use metric::{Approach, EarningsBasis, Metric, MetricKind};
pub use snapshot::{ApproachResult, CalculationSnapshot, SnapshotError};
pub use store::{CanonicalValueStore, SnapshotCell};
