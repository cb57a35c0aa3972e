//! Conversion of generator usage into cost.

use super::Usage;
use serde::{Deserialize, Serialize};

fn default_input_per_million() -> f64 {
    3.0
}

fn default_output_per_million() -> f64 {
    15.0
}

/// Per-million-unit prices for input and output units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// USD per million input units.
    #[serde(default = "default_input_per_million")]
    pub input_per_million_usd: f64,
    /// USD per million output units.
    #[serde(default = "default_output_per_million")]
    pub output_per_million_usd: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            input_per_million_usd: default_input_per_million(),
            output_per_million_usd: default_output_per_million(),
        }
    }
}

impl CostModel {
    /// Creates a cost model.
    #[must_use]
    pub fn new(input_per_million_usd: f64, output_per_million_usd: f64) -> Self {
        Self {
            input_per_million_usd,
            output_per_million_usd,
        }
    }

    /// A model that prices everything at zero.
    #[must_use]
    pub fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Cost of `usage` in USD.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.input_units as f64 * self.input_per_million_usd
            + usage.output_units as f64 * self.output_per_million_usd)
            / 1_000_000.0
    }
}
