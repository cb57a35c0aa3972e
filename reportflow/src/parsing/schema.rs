//! The versioned output schema and its migration.
//!
//! Generators and older persisted outputs use several spellings for the same
//! field. Migration renames them to the canonical spelling once, right after
//! parsing and when loading an older output, so read sites only ever see the
//! current schema.

use serde_json::{Map, Value};

/// Current schema version of stage output data.
pub const SCHEMA_VERSION: u32 = 2;

/// Legacy spelling and canonical spelling.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("yearly_data", "periods"),
    ("annual_data", "periods"),
    ("financials", "periods"),
    ("fiscal_year", "period"),
    ("fiscalYear", "period"),
    ("year", "period"),
    ("totalRevenue", "revenue"),
    ("total_revenue", "revenue"),
    ("annual_revenue", "revenue"),
    ("gross_revenue", "revenue"),
    ("netIncome", "net_income"),
    ("net_profit", "net_income"),
    ("grossProfit", "gross_profit"),
    ("qualityNotes", "quality_notes"),
    ("missingItems", "missing_items"),
    ("redFlags", "flags"),
    ("red_flags", "flags"),
    ("adjustedSde", "sde"),
    ("adjusted_sde", "sde"),
    ("sellers_discretionary_earnings", "sde"),
    ("adjustedEbitda", "ebitda"),
    ("adjusted_ebitda", "ebitda"),
];

/// Upgrades `data` written at `from_version` to [`SCHEMA_VERSION`].
#[must_use]
pub fn migrate_to_current(data: Value, from_version: u32) -> Value {
    if from_version >= SCHEMA_VERSION {
        return data;
    }
    rename_aliases(data)
}

/// Brings freshly generated data, which carries no version, to the current
/// schema.
#[must_use]
pub fn normalize_generated(data: Value) -> Value {
    rename_aliases(data)
}

fn rename_aliases(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            let mut legacy = Vec::new();
            for (key, inner) in map {
                let inner = rename_aliases(inner);
                match canonical_name(&key) {
                    Some(canonical) => legacy.push((canonical, inner)),
                    None => {
                        out.insert(key, inner);
                    }
                }
            }
            // The canonical spelling wins over any legacy spelling.
            for (canonical, inner) in legacy {
                out.entry(canonical.to_string()).or_insert(inner);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(rename_aliases).collect()),
        other => other,
    }
}

fn canonical_name(key: &str) -> Option<&'static str> {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_aliases_are_renamed() {
        let legacy = json!({
            "yearly_data": [{"fiscal_year": "2023", "totalRevenue": 500000, "netIncome": 50000}],
            "redFlags": ["late filings"]
        });
        let migrated = migrate_to_current(legacy, 1);
        assert_eq!(
            migrated,
            json!({
                "periods": [{"period": "2023", "revenue": 500000, "net_income": 50000}],
                "flags": ["late filings"]
            })
        );
    }

    #[test]
    fn test_canonical_spelling_wins() {
        let legacy = json!({"revenue": 1, "totalRevenue": 2});
        assert_eq!(migrate_to_current(legacy, 1), json!({"revenue": 1}));
    }

    #[test]
    fn test_current_version_untouched() {
        let data = json!({"year": 2023});
        assert_eq!(migrate_to_current(data.clone(), SCHEMA_VERSION), data);
    }
}
