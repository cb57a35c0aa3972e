//! Parsing and validation of generator text.
//!
//! - [`extract_json`]: tolerant extraction of a JSON object from free text
//! - [`ShapeValidator`]: per-stage structural checks that never reject output
//! - [`migrate_to_current`]: one-time upgrade of legacy field names

mod json_extract;
mod schema;
mod shape;

pub use json_extract::{extract_json, ExtractedJson, ExtractionStrategy, JsonExtractError};
pub use schema::{migrate_to_current, normalize_generated, SCHEMA_VERSION};
pub use shape::{AcceptAny, FieldKind, ObjectShape, ShapeError, ShapeValidator};
