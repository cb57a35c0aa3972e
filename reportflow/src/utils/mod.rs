//! Shared helpers: timestamps, fingerprints, byte encoding and graph checks.

pub mod base64_bytes;
mod fingerprint;
pub mod timestamps;
pub mod validation;

pub use fingerprint::{sha256_hex, Fingerprinter};
pub use timestamps::{iso_timestamp, now_utc, Timestamp};
