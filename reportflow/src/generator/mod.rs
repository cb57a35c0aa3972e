//! The content-generator seam.
//!
//! A [`ContentGenerator`] turns a prompt plus optional binary attachments
//! into free-form text. It is an external collaborator: latency, transport
//! failures and unparseable answers are all expected.

mod cost;
mod timeout;

pub use cost::CostModel;
pub use timeout::TimeoutGenerator;

use crate::errors::PassError;
use crate::utils::{base64_bytes, sha256_hex, Fingerprinter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A binary file sent alongside a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name.
    pub name: String,
    /// MIME type.
    pub media_type: String,
    /// Raw bytes, base64 encoded when serialized.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment.
    #[must_use]
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data,
        }
    }

    /// Returns the bytes as standard base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64_bytes::encode(&self.data)
    }
}

/// One generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Marker identifying the stage (and document) issuing the request.
    pub label: String,
    /// System prompt.
    pub system_prompt: String,
    /// User prompt.
    pub user_prompt: String,
    /// Binary attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Output budget.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl GenerationRequest {
    /// SHA-256 over everything that influences the answer.
    ///
    /// The label is excluded so identical payloads fingerprint identically.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut fp = Fingerprinter::new()
            .part(&self.system_prompt)
            .part(&self.user_prompt)
            .part(self.max_tokens.to_le_bytes())
            .part(self.temperature.to_le_bytes());
        for attachment in &self.attachments {
            fp = fp
                .part(&attachment.media_type)
                .part(sha256_hex(&attachment.data));
        }
        fp.finish()
    }
}

/// Units consumed by generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt-side units.
    pub input_units: u64,
    /// Completion-side units.
    pub output_units: u64,
}

impl Usage {
    /// Creates a usage record.
    #[must_use]
    pub fn new(input_units: u64, output_units: u64) -> Self {
        Self {
            input_units,
            output_units,
        }
    }

    /// Adds another usage record to this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_units = self.input_units.saturating_add(other.input_units);
        self.output_units = self.output_units.saturating_add(other.output_units);
    }

    /// Total units.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_units.saturating_add(self.output_units)
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Self {
        iter.fold(Usage::default(), |mut acc, u| {
            acc.accumulate(&u);
            acc
        })
    }
}

/// A generator answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Free-form text; may or may not contain structured data.
    pub text: String,
    /// Units consumed.
    pub usage: Usage,
}

impl GenerationResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// Produces free-form text from a prompt.
///
/// Implementations report transport problems as [`PassError::Transport`]
/// and elapsed calls as [`PassError::Timeout`].
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generates a response for the request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, PassError>;
}
