//! Vision analysis client: tags, description, and dominant colors for a
//! retrievable image URL.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod stub;

pub use http::HttpAnalysisClient;
pub use stub::StubAnalysis;

/// Service contract bounds.
pub const MIN_TAGS: usize = 5;
pub const MAX_TAGS: usize = 10;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_COLORS: usize = 3;

/// Errors from the analysis service. Every variant lands on the job row
/// under the single `analysis_error` taxonomy kind.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Transport(String),

    #[error("analysis request timed out after {0:?}")]
    Timeout(Duration),

    #[error("analysis quota exhausted: {0}")]
    Quota(String),

    #[error("analysis service error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("malformed analysis response: {0}")]
    Malformed(String),
}

/// Structured result of a successful analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    pub tags: Vec<String>,
    pub description: String,
    pub dominant_colors: Vec<String>,
}

fn color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^#[0-9A-Fa-f]{6}$").expect("valid color regex"))
}

impl ImageAnalysis {
    /// Enforces the service contract on a parsed response.
    ///
    /// Out-of-bounds tag counts and malformed colors are surfaced as
    /// [`AnalysisError::Malformed`]; an over-long description is truncated
    /// rather than rejected since nothing downstream depends on its tail.
    pub fn validated(mut self) -> Result<Self, AnalysisError> {
        if self.tags.len() < MIN_TAGS || self.tags.len() > MAX_TAGS {
            return Err(AnalysisError::Malformed(format!(
                "expected {}..={} tags, got {}",
                MIN_TAGS,
                MAX_TAGS,
                self.tags.len()
            )));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(AnalysisError::Malformed("empty tag".to_string()));
        }

        if self.dominant_colors.len() > MAX_COLORS {
            return Err(AnalysisError::Malformed(format!(
                "expected at most {} dominant colors, got {}",
                MAX_COLORS,
                self.dominant_colors.len()
            )));
        }
        for color in &self.dominant_colors {
            if !color_pattern().is_match(color) {
                return Err(AnalysisError::Malformed(format!(
                    "invalid dominant color '{}'",
                    color
                )));
            }
        }

        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            self.description = self
                .description
                .chars()
                .take(MAX_DESCRIPTION_CHARS)
                .collect();
        }

        Ok(self)
    }
}

/// Analyzes a retrievable image URL.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, url: &str) -> Result<ImageAnalysis, AnalysisError>;
}
