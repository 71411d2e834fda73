//! External AI provider seams.
//!
//! Content enrichment talks to two upstreams: a text generator for meta
//! titles and descriptions, and an optional vision service for image alt
//! text. Both are quota-limited third parties, so the error type keeps
//! "slow down" separate from "this item cannot be enriched".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a provider call did not produce a result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider is throttling; the whole batch should back off.
    #[error("provider rate limit hit")]
    RateLimited,

    /// The call failed for a reason retrying will not fix.
    #[error("provider call failed: {0}")]
    Failed(String),
}

/// A content item as seen by the enrichment processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

/// Generated metadata for one content item. Fields the provider declined to
/// produce stay `None` and leave existing values untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Result of analyzing one product image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Text generation upstream.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate metadata for `item`.
    async fn generate_meta(&self, item: &ContentItem)
        -> std::result::Result<GeneratedMeta, ProviderError>;
}

/// Vision analysis upstream.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Describe the image at `image_url`.
    async fn analyze_image(
        &self,
        image_url: &str,
    ) -> std::result::Result<ImageAnalysis, ProviderError>;
}
