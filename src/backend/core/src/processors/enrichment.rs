//! AI content enrichment processor.
//!
//! One unit is one content item. The processor fetches the item, asks the
//! text generator for metadata, applies whatever came back, and optionally
//! runs vision analysis on the item's image. Items are retried on later
//! batches until they carry a meta description, so a unit that failed
//! permanently once and succeeds later sheds its terminal verdict through
//! the engine's success path.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::processor::{ItemProcessor, Outcome, WorkUnitId};
use crate::error::{Result, SuiteError};
use crate::providers::{ContentGenerator, ContentItem, GeneratedMeta, ImageAnalysis, ProviderError, VisionAnalyzer};

/// Where content items live.
///
/// `pending_units` derives the workload: every item that lacks a meta
/// description. The engine separately excludes terminally failed units when
/// a batch starts.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Ids of items still missing a meta description.
    async fn pending_units(&self) -> Result<Vec<WorkUnitId>>;

    /// Fetch one item. `None` means the item no longer exists.
    async fn fetch(&self, unit: &WorkUnitId) -> Result<Option<ContentItem>>;

    /// Persist generated metadata onto the item.
    async fn apply_meta(&self, unit: &WorkUnitId, meta: &GeneratedMeta) -> Result<()>;

    /// Persist image analysis onto the item.
    async fn apply_image_analysis(&self, unit: &WorkUnitId, analysis: &ImageAnalysis)
        -> Result<()>;
}

/// Batch processor that enriches content items through AI providers.
pub struct ContentEnrichment {
    source: Arc<dyn ContentSource>,
    generator: Arc<dyn ContentGenerator>,
    vision: Option<Arc<dyn VisionAnalyzer>>,
    throttle: Duration,
}

impl ContentEnrichment {
    pub fn new(source: Arc<dyn ContentSource>, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            source,
            generator,
            vision: None,
            throttle: Duration::from_secs(1),
        }
    }

    /// Enable image analysis for items that carry an image.
    pub fn with_vision(mut self, vision: Arc<dyn VisionAnalyzer>) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Override the pause between items.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// The workload a new batch should cover.
    pub async fn pending_workload(&self) -> Result<Vec<WorkUnitId>> {
        self.source.pending_units().await
    }

    /// Map a content-source fault to an outcome. Retryable store trouble
    /// pauses the batch instead of condemning the unit.
    fn source_fault(unit: &WorkUnitId, err: SuiteError) -> Outcome {
        if err.is_retryable() {
            warn!(unit = %unit, error = %err, "Content source unavailable; backing off");
            Outcome::RateLimited
        } else {
            Outcome::PermanentFailure(format!("content source error: {}", err))
        }
    }
}

#[async_trait]
impl ItemProcessor for ContentEnrichment {
    fn kind(&self) -> &str {
        "enrichment"
    }

    fn throttle(&self) -> Option<Duration> {
        Some(self.throttle)
    }

    async fn process(&self, unit: &WorkUnitId) -> Outcome {
        let item = match self.source.fetch(unit).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                return Outcome::PermanentFailure("content item no longer exists".to_string())
            }
            Err(err) => return Self::source_fault(unit, err),
        };

        let meta = match self.generator.generate_meta(&item).await {
            Ok(meta) => meta,
            Err(ProviderError::RateLimited) => return Outcome::RateLimited,
            Err(ProviderError::Failed(reason)) => {
                return Outcome::PermanentFailure(format!("meta generation failed: {}", reason))
            }
        };

        if let Err(err) = self.source.apply_meta(unit, &meta).await {
            return Self::source_fault(unit, err);
        }
        debug!(unit = %unit, "Metadata applied");

        if let (Some(vision), Some(image_url)) = (&self.vision, &item.image_url) {
            let analysis = match vision.analyze_image(image_url).await {
                Ok(analysis) => analysis,
                Err(ProviderError::RateLimited) => return Outcome::RateLimited,
                Err(ProviderError::Failed(reason)) => {
                    return Outcome::PermanentFailure(format!(
                        "image analysis failed: {}",
                        reason
                    ))
                }
            };

            if let Err(err) = self.source.apply_image_analysis(unit, &analysis).await {
                return Self::source_fault(unit, err);
            }
            debug!(unit = %unit, "Image analysis applied");
        }

        Outcome::Success
    }
}
