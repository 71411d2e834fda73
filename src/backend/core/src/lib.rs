#![allow(clippy::result_large_err)]
//! # ShopSuite Core
//!
//! Self-rescheduling batch engine for storefront maintenance work.
//!
//! ## Architecture
//!
//! - **Engine**: Time-boxed batch slices driven by one-shot triggers, with
//!   pause/resume, cooperative stop, and stuck-item reclamation
//! - **Store**: Persistent state seam holding status records, queue
//!   snapshots, and per-unit markers
//! - **Scheduler**: One-shot trigger scheduling with at most one pending
//!   firing per batch kind
//! - **Processors**: AI content enrichment and recursive suspicious-code
//!   scanning
//! - **Providers**: Text generation and vision analysis upstreams
//! - **Telemetry**: Structured logging and metrics infrastructure

pub mod config;
pub mod engine;
pub mod error;
pub mod processors;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SuiteError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, EngineConfig, ScanConfig};
    pub use crate::engine::{
        BackoffHandler, BatchController, BatchKeys, BatchRuntime, BatchState, BatchStatus,
        ItemProcessor, NextAction, Outcome, QueueManager, SliceExecutor, StatusCell, StopFlag,
        WorkUnitId,
    };
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SuiteError};
    pub use crate::processors::{
        discover_scan_targets, ContentEnrichment, ContentSource, DirectoryScan, Finding, Severity,
    };
    pub use crate::providers::{
        ContentGenerator, ContentItem, GeneratedMeta, ImageAnalysis, ProviderError,
        VisionAnalyzer,
    };
    pub use crate::scheduler::{
        ManualScheduler, ScheduledTrigger, TokioScheduler, TriggerHandler, TriggerScheduler,
    };
    pub use crate::store::{Marker, MemoryStore, StateStore, CLAIM_MARKER, TERMINAL_MARKER};
}
