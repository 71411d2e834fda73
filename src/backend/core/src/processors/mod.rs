//! Batch item processors.
//!
//! Two batch kinds ship with the crate:
//!
//! - [`ContentEnrichment`]: generates missing metadata for content items
//!   through AI providers, one item per unit
//! - [`DirectoryScan`]: recursively scans extension directories for
//!   suspicious code patterns, one directory tree per unit

pub mod enrichment;
pub mod scan;

pub use enrichment::{ContentEnrichment, ContentSource};
pub use scan::{discover_scan_targets, DirectoryScan, Finding, Severity};
