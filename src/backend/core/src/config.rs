//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Batch engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Directory scan configuration
    #[serde(default)]
    pub scan: ScanConfig,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: crate::telemetry::TelemetryConfig,
}

/// Timing knobs for the slice executor and backoff handler.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for one slice. Sized to stay well under typical
    /// request/CPU limits of the execution host.
    #[serde(with = "humantime_serde", default = "default_slice_budget")]
    pub slice_budget: Duration,

    /// Delay before the continuation trigger when a slice runs out of budget
    #[serde(with = "humantime_serde", default = "default_reschedule_delay")]
    pub reschedule_delay: Duration,

    /// Cool-down before resuming after a rate-limited outcome
    #[serde(with = "humantime_serde", default = "default_backoff_cooldown")]
    pub backoff_cooldown: Duration,

    /// Claim markers older than this are considered abandoned and reclaimed
    #[serde(with = "humantime_serde", default = "default_claim_staleness")]
    pub claim_staleness: Duration,

    /// Maximum retries for an optimistic status update before giving up
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,

    /// Maximum length of the reason stored in a terminal-failure marker
    #[serde(default = "default_max_failure_reason_len")]
    pub max_failure_reason_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slice_budget: default_slice_budget(),
            reschedule_delay: default_reschedule_delay(),
            backoff_cooldown: default_backoff_cooldown(),
            claim_staleness: default_claim_staleness(),
            max_cas_retries: default_max_cas_retries(),
            max_failure_reason_len: default_max_failure_reason_len(),
        }
    }
}

/// Policy for the recursive malware scanner.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Files larger than this are skipped
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// File extensions eligible for content scanning
    #[serde(default = "default_scan_extensions")]
    pub extensions: Vec<String>,

    /// Trusted directory slugs skipped during target discovery
    #[serde(default = "default_trusted_slugs")]
    pub trusted_slugs: Vec<String>,

    /// User-ignored path prefixes, relative to the scan root
    #[serde(default)]
    pub ignored_paths: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            extensions: default_scan_extensions(),
            trusted_slugs: default_trusted_slugs(),
            ignored_paths: Vec::new(),
        }
    }
}

// Default value functions
fn default_slice_budget() -> Duration { Duration::from_secs(20) }
fn default_reschedule_delay() -> Duration { Duration::ZERO }
fn default_backoff_cooldown() -> Duration { Duration::from_secs(60) }
fn default_claim_staleness() -> Duration { Duration::from_secs(600) }
fn default_max_cas_retries() -> u32 { 5 }
fn default_max_failure_reason_len() -> usize { 500 }
fn default_max_file_size() -> u64 { 2 * 1024 * 1024 }
fn default_scan_extensions() -> Vec<String> {
    vec!["php".to_string(), "phtml".to_string(), "inc".to_string()]
}
fn default_trusted_slugs() -> Vec<String> {
    [
        "woocommerce",
        "woocommerce-payments",
        "elementor",
        "jetpack",
        "wordpress-seo",
        "litespeed-cache",
        "updraftplus",
        "wpforms-lite",
        "astra",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SHOPSUITE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SHOPSUITE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
