//! Recursive suspicious-code scanner.
//!
//! One unit is one extension directory tree. The scanner walks the tree,
//! checks eligible source files against a table of suspicious call
//! patterns, and appends findings to the batch's results document. An
//! unreadable directory is logged and skipped; the scan itself keeps going,
//! so one bad mount never aborts the whole audit.

use chrono::{DateTime, Utc};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::engine::processor::{ItemProcessor, Outcome, WorkUnitId};
use crate::error::{Result, SuiteError};
use crate::store::StateStore;

/// Suspicious call patterns and the issue each one reports.
///
/// One finding per file: the first matching pattern wins. Matching is
/// case-insensitive.
const SUSPICIOUS_PATTERNS: &[(&str, &str)] = &[
    (r"eval\s*\(", "Potential code execution (eval)"),
    (r"gzinflate\s*\(", "Obfuscated code (gzinflate)"),
    (r"shell_exec\s*\(", "System command execution (shell_exec)"),
    (r"system\s*\(", "System command execution (system)"),
    (r"passthru\s*\(", "System command execution (passthru)"),
    (r"exec\s*\(", "System command execution (exec)"),
    (r"base64_decode\s*\(", "Obfuscated code (base64_decode)"),
];

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One suspicious file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Path of the flagged file
    pub file: String,

    /// What was found
    pub issue: String,

    /// Finding severity
    pub severity: Severity,

    /// When the file was flagged
    pub detected_at: DateTime<Utc>,
}

/// Batch processor that scans directory trees for suspicious code.
pub struct DirectoryScan {
    store: Arc<dyn StateStore>,
    results_key: String,
    policy: ScanConfig,
    patterns: RegexSet,
}

impl DirectoryScan {
    pub fn new(
        store: Arc<dyn StateStore>,
        results_key: impl Into<String>,
        policy: ScanConfig,
    ) -> Result<Self> {
        let patterns = regex::RegexSetBuilder::new(
            SUSPICIOUS_PATTERNS.iter().map(|(pattern, _)| *pattern),
        )
        .case_insensitive(true)
        .build()
        .map_err(|err| SuiteError::internal(format!("invalid scan pattern: {}", err)))?;

        Ok(Self {
            store,
            results_key: results_key.into(),
            policy,
            patterns,
        })
    }

    /// Findings accumulated by the current batch.
    pub async fn findings(&self) -> Result<Vec<Finding>> {
        Ok(self
            .store
            .as_ref()
            .get_json(&self.results_key)
            .await?
            .unwrap_or_default())
    }

    async fn append_findings(&self, mut findings: Vec<Finding>) -> Result<()> {
        if findings.is_empty() {
            return Ok(());
        }
        let mut all = self.findings().await?;
        all.append(&mut findings);
        self.store.as_ref().set_json(&self.results_key, &all).await
    }
}

#[async_trait::async_trait]
impl ItemProcessor for DirectoryScan {
    fn kind(&self) -> &str {
        "scan"
    }

    async fn process(&self, unit: &WorkUnitId) -> Outcome {
        let root = PathBuf::from(unit.as_str());
        let patterns = self.patterns.clone();
        let policy = self.policy.clone();

        let walked = tokio::task::spawn_blocking(move || walk_tree(&root, &patterns, &policy)).await;

        let findings = match walked {
            Ok(findings) => findings,
            Err(join_err) => {
                return Outcome::PermanentFailure(format!("scan task failed: {}", join_err))
            }
        };

        debug!(unit = %unit, findings = findings.len(), "Directory scanned");
        match self.append_findings(findings).await {
            Ok(()) => Outcome::Success,
            Err(err) => Outcome::PermanentFailure(format!("failed to record findings: {}", err)),
        }
    }
}

/// Walk one directory tree, collecting findings. I/O trouble is logged and
/// the affected subtree skipped.
fn walk_tree(root: &Path, patterns: &RegexSet, policy: &ScanConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Unreadable directory; skipping");
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "Unreadable entry; skipping");
                    continue;
                }
            };

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Stat failed; skipping");
                    continue;
                }
            };

            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                if let Some(finding) = scan_file(&path, metadata.len(), patterns, policy) {
                    findings.push(finding);
                }
            }
        }
    }

    findings
}

fn scan_file(path: &Path, size: u64, patterns: &RegexSet, policy: &ScanConfig) -> Option<Finding> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())?;
    if !policy.extensions.iter().any(|allowed| allowed == &extension) {
        return None;
    }

    if size > policy.max_file_size {
        debug!(path = %path.display(), size = size, "File exceeds scan size cap; skipping");
        return None;
    }

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Unreadable file; skipping");
            return None;
        }
    };
    let content = String::from_utf8_lossy(&bytes);

    // First matching pattern wins; one finding per file
    let matched = patterns.matches(&content).iter().min()?;
    let (_, issue) = SUSPICIOUS_PATTERNS[matched];

    Some(Finding {
        file: path.to_string_lossy().into_owned(),
        issue: issue.to_string(),
        severity: Severity::High,
        detected_at: Utc::now(),
    })
}

/// Derive the scan workload: the immediate subdirectories of each root,
/// minus trusted slugs and user-ignored paths.
pub fn discover_scan_targets(roots: &[PathBuf], policy: &ScanConfig) -> Vec<WorkUnitId> {
    let mut targets = Vec::new();

    for root in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "Unreadable scan root; skipping");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let slug = entry.file_name().to_string_lossy().into_owned();
            if policy.trusted_slugs.iter().any(|trusted| trusted == &slug) {
                debug!(slug = %slug, "Trusted extension; not scanned");
                continue;
            }
            if policy.ignored_paths.iter().any(|ignored| ignored == &slug) {
                debug!(slug = %slug, "Ignored by configuration; not scanned");
                continue;
            }

            targets.push(WorkUnitId::new(path.to_string_lossy().into_owned()));
        }
    }

    targets.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    targets
}
