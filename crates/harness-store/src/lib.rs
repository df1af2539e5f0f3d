// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run Store and Artifact Writer (§4.1): deterministic, crash-safe
//! placement of every artifact under `RUN_BASE/<run_id>/<flow_key>/`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use harness_error::{ErrorCode, HarnessError};

/// Default per-artifact byte cap before a write fails with `CapacityExceeded`.
pub const DEFAULT_ARTIFACT_CAP_BYTES: u64 = 8 * 1024 * 1024;

/// Maximum size of a single `append_jsonl` record, enforced for line
/// atomicity under concurrent appenders.
pub const MAX_JSONL_LINE_BYTES: usize = 64 * 1024;

/// Crash-safe writer rooted at one run's directory.
///
/// All paths passed to [`RunStore`] methods are relative to the run root;
/// the store refuses to write outside it.
#[derive(Debug, Clone)]
pub struct RunStore {
    run_root: PathBuf,
    artifact_cap_bytes: u64,
}

impl RunStore {
    /// Create a store rooted at `<base>/<run_id>`, creating the directory
    /// if it does not already exist.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if the run root cannot be created.
    pub fn new(base: impl AsRef<Path>, run_id: &str) -> Result<Self, HarnessError> {
        let run_root = base.as_ref().join(run_id);
        fs::create_dir_all(&run_root).map_err(|e| {
            HarnessError::new(ErrorCode::ConfigError, "failed to create run root")
                .with_context("run_root", run_root.display().to_string())
                .with_source(e)
        })?;
        Ok(Self {
            run_root,
            artifact_cap_bytes: DEFAULT_ARTIFACT_CAP_BYTES,
        })
    }

    /// Override the per-artifact capacity cap (default 8 MiB).
    #[must_use]
    pub fn with_artifact_cap_bytes(mut self, cap: u64) -> Self {
        self.artifact_cap_bytes = cap;
        self
    }

    /// The run's root directory.
    #[must_use]
    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    /// Deterministic path (relative to the run root) to a step's receipt file.
    ///
    /// Suitable for passing directly to [`RunStore::write`]/[`RunStore::read`].
    #[must_use]
    pub fn receipt_path(&self, flow_key: &str, step_id: &str, agent_key: &str) -> PathBuf {
        PathBuf::from(flow_key)
            .join("receipts")
            .join(format!("{}-{}.json", normalize(step_id), normalize(agent_key)))
    }

    /// Deterministic path (relative to the run root) to a step's handoff envelope file.
    #[must_use]
    pub fn handoff_path(&self, flow_key: &str, step_id: &str, agent_key: &str) -> PathBuf {
        PathBuf::from(flow_key)
            .join("handoffs")
            .join(format!("{}-{}.json", normalize(step_id), normalize(agent_key)))
    }

    /// Deterministic path (relative to the run root) to a step's structured log file.
    #[must_use]
    pub fn log_path(&self, flow_key: &str, step_id: &str) -> PathBuf {
        PathBuf::from(flow_key).join("logs").join(format!("{}.jsonl", normalize(step_id)))
    }

    /// Deterministic path (relative to the run root) to a step's transport transcript file.
    #[must_use]
    pub fn transcript_path(&self, flow_key: &str, step_id: &str, agent_key: &str, engine: &str) -> PathBuf {
        PathBuf::from(flow_key).join("llm").join(format!(
            "{}-{}-{}.jsonl",
            normalize(step_id),
            normalize(agent_key),
            normalize(engine)
        ))
    }

    /// Path (relative to the run root) to a flow's routing decisions log.
    #[must_use]
    pub fn routing_decisions_path(&self, flow_key: &str) -> PathBuf {
        PathBuf::from(flow_key).join("routing").join("decisions.jsonl")
    }

    /// Path (relative to the run root) to a named routing injection artifact.
    #[must_use]
    pub fn routing_injection_path(&self, flow_key: &str, name: &str) -> PathBuf {
        PathBuf::from(flow_key)
            .join("routing")
            .join("injections")
            .join(format!("{}.json", normalize(name)))
    }

    /// Path (relative to the run root) to the run-level log.
    #[must_use]
    pub fn run_log_path(&self) -> PathBuf {
        PathBuf::from("logs").join("run.jsonl")
    }

    /// Atomically write `bytes` to `path` (relative to the run root): write
    /// to a temp sibling file, fsync, then rename into place.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] with [`ErrorCode::PathViolation`] if `path`
    /// escapes the run root, [`ErrorCode::CapacityExceeded`] if `bytes`
    /// exceeds the configured artifact cap, or a wrapped I/O error otherwise.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<PathBuf, HarnessError> {
        let abs = self.resolve(path)?;
        self.check_capacity(bytes.len() as u64)?;

        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let parent = abs.parent().unwrap_or(&self.run_root);
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
            HarnessError::new(ErrorCode::Internal, "failed to create temp sibling file")
                .with_context("dir", parent.display().to_string())
                .with_source(e)
        })?;
        tmp.write_all(bytes).map_err(|e| io_error(&abs, e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(&abs, e))?;
        tmp.persist(&abs).map_err(|e| {
            HarnessError::new(ErrorCode::Internal, "failed to rename temp file into place")
                .with_context("path", abs.display().to_string())
                .with_source(e.error)
        })?;
        Ok(abs)
    }

    /// Append one JSON-serializable record as a line to a JSONL file,
    /// guaranteeing line atomicity for records up to [`MAX_JSONL_LINE_BYTES`].
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if the record serializes to a line larger
    /// than [`MAX_JSONL_LINE_BYTES`], `path` escapes the run root, or the
    /// append itself fails.
    pub fn append_jsonl<T: serde::Serialize>(&self, path: &Path, record: &T) -> Result<(), HarnessError> {
        let abs = self.resolve(path)?;
        let mut line = serde_json::to_string(record).map_err(|e| {
            HarnessError::new(ErrorCode::Internal, "failed to serialize JSONL record").with_source(e)
        })?;
        if line.len() > MAX_JSONL_LINE_BYTES {
            return Err(HarnessError::new(
                ErrorCode::CapacityExceeded,
                "JSONL record exceeds the 64 KiB line-atomicity limit",
            )
            .with_context("path", abs.display().to_string())
            .with_context("line_bytes", line.len().to_string()));
        }
        line.push('\n');

        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&abs)
            .map_err(|e| io_error(&abs, e))?;
        file.write_all(line.as_bytes()).map_err(|e| io_error(&abs, e))?;
        file.sync_all().map_err(|e| io_error(&abs, e))?;
        Ok(())
    }

    /// Read an entire artifact back from disk, relative to the run root.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if `path` escapes the run root or the file
    /// cannot be read.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>, HarnessError> {
        let abs = self.resolve(path)?;
        fs::read(&abs).map_err(|e| {
            HarnessError::new(ErrorCode::ArtifactMissing, "failed to read artifact")
                .with_context("path", abs.display().to_string())
                .with_source(e)
        })
    }

    /// Open an artifact for streaming/line-by-line reads, relative to the
    /// run root.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if `path` escapes the run root or the file
    /// cannot be opened.
    pub fn open(&self, path: &Path) -> Result<File, HarnessError> {
        let abs = self.resolve(path)?;
        File::open(&abs).map_err(|e| {
            HarnessError::new(ErrorCode::ArtifactMissing, "failed to open artifact")
                .with_context("path", abs.display().to_string())
                .with_source(e)
        })
    }

    fn check_capacity(&self, size: u64) -> Result<(), HarnessError> {
        if size > self.artifact_cap_bytes {
            return Err(HarnessError::new(
                ErrorCode::CapacityExceeded,
                "artifact exceeds the configured per-artifact capacity cap",
            )
            .with_context("size_bytes", size.to_string())
            .with_context("cap_bytes", self.artifact_cap_bytes.to_string()));
        }
        Ok(())
    }

    /// Resolve a relative path against the run root, rejecting anything
    /// that would escape it (absolute paths, `..` components).
    fn resolve(&self, path: &Path) -> Result<PathBuf, HarnessError> {
        if path.is_absolute() || path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(HarnessError::new(
                ErrorCode::PathViolation,
                "artifact path escapes the run root",
            )
            .with_context("path", path.display().to_string()));
        }
        Ok(self.run_root.join(path))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> HarnessError {
    HarnessError::new(ErrorCode::Internal, "I/O failure writing artifact")
        .with_context("path", path.display().to_string())
        .with_source(source)
}

/// Normalize a path component: lowercase, forward slashes, hyphens in
/// place of whitespace/underscore. No timestamps belong in filenames.
#[must_use]
pub fn normalize(component: &str) -> String {
    component
        .to_lowercase()
        .replace(['_', ' '], "-")
        .replace('\\', "/")
}
