//! Persisted backtest runs, reusable to skip recomputation.

use chrono::{DateTime, Utc};
use ledger_core::types::{BacktestDateRange, BacktestRun};
use ledger_core::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores one JSON file per `BacktestRun`, keyed by
/// (strategy id, window start, window end).
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    directory: PathBuf,
}

impl CheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_name(strategy_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        // Strategy ids may contain path-hostile characters.
        let sanitized: String = strategy_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!(
            "{sanitized}_{}_{}.json",
            start.format("%Y%m%dT%H%M%S"),
            end.format("%Y%m%dT%H%M%S")
        )
    }

    fn path_for(&self, strategy_id: &str, range: &BacktestDateRange) -> PathBuf {
        self.directory
            .join(Self::file_name(strategy_id, range.start, range.end))
    }

    /// Persist a run under its (strategy, window) key.
    pub fn save(&self, run: &BacktestRun) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(Self::file_name(
            &run.strategy_id,
            run.start,
            run.end,
        ));
        let file = fs::File::create(&path)?;
        serde_json::to_writer(file, run)?;
        debug!(path = %path.display(), strategy = %run.strategy_id, "Saved checkpoint");
        Ok(path)
    }

    /// Load the checkpoint for (strategy, window), if one was persisted.
    pub fn load(
        &self,
        strategy_id: &str,
        range: &BacktestDateRange,
    ) -> Result<Option<BacktestRun>> {
        let path = self.path_for(strategy_id, range);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path)?;
        let run = serde_json::from_reader(file)?;
        debug!(path = %path.display(), strategy = %strategy_id, "Loaded checkpoint");
        Ok(Some(run))
    }
}
