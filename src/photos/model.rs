use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Relative path of a photo under the input root, components joined with `/`.
pub type FileKey = String;

/// Per-file metadata produced by one transform invocation.
pub type Record = Map<String, Value>;

/// File key → record. Sorted so that serialized output is stable.
pub type Metadata = BTreeMap<FileKey, Record>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Completed,
    Interrupted,
}

/// Result message sent by one worker when its shard loop exits.
#[derive(Debug, Clone)]
pub struct ShardOutcome {
    pub rank: usize,
    pub status: ShardStatus,
    pub metadata: Metadata,
    /// files in the shard
    pub total: usize,
    /// files that produced a record
    pub processed: usize,
    /// files skipped because the transform failed
    pub failed: usize,
}

impl ShardOutcome {
    pub fn empty(rank: usize, total: usize, status: ShardStatus) -> Self {
        Self {
            rank,
            status,
            metadata: Metadata::new(),
            total,
            processed: 0,
            failed: 0,
        }
    }
}

/// Merged output of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub metadata: Metadata,
    /// one entry per worker, ordered by rank
    pub shards: Vec<ShardOutcome>,
}

impl RunReport {
    /// True if any worker stopped before exhausting its shard.
    pub fn interrupted(&self) -> bool {
        self.shards
            .iter()
            .any(|s| s.status == ShardStatus::Interrupted)
    }

    pub fn failed(&self) -> usize {
        self.shards.iter().map(|s| s.failed).sum()
    }

    pub fn processed(&self) -> usize {
        self.shards.iter().map(|s| s.processed).sum()
    }
}

/// Summary of a run, printed at the end (as JSON with `--json`).
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct RunStats {
    pub total_files_scanned: usize,
    pub processed: usize,
    pub failed: usize,
    pub workers: usize,
    /// true if the run was cancelled before completion
    pub cancelled: bool,
    /// size → PSNR in dB, populated only when quality checking is enabled
    pub psnr: BTreeMap<u32, f64>,
}
