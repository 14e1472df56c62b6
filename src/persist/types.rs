use std::path::PathBuf;

use thiserror::Error;

use crate::engine::book::QueuePriority;
use crate::engine::types::EngineError;

#[derive(Debug, Error)]
pub enum PersistError {
    /// Missing, unreadable or undecodable input. Recoverable per symbol.
    #[error("data unavailable at {path}: {reason}")]
    DataUnavailable { path: PathBuf, reason: String },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("checkpoint format version {found}, expected {expected}")]
    FormatMismatch { found: u32, expected: u32 },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl PersistError {
    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, PersistError::DataUnavailable { .. })
    }

    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PersistError::DataUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type PersistResult<T> = Result<T, PersistError>;

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Serializable form of a full checkpoint set for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointData {
    pub version: u32,
    pub interval: usize,
    pub priority: QueuePriority,
    /// Length of the log the checkpoints were built from.
    pub log_len: usize,
    pub entries: Vec<CheckpointEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointEntry {
    pub position: usize,
    pub max_reference: u64,
    pub bid_side: Vec<SnapshotLevel>,
    pub ask_side: Vec<SnapshotLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotLevel {
    pub price: u64,
    pub orders: Vec<SnapshotResting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SnapshotResting {
    pub reference: u64,
    pub timestamp: u64,
    pub remaining: u64,
}
