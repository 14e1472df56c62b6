use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::engine::log::{ActionLog, LogOptions};
use crate::market_data::stats::{MarketStats, SessionStats};
use crate::persist::checkpoint;
use crate::persist::types::{CheckpointData, PersistError, PersistResult};
use crate::persist::{CheckpointStore, LogStore};

const ACTIONS_EXT: &str = "bin";
const STATS_EXT: &str = "json";
const CHECKPOINT_EXT: &str = "ckpt.zst";
const ZSTD_LEVEL: i32 = 3;

/// Session directory of per-symbol files:
/// `SYMBOL.bin[.zst]`, `SYMBOL.json[.zst]` and `SYMBOL.ckpt.zst`.
#[derive(Debug, Clone)]
pub struct FsLogStore {
    root: PathBuf,
    options: LogOptions,
}

impl FsLogStore {
    pub fn new(root: impl Into<PathBuf>, options: LogOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    /// `<data_dir>/<session>`.
    pub fn for_session(data_dir: impl AsRef<Path>, session: &str, options: LogOptions) -> Self {
        Self::new(data_dir.as_ref().join(session), options)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checkpoint_path(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("{}.{}", symbol, CHECKPOINT_EXT))
    }

    /// Prefer the compressed file; fall back to the plain one.
    async fn locate(&self, symbol: &str, ext: &str) -> PathBuf {
        let compressed = self.root.join(format!("{}.{}.zst", symbol, ext));
        match tokio::fs::try_exists(&compressed).await {
            Ok(true) => compressed,
            _ => self.root.join(format!("{}.{}", symbol, ext)),
        }
    }

    async fn read(&self, path: &Path) -> PersistResult<Vec<u8>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PersistError::unavailable(path, e))?;
        if path.extension().is_some_and(|ext| ext == "zst") {
            zstd::decode_all(bytes.as_slice()).map_err(|e| PersistError::unavailable(path, e))
        } else {
            Ok(bytes)
        }
    }

    /// Write a log as `SYMBOL.bin.zst`.
    pub async fn save_actions(&self, symbol: &str, log: &ActionLog) -> PersistResult<PathBuf> {
        let path = self.root.join(format!("{}.{}.zst", symbol, ACTIONS_EXT));
        let bytes = zstd::encode_all(log.to_bytes().as_slice(), ZSTD_LEVEL)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        write_file(&path, &bytes).await?;
        Ok(path)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> PersistResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistError::unavailable(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PersistError::unavailable(path, e))
}

#[async_trait]
impl LogStore for FsLogStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn load_actions(&self, symbol: &str) -> PersistResult<ActionLog> {
        let path = self.locate(symbol, ACTIONS_EXT).await;
        let bytes = self.read(&path).await?;
        let log = ActionLog::from_bytes(&bytes, self.options)?;
        debug!(records = log.len(), path = %path.display(), "action log loaded");
        Ok(log)
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn load_market_stats(&self, symbol: &str) -> PersistResult<MarketStats> {
        let path = self.locate(symbol, STATS_EXT).await;
        let bytes = self.read(&path).await?;
        let mut session: SessionStats = serde_json::from_slice(&bytes)
            .map_err(|e| PersistError::unavailable(&path, e))?;
        let mut stats = session
            .remove(symbol)
            .ok_or_else(|| PersistError::unavailable(&path, format!("no document for {}", symbol)))?;
        if stats.symbol.is_empty() {
            stats.symbol = symbol.to_string();
        }
        stats.validate()?;
        Ok(stats)
    }

    async fn list_symbols(&self) -> PersistResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| PersistError::unavailable(&self.root, e))?;
        let mut symbols = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistError::unavailable(&self.root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let symbol = name
                .strip_suffix(".bin.zst")
                .or_else(|| name.strip_suffix(".bin"));
            if let Some(symbol) = symbol {
                symbols.push(symbol.to_string());
            }
        }
        symbols.sort_unstable();
        symbols.dedup();
        Ok(symbols)
    }
}

#[async_trait]
impl CheckpointStore for FsLogStore {
    async fn save_checkpoints(&self, symbol: &str, data: &CheckpointData) -> PersistResult<()> {
        let path = self.checkpoint_path(symbol);
        let bytes = checkpoint::encode(data)?;
        write_file(&path, &bytes).await?;
        debug!(entries = data.entries.len(), path = %path.display(), "checkpoints saved");
        Ok(())
    }

    async fn load_checkpoints(&self, symbol: &str) -> PersistResult<Option<CheckpointData>> {
        let path = self.checkpoint_path(symbol);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::unavailable(&path, e)),
        };
        match checkpoint::decode(&bytes) {
            Ok(data) => Ok(Some(data)),
            Err(err) => {
                // a stale or truncated file only costs a rebuild
                warn!(path = %path.display(), error = %err, "ignoring unreadable checkpoints");
                Ok(None)
            }
        }
    }
}
