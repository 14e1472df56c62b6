pub mod checkpoint;
pub mod fs;
pub mod types;
pub use types::*;
use async_trait::async_trait;

use crate::engine::log::ActionLog;
use crate::market_data::stats::MarketStats;

pub use fs::FsLogStore;

/// Read-only source of per-symbol session data.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn load_actions(&self, symbol: &str) -> PersistResult<ActionLog>;
    async fn load_market_stats(&self, symbol: &str) -> PersistResult<MarketStats>;
    async fn list_symbols(&self) -> PersistResult<Vec<String>>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoints(&self, symbol: &str, data: &CheckpointData) -> PersistResult<()>;
    /// `None` when nothing usable is stored for `symbol`.
    async fn load_checkpoints(&self, symbol: &str) -> PersistResult<Option<CheckpointData>>;
}
