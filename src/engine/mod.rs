pub mod book;
pub mod checkpoint;
pub mod depth;
pub mod lineage;
pub mod log;
pub mod replay;
pub mod summary;
pub mod trajectory;
pub mod types;

pub use book::{Book, QueuePriority};
pub use checkpoint::{Checkpoint, Checkpoints};
pub use depth::{
    capture, BookView, DepthCriterion, DepthSnapshot, QueueSnapshot, QueueView, VolumeSnapshot,
    VolumeView,
};
pub use lineage::{lineage_of, resolve_lineage, Lineage};
pub use log::{ActionLog, LogOptions};
pub use replay::{CancelFlag, ReplayEngine, ReplayMode, ReplayState, ReplayStep, RunOutcome};
pub use summary::{summarize_trajectories, OrderSummary};
pub use trajectory::{
    compile_trajectory, compile_trajectory_with_queue_level, compile_trajectory_with_queue_spread,
    compile_trajectory_with_volume_level, compile_trajectory_with_volume_spread, CompileOptions,
    Latencies, TrajectoryPoint,
};
pub use types::{Action, ActionRecord, EngineError, EngineResult, RawRecord, Side};
