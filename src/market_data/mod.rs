pub mod stats;

pub use stats::{IntervalRow, MarketStats, SessionStats};
