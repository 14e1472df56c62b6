//! Per-interval market statistics for one security.
//!
//! Read-only. Documents are produced upstream and only ever deserialized here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::types::{EngineError, EngineResult, SchemaReason};

/// Nanoseconds in the default one-second interval.
pub const DEFAULT_INTERVAL_NS: u64 = 1_000_000_000;
/// 04:00 in nanoseconds since midnight.
pub const DEFAULT_START_NS: u64 = 4 * 3600 * DEFAULT_INTERVAL_NS;

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_NS
}

fn default_start() -> u64 {
    DEFAULT_START_NS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    #[serde(default)]
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval_ns: u64,
    #[serde(default = "default_start")]
    pub start_ns: u64,
    pub depth: usize,

    #[serde(default)]
    pub lob_ask_price: Vec<Vec<u64>>,
    #[serde(default)]
    pub lob_ask_shares: Vec<Vec<u64>>,
    #[serde(default)]
    pub lob_bid_price: Vec<Vec<u64>>,
    #[serde(default)]
    pub lob_bid_shares: Vec<Vec<u64>>,

    #[serde(default)]
    pub interval_open: Vec<u64>,
    #[serde(default)]
    pub interval_high: Vec<u64>,
    #[serde(default)]
    pub interval_high_ts: Vec<u64>,
    #[serde(default)]
    pub interval_low: Vec<u64>,
    #[serde(default)]
    pub interval_low_ts: Vec<u64>,
    #[serde(default)]
    pub interval_close: Vec<u64>,

    #[serde(default)]
    pub interval_bid_execute_volume: Vec<u64>,
    #[serde(default)]
    pub interval_ask_execute_volume: Vec<u64>,
    #[serde(default)]
    pub interval_bid_cancel_volume: Vec<u64>,
    #[serde(default)]
    pub interval_ask_cancel_volume: Vec<u64>,
    #[serde(default)]
    pub interval_bid_add_volume: Vec<u64>,
    #[serde(default)]
    pub interval_ask_add_volume: Vec<u64>,

    #[serde(default)]
    pub interval_midprice: Vec<f64>,
}

/// A session file: symbol to document.
pub type SessionStats = BTreeMap<String, MarketStats>;

/// One interval of a [`MarketStats`] document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalRow<'a> {
    pub interval: usize,
    pub start_ns: u64,
    pub ask_price: &'a [u64],
    pub ask_shares: &'a [u64],
    pub bid_price: &'a [u64],
    pub bid_shares: &'a [u64],
    pub open: u64,
    pub high: u64,
    pub high_ts: u64,
    pub low: u64,
    pub low_ts: u64,
    pub close: u64,
    pub bid_execute_volume: u64,
    pub ask_execute_volume: u64,
    pub bid_cancel_volume: u64,
    pub ask_cancel_volume: u64,
    pub bid_add_volume: u64,
    pub ask_add_volume: u64,
    pub midprice: f64,
}

impl MarketStats {
    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.interval_open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interval containing `timestamp`, if it falls inside the document.
    pub fn interval_of(&self, timestamp: u64) -> Option<usize> {
        if self.interval_ns == 0 || timestamp < self.start_ns {
            return None;
        }
        let interval = usize::try_from((timestamp - self.start_ns) / self.interval_ns).ok()?;
        (interval < self.len()).then_some(interval)
    }

    /// Borrow one interval. Call [`MarketStats::validate`] first; an index past
    /// the shortest column yields `InvalidReference`.
    pub fn row(&self, interval: usize) -> EngineResult<IntervalRow<'_>> {
        let out_of_bounds = || EngineError::InvalidReference {
            index: interval as i64,
            len: self.len(),
        };
        let scalar = |column: &[u64]| column.get(interval).copied().ok_or_else(out_of_bounds);
        let ladder = |column: &[Vec<u64>]| column.get(interval).map(Vec::len).ok_or_else(out_of_bounds);
        // ladder rows are checked up front so the indexing below cannot panic
        ladder(&self.lob_ask_price)?;
        ladder(&self.lob_ask_shares)?;
        ladder(&self.lob_bid_price)?;
        ladder(&self.lob_bid_shares)?;

        Ok(IntervalRow {
            interval,
            start_ns: self.start_ns + interval as u64 * self.interval_ns,
            ask_price: &self.lob_ask_price[interval],
            ask_shares: &self.lob_ask_shares[interval],
            bid_price: &self.lob_bid_price[interval],
            bid_shares: &self.lob_bid_shares[interval],
            open: scalar(&self.interval_open)?,
            high: scalar(&self.interval_high)?,
            high_ts: scalar(&self.interval_high_ts)?,
            low: scalar(&self.interval_low)?,
            low_ts: scalar(&self.interval_low_ts)?,
            close: scalar(&self.interval_close)?,
            bid_execute_volume: scalar(&self.interval_bid_execute_volume)?,
            ask_execute_volume: scalar(&self.interval_ask_execute_volume)?,
            bid_cancel_volume: scalar(&self.interval_bid_cancel_volume)?,
            ask_cancel_volume: scalar(&self.interval_ask_cancel_volume)?,
            bid_add_volume: scalar(&self.interval_bid_add_volume)?,
            ask_add_volume: scalar(&self.interval_ask_add_volume)?,
            midprice: self
                .interval_midprice
                .get(interval)
                .copied()
                .ok_or_else(out_of_bounds)?,
        })
    }

    /// Every column has one row per interval and every ladder row is `depth` wide.
    pub fn validate(&self) -> EngineResult<()> {
        let expected = self.len();
        let check = |column: &'static str, found: usize| {
            if found == expected {
                Ok(())
            } else {
                Err(EngineError::SchemaViolation {
                    index: 0,
                    reason: SchemaReason::ColumnLength {
                        column,
                        expected,
                        found,
                    },
                })
            }
        };

        check("interval_high", self.interval_high.len())?;
        check("interval_high_ts", self.interval_high_ts.len())?;
        check("interval_low", self.interval_low.len())?;
        check("interval_low_ts", self.interval_low_ts.len())?;
        check("interval_close", self.interval_close.len())?;
        check("interval_bid_execute_volume", self.interval_bid_execute_volume.len())?;
        check("interval_ask_execute_volume", self.interval_ask_execute_volume.len())?;
        check("interval_bid_cancel_volume", self.interval_bid_cancel_volume.len())?;
        check("interval_ask_cancel_volume", self.interval_ask_cancel_volume.len())?;
        check("interval_bid_add_volume", self.interval_bid_add_volume.len())?;
        check("interval_ask_add_volume", self.interval_ask_add_volume.len())?;
        check("interval_midprice", self.interval_midprice.len())?;

        for (column, ladder) in [
            ("lob_ask_price", &self.lob_ask_price),
            ("lob_ask_shares", &self.lob_ask_shares),
            ("lob_bid_price", &self.lob_bid_price),
            ("lob_bid_shares", &self.lob_bid_shares),
        ] {
            check(column, ladder.len())?;
            if let Some((index, row)) = ladder.iter().enumerate().find(|(_, row)| row.len() != self.depth) {
                return Err(EngineError::SchemaViolation {
                    index,
                    reason: SchemaReason::ColumnLength {
                        column,
                        expected: self.depth,
                        found: row.len(),
                    },
                });
            }
        }
        Ok(())
    }
}
