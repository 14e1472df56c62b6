//! Depth criteria and the two book representations a snapshot can take.
//!
//! A snapshot is the book truncated by a [`DepthCriterion`] and rendered
//! through a [`BookView`]. The trajectory compiler and the replay engine are
//! generic over the view, so the level/spread and volume/queue combinations
//! share one code path.

use serde::{Deserialize, Serialize};

use crate::engine::book::{Book, Level};
use crate::engine::types::{EngineError, EngineResult};

/// How far from the top of book a snapshot reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthCriterion {
    /// Best `n` price levels on each side.
    Level(usize),
    /// Every level within this price distance of the mid.
    Spread(u64),
}

impl DepthCriterion {
    pub fn validate(self) -> EngineResult<Self> {
        let value = match self {
            DepthCriterion::Level(n) => n as u64,
            DepthCriterion::Spread(s) => s,
        };
        if value == 0 {
            return Err(EngineError::InvalidDepth { value });
        }
        Ok(self)
    }
}

/// Inclusive price limits `(ask_limit, bid_limit)` for a spread criterion.
///
/// The mid is the integer midpoint of the best prices; when their sum is odd
/// the bid limit is nudged up by one so both limits sit the same distance from
/// the true mid.
pub fn spread_limits(book: &Book, spread: u64) -> (Option<u64>, Option<u64>) {
    let ask = book.best_ask().map(|(price, _)| price);
    let bid = book.best_bid().map(|(price, _)| price);
    match (ask, bid) {
        (None, None) => (None, None),
        (None, Some(b)) => (None, Some(b.saturating_sub(spread))),
        (Some(a), None) => (Some(a.saturating_add(spread)), None),
        (Some(a), Some(b)) => {
            let sum = a + b;
            let mid = sum / 2;
            let mut bid_limit = mid.saturating_sub(spread);
            if sum % 2 != 0 {
                bid_limit += 1;
            }
            (Some(mid.saturating_add(spread)), Some(bid_limit))
        }
    }
}

/// Renders one price level of the book.
pub trait BookView {
    type Level: Clone + std::fmt::Debug + PartialEq + Serialize;

    fn render(level: &Level) -> Self::Level;
}

/// Aggregated shares per price level.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeView;

/// Per-order queue detail per price level.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLevel {
    pub price: u64,
    pub shares: u64,
    pub orders: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub reference: u64,
    pub timestamp: u64,
    pub shares: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLevel {
    pub price: u64,
    pub queue: Vec<QueueEntry>,
}

impl BookView for VolumeView {
    type Level = VolumeLevel;

    fn render(level: &Level) -> VolumeLevel {
        VolumeLevel {
            price: level.price,
            shares: level.shares,
            orders: level.queue.len(),
        }
    }
}

impl BookView for QueueView {
    type Level = QueueLevel;

    fn render(level: &Level) -> QueueLevel {
        QueueLevel {
            price: level.price,
            queue: level
                .queue
                .iter()
                .map(|r| QueueEntry {
                    reference: r.reference,
                    timestamp: r.timestamp,
                    shares: r.remaining,
                })
                .collect(),
        }
    }
}

/// Both sides of a truncated book, best level first on each side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthSnapshot<L> {
    pub asks: Vec<L>,
    pub bids: Vec<L>,
}

impl<L> Default for DepthSnapshot<L> {
    fn default() -> Self {
        DepthSnapshot {
            asks: Vec::new(),
            bids: Vec::new(),
        }
    }
}

pub type VolumeSnapshot = DepthSnapshot<VolumeLevel>;
pub type QueueSnapshot = DepthSnapshot<QueueLevel>;

/// Capture `book` under `criterion` through view `V`.
pub fn capture<V: BookView>(book: &Book, criterion: DepthCriterion) -> DepthSnapshot<V::Level> {
    match criterion {
        DepthCriterion::Level(n) => DepthSnapshot {
            asks: book.asks_outward().take(n).map(V::render).collect(),
            bids: book.bids_outward().take(n).map(V::render).collect(),
        },
        DepthCriterion::Spread(spread) => {
            let (ask_limit, bid_limit) = spread_limits(book, spread);
            DepthSnapshot {
                asks: match ask_limit {
                    Some(limit) => book
                        .asks_outward()
                        .take_while(|level| level.price <= limit)
                        .map(V::render)
                        .collect(),
                    None => Vec::new(),
                },
                bids: match bid_limit {
                    Some(limit) => book
                        .bids_outward()
                        .take_while(|level| level.price >= limit)
                        .map(V::render)
                        .collect(),
                    None => Vec::new(),
                },
            }
        }
    }
}
