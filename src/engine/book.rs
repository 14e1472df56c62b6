use std::collections::{BTreeMap, VecDeque};

use ahash::AHashMap;
use tracing::{instrument, trace};

use crate::engine::types::{Action, ActionRecord, EngineError, EngineResult, Side};

/// How an Add is queued at its price level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    /// Every add joins the back of the queue (ITCH).
    #[default]
    Arrival,
    /// References are assigned in priority order; an add whose reference is
    /// not above every earlier add's is slotted into the queue by reference
    /// (TAQ). Replacements always join the back and leave that mark alone.
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resting {
    pub reference: u64,
    pub timestamp: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub price: u64,
    pub shares: u64,
    pub queue: VecDeque<Resting>,
}

impl Level {
    fn new(price: u64) -> Self {
        Level {
            price,
            shares: 0,
            queue: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Book {
    pub bids: BTreeMap<u64, Level>,
    pub asks: BTreeMap<u64, Level>,
    id_index: AHashMap<u64, (Side, u64)>,
    priority: QueuePriority,
    max_reference: u64,
}

impl PartialEq for Book {
    fn eq(&self, other: &Self) -> bool {
        // id_index is derived from the levels
        self.bids == other.bids
            && self.asks == other.asks
            && self.priority == other.priority
            && self.max_reference == other.max_reference
    }
}

impl Eq for Book {}

impl Book {
    pub fn new(priority: QueuePriority) -> Self {
        Book {
            priority,
            ..Default::default()
        }
    }

    /// Rebuild a book from its levels, e.g. when restoring a checkpoint.
    pub fn from_levels(
        priority: QueuePriority,
        max_reference: u64,
        bids: Vec<Level>,
        asks: Vec<Level>,
    ) -> Self {
        let mut book = Book::new(priority);
        book.max_reference = max_reference;
        for (side, levels) in [(Side::Buy, bids), (Side::Sell, asks)] {
            for level in levels {
                for resting in &level.queue {
                    book.id_index.insert(resting.reference, (side, level.price));
                }
                book.side_mut(side).insert(level.price, level);
            }
        }
        book
    }

    pub fn priority(&self) -> QueuePriority {
        self.priority
    }

    pub fn max_reference(&self) -> u64 {
        self.max_reference
    }

    pub fn order_count(&self) -> usize {
        self.id_index.len()
    }

    pub fn contains(&self, reference: u64) -> bool {
        self.id_index.contains_key(&reference)
    }

    pub fn best_bid(&self) -> Option<(u64, u64)> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, level)| (*price, level.shares))
    }

    pub fn best_ask(&self) -> Option<(u64, u64)> {
        self.asks
            .iter()
            .next()
            .map(|(price, level)| (*price, level.shares))
    }

    pub fn spread(&self) -> Option<u64> {
        let (ask, _) = self.best_ask()?;
        let (bid, _) = self.best_bid()?;
        Some(ask.saturating_sub(bid))
    }

    /// Shares resting at the best bid plus the best ask.
    pub fn top_of_book_shares(&self) -> u64 {
        self.best_bid().map_or(0, |(_, shares)| shares)
            + self.best_ask().map_or(0, |(_, shares)| shares)
    }

    /// Asks from best (lowest) outward.
    pub fn asks_outward(&self) -> impl Iterator<Item = &Level> {
        self.asks.values()
    }

    /// Bids from best (highest) outward.
    pub fn bids_outward(&self) -> impl Iterator<Item = &Level> {
        self.bids.values().rev()
    }

    /// Apply one decoded record. The log is never touched; only this book.
    #[instrument(level = "trace", skip(self), fields(index = record.index))]
    pub fn apply(&mut self, record: &ActionRecord) -> EngineResult<()> {
        let index = record.index;
        match record.action {
            Action::Add {
                reference,
                shares,
                price,
                side,
                ..
            } => self.add_resting_order(index, reference, side, price, shares, record.timestamp),
            Action::Delete { reference, .. } => self.remove_order(index, reference).map(|_| ()),
            Action::Cancel {
                reference,
                cancelled,
                ..
            } => self.reduce_order(index, reference, cancelled),
            Action::Execute {
                reference,
                executed,
                ..
            }
            | Action::ExecuteWithPrice {
                reference,
                executed,
                ..
            } => self.reduce_order(index, reference, executed),
            Action::Replace {
                reference,
                old_reference,
                shares,
                price,
                ..
            } => {
                // the new order keeps the old side and loses its queue position
                let (side, _) = self.remove_order(index, old_reference)?;
                if self.id_index.contains_key(&reference) {
                    return Err(EngineError::DuplicateOrder { index, reference });
                }
                self.push_back(side, price, reference, shares, record.timestamp);
                Ok(())
            }
            Action::CrossTrade { .. } | Action::NonCrossTrade { .. } => Ok(()),
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<u64, Level> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn add_resting_order(
        &mut self,
        index: usize,
        reference: u64,
        side: Side,
        price: u64,
        shares: u64,
        timestamp: u64,
    ) -> EngineResult<()> {
        if self.id_index.contains_key(&reference) {
            return Err(EngineError::DuplicateOrder { index, reference });
        }

        let in_sequence = reference > self.max_reference;
        if in_sequence {
            self.max_reference = reference;
        }

        match self.priority {
            QueuePriority::Reference if !in_sequence => {
                let level = self
                    .side_mut(side)
                    .entry(price)
                    .or_insert_with(|| Level::new(price));
                let slot = level.queue.partition_point(|r| r.reference < reference);
                level.queue.insert(
                    slot,
                    Resting {
                        reference,
                        timestamp,
                        remaining: shares,
                    },
                );
                level.shares += shares;
                self.id_index.insert(reference, (side, price));
            }
            _ => self.push_back(side, price, reference, shares, timestamp),
        }
        trace!(reference, price, shares, ?side, "order added");
        Ok(())
    }

    fn push_back(&mut self, side: Side, price: u64, reference: u64, shares: u64, timestamp: u64) {
        let level = self
            .side_mut(side)
            .entry(price)
            .or_insert_with(|| Level::new(price));
        level.queue.push_back(Resting {
            reference,
            timestamp,
            remaining: shares,
        });
        level.shares += shares;
        self.id_index.insert(reference, (side, price));
    }

    /// Remove an order entirely, returning where it rested.
    fn remove_order(&mut self, index: usize, reference: u64) -> EngineResult<(Side, u64)> {
        let (side, price) = self
            .id_index
            .remove(&reference)
            .ok_or(EngineError::UnknownOrder { index, reference })?;

        let levels = self.side_mut(side);
        let emptied = match levels.get_mut(&price) {
            Some(level) => {
                if let Some(pos) = level.queue.iter().position(|r| r.reference == reference) {
                    if let Some(resting) = level.queue.remove(pos) {
                        level.shares -= resting.remaining;
                    }
                }
                level.queue.is_empty()
            }
            None => return Err(EngineError::UnknownOrder { index, reference }),
        };
        if emptied {
            levels.remove(&price);
        }
        trace!(reference, price, ?side, "order removed");
        Ok((side, price))
    }

    /// Reduce an order; reductions reaching its remaining size remove it.
    fn reduce_order(&mut self, index: usize, reference: u64, shares: u64) -> EngineResult<()> {
        let (side, price) = *self
            .id_index
            .get(&reference)
            .ok_or(EngineError::UnknownOrder { index, reference })?;

        let remaining = self
            .side_mut(side)
            .get(&price)
            .and_then(|level| level.queue.iter().find(|r| r.reference == reference))
            .map(|r| r.remaining)
            .ok_or(EngineError::UnknownOrder { index, reference })?;

        if shares >= remaining {
            self.remove_order(index, reference)?;
            return Ok(());
        }

        if let Some(level) = self.side_mut(side).get_mut(&price) {
            if let Some(resting) = level.queue.iter_mut().find(|r| r.reference == reference) {
                resting.remaining -= shares;
            }
            level.shares -= shares;
        }
        trace!(reference, shares, "order reduced");
        Ok(())
    }
}
