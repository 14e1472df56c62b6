use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::engine::lineage::{lineage_of, Lineage};
use crate::engine::log::ActionLog;
use crate::engine::types::{Action, ActionRecord, EngineResult, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OrderOrigin {
    Add,
    Replace { old_reference: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Added,
    Replaced,
    Executed,
    ExecutedWithPrice,
    Cancelled,
    Deleted,
    /// A later replace retired this order.
    ReplacedAway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecyclePoint {
    pub timestamp: u64,
    pub remaining: u64,
    pub event: LifecycleEvent,
}

/// Lifecycle of one order from its introduction until it leaves the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub reference: u64,
    pub index: usize,
    pub origin: OrderOrigin,
    pub side: Side,
    pub price: u64,
    pub shares: u64,
    pub trajectory: Vec<LifecyclePoint>,
    pub executed_shares: u64,
    pub executed_with_price_shares: u64,
    pub cancelled_shares: u64,
}

/// Flat rendition of a summary, one per CSV line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub reference: u64,
    pub index: usize,
    pub origin: &'static str,
    pub old_reference: Option<u64>,
    pub side: Side,
    pub price: u64,
    pub shares: u64,
    pub executed_shares: u64,
    pub executed_with_price_shares: u64,
    pub cancelled_shares: u64,
    pub remaining: u64,
    pub events: usize,
    pub last_timestamp: u64,
}

impl OrderSummary {
    fn open(
        reference: u64,
        index: usize,
        origin: OrderOrigin,
        side: Side,
        price: u64,
        shares: u64,
        timestamp: u64,
    ) -> Self {
        let event = match origin {
            OrderOrigin::Add => LifecycleEvent::Added,
            OrderOrigin::Replace { .. } => LifecycleEvent::Replaced,
        };
        Self {
            reference,
            index,
            origin,
            side,
            price,
            shares,
            trajectory: vec![LifecyclePoint {
                timestamp,
                remaining: shares,
                event,
            }],
            executed_shares: 0,
            executed_with_price_shares: 0,
            cancelled_shares: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.trajectory.last().map(|p| p.remaining).unwrap_or(self.shares)
    }

    pub fn row(&self) -> SummaryRow {
        let (origin, old_reference) = match self.origin {
            OrderOrigin::Add => ("add", None),
            OrderOrigin::Replace { old_reference } => ("replace", Some(old_reference)),
        };
        SummaryRow {
            reference: self.reference,
            index: self.index,
            origin,
            old_reference,
            side: self.side,
            price: self.price,
            shares: self.shares,
            executed_shares: self.executed_shares,
            executed_with_price_shares: self.executed_with_price_shares,
            cancelled_shares: self.cancelled_shares,
            remaining: self.remaining(),
            events: self.trajectory.len(),
            last_timestamp: self.trajectory.last().map(|p| p.timestamp).unwrap_or_default(),
        }
    }

    fn reduce(&mut self, timestamp: u64, requested: u64, event: LifecycleEvent) {
        let remaining = self.remaining();
        let delta = requested.min(remaining);
        match event {
            LifecycleEvent::Executed => self.executed_shares += delta,
            LifecycleEvent::ExecutedWithPrice => self.executed_with_price_shares += delta,
            _ => self.cancelled_shares += delta,
        }
        self.trajectory.push(LifecyclePoint {
            timestamp,
            remaining: remaining - delta,
            event,
        });
    }

    /// Apply one later record of this order's lineage.
    fn follow(&mut self, event: ActionRecord) {
        match event.action {
            Action::Execute {
                reference,
                executed,
                ..
            } if reference == self.reference => {
                self.reduce(event.timestamp, executed, LifecycleEvent::Executed)
            }
            Action::ExecuteWithPrice {
                reference,
                executed,
                ..
            } if reference == self.reference => self.reduce(
                event.timestamp,
                executed,
                LifecycleEvent::ExecutedWithPrice,
            ),
            Action::Cancel {
                reference,
                cancelled,
                ..
            } if reference == self.reference => {
                self.reduce(event.timestamp, cancelled, LifecycleEvent::Cancelled)
            }
            Action::Delete { reference, .. } if reference == self.reference => {
                self.reduce(event.timestamp, u64::MAX, LifecycleEvent::Deleted)
            }
            Action::Replace { old_reference, .. } if old_reference == self.reference => {
                self.reduce(event.timestamp, u64::MAX, LifecycleEvent::ReplacedAway)
            }
            _ => trace!(
                index = event.index,
                reference = self.reference,
                "foreign record in lineage"
            ),
        }
    }
}

/// Summarize every order introduced by an add or a replace.
#[instrument(skip(log), fields(records = log.len()))]
pub fn summarize_trajectories(log: &ActionLog) -> EngineResult<Vec<OrderSummary>> {
    let mut summaries = Vec::new();

    for record in log.iter() {
        let record = record?;
        let mut summary = match record.action {
            Action::Add {
                reference,
                shares,
                price,
                side,
                ..
            } => OrderSummary::open(
                reference,
                record.index,
                OrderOrigin::Add,
                side,
                price,
                shares,
                record.timestamp,
            ),
            Action::Replace {
                reference,
                old_reference,
                shares,
                price,
                side,
                ..
            } => OrderSummary::open(
                reference,
                record.index,
                OrderOrigin::Replace { old_reference },
                side,
                price,
                shares,
                record.timestamp,
            ),
            _ => continue,
        };

        if log.backward_links() == 0 {
            // forward links only: the walk is already in index order
            for index in Lineage::new(log, record.index)? {
                if summary.remaining() == 0 {
                    break;
                }
                summary.follow(log.record(index?)?);
            }
        } else {
            let mut chain = lineage_of(log, record.index)?;
            chain.sort_unstable();
            for index in chain {
                if summary.remaining() == 0 {
                    break;
                }
                summary.follow(log.record(index)?);
            }
        }

        summaries.push(summary);
    }

    summaries.sort_by_key(|s| (s.reference, s.index));
    debug!(orders = summaries.len(), "trajectories summarized");
    Ok(summaries)
}
