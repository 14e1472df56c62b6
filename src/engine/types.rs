use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of `u64` fields in one encoded action record.
pub const NUM_FIELDS: usize = 9;

/// Terminates a lineage chain in the `next_index` field.
pub const SENTINEL: u64 = 0;

// Field positions inside a raw record
pub const KIND: usize = 0;
pub const TIMESTAMP: usize = 1;
pub const REFERENCE: usize = 2;
pub const SHARES: usize = 3;
pub const PRICE: usize = 4;
pub const SIDE: usize = 5;
pub const ORIGINAL_SHARES: usize = 6;
pub const RESERVED: usize = 7;
pub const NEXT_INDEX: usize = 8;

/// One action exactly as stored in the log.
pub type RawRecord = [u64; NUM_FIELDS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn encode(self) -> u64 {
        match self {
            Side::Sell => 1,
            Side::Buy => 2,
        }
    }

    pub fn decode(value: u64) -> Option<Side> {
        match value {
            1 => Some(Side::Sell),
            2 => Some(Side::Buy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossType {
    Opening,
    Closing,
    IpoOrHalted,
    Intraday,
    ExtendedTradingClose,
}

impl CrossType {
    fn decode(value: u64) -> Option<CrossType> {
        match value {
            1 => Some(CrossType::Opening),
            2 => Some(CrossType::Closing),
            3 => Some(CrossType::IpoOrHalted),
            4 => Some(CrossType::Intraday),
            5 => Some(CrossType::ExtendedTradingClose),
            _ => None,
        }
    }
}

/// Typed view of a record. Payload interpretation depends on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Add {
        reference: u64,
        shares: u64,
        price: u64,
        side: Side,
        participant: u64,
    },
    Delete {
        reference: u64,
        shares: u64,
        price: u64,
        side: Side,
    },
    Cancel {
        reference: u64,
        cancelled: u64,
        price: u64,
        side: Side,
        original_shares: u64,
    },
    Replace {
        reference: u64,
        old_reference: u64,
        shares: u64,
        price: u64,
        side: Side,
        original_shares: u64,
    },
    Execute {
        reference: u64,
        executed: u64,
        price: u64,
        side: Side,
        original_shares: u64,
    },
    ExecuteWithPrice {
        reference: u64,
        executed: u64,
        price: u64,
        side: Side,
        original_shares: u64,
        printable: bool,
    },
    CrossTrade {
        shares: u64,
        price: u64,
        cross_type: CrossType,
    },
    NonCrossTrade {
        shares: u64,
        price: u64,
    },
}

impl Action {
    /// Decode the payload of `raw`. `index` is only used for error reporting.
    pub fn decode(index: usize, raw: &RawRecord) -> Result<Action, EngineError> {
        let side = || {
            Side::decode(raw[SIDE]).ok_or(EngineError::SchemaViolation {
                index,
                reason: SchemaReason::UnknownSide(raw[SIDE]),
            })
        };
        let action = match raw[KIND] {
            0 => Action::Add {
                reference: raw[REFERENCE],
                shares: raw[SHARES],
                price: raw[PRICE],
                side: side()?,
                participant: raw[RESERVED],
            },
            1 => Action::Delete {
                reference: raw[REFERENCE],
                shares: raw[SHARES],
                price: raw[PRICE],
                side: side()?,
            },
            2 => Action::Cancel {
                reference: raw[REFERENCE],
                cancelled: raw[SHARES],
                price: raw[PRICE],
                side: side()?,
                original_shares: raw[ORIGINAL_SHARES],
            },
            3 => Action::Replace {
                reference: raw[REFERENCE],
                old_reference: raw[RESERVED],
                shares: raw[SHARES],
                price: raw[PRICE],
                side: side()?,
                original_shares: raw[ORIGINAL_SHARES],
            },
            4 => Action::Execute {
                reference: raw[REFERENCE],
                executed: raw[SHARES],
                price: raw[PRICE],
                side: side()?,
                original_shares: raw[ORIGINAL_SHARES],
            },
            5 => Action::ExecuteWithPrice {
                reference: raw[REFERENCE],
                executed: raw[SHARES],
                price: raw[PRICE],
                side: side()?,
                original_shares: raw[ORIGINAL_SHARES],
                printable: raw[RESERVED] == 1,
            },
            6 => Action::CrossTrade {
                shares: raw[SHARES],
                price: raw[PRICE],
                cross_type: CrossType::decode(raw[RESERVED]).ok_or(
                    EngineError::SchemaViolation {
                        index,
                        reason: SchemaReason::UnknownCrossType(raw[RESERVED]),
                    },
                )?,
            },
            7 => Action::NonCrossTrade {
                shares: raw[SHARES],
                price: raw[PRICE],
            },
            other => {
                return Err(EngineError::SchemaViolation {
                    index,
                    reason: SchemaReason::UnknownKind(other),
                })
            }
        };
        Ok(action)
    }

    /// The order this action applies to, if any.
    pub fn reference(&self) -> Option<u64> {
        match *self {
            Action::Add { reference, .. }
            | Action::Delete { reference, .. }
            | Action::Cancel { reference, .. }
            | Action::Replace { reference, .. }
            | Action::Execute { reference, .. }
            | Action::ExecuteWithPrice { reference, .. } => Some(reference),
            Action::CrossTrade { .. } | Action::NonCrossTrade { .. } => None,
        }
    }

    /// Shares that changed hands because of this action.
    pub fn traded_shares(&self) -> u64 {
        match *self {
            Action::Execute { executed, .. } | Action::ExecuteWithPrice { executed, .. } => executed,
            Action::CrossTrade { shares, .. } | Action::NonCrossTrade { shares, .. } => shares,
            _ => 0,
        }
    }
}

/// A decoded record together with its position metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub index: usize,
    pub timestamp: u64,
    pub next_index: u64,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaReason {
    FieldCount { values: usize },
    UnknownKind(u64),
    UnknownSide(u64),
    UnknownCrossType(u64),
    OutOfOrder { previous: u64, timestamp: u64 },
    BackwardLink { next_index: u64 },
    ColumnLength { column: &'static str, expected: usize, found: usize },
}

impl fmt::Display for SchemaReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaReason::FieldCount { values } => write!(
                f,
                "{} values is not a multiple of {} fields",
                values, NUM_FIELDS
            ),
            SchemaReason::UnknownKind(kind) => write!(f, "unknown action kind {}", kind),
            SchemaReason::UnknownSide(side) => write!(f, "unknown side {}", side),
            SchemaReason::UnknownCrossType(cross) => write!(f, "unknown cross type {}", cross),
            SchemaReason::OutOfOrder { previous, timestamp } => write!(
                f,
                "timestamp {} is earlier than the previous record's {}",
                timestamp, previous
            ),
            SchemaReason::BackwardLink { next_index } => {
                write!(f, "lineage link points backward to {}", next_index)
            }
            SchemaReason::ColumnLength {
                column,
                expected,
                found,
            } => write!(f, "column `{}` has {} rows, expected {}", column, found, expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("schema violation at record {index}: {reason}")]
    SchemaViolation { index: usize, reason: SchemaReason },
    #[error("index {index} is out of bounds for a log of {len} records")]
    InvalidReference { index: i64, len: usize },
    #[error("lineage from seed {seed} exceeds {len} hops without reaching the sentinel")]
    CorruptLineage { seed: usize, len: usize },
    #[error("target indices must not decrease: position {position} goes from {previous} to {next}")]
    UnsortedTargets {
        position: usize,
        previous: usize,
        next: usize,
    },
    #[error("invalid latency: {reason}")]
    InvalidLatency { reason: String },
    #[error("depth must be strictly positive, got {value}")]
    InvalidDepth { value: u64 },
    #[error("replay has already consumed the whole log")]
    ReplayExhausted,
    #[error("record {index} refers to unknown order {reference}")]
    UnknownOrder { index: usize, reference: u64 },
    #[error("record {index} adds order {reference} which is already live")]
    DuplicateOrder { index: usize, reference: u64 },
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_add() {
        let raw: RawRecord = [0, 10, 7, 100, 1_500_000, 2, 0, 3, 0];
        let action = Action::decode(0, &raw).unwrap();
        assert_eq!(
            action,
            Action::Add {
                reference: 7,
                shares: 100,
                price: 1_500_000,
                side: Side::Buy,
                participant: 3
            }
        );
        assert_eq!(action.reference(), Some(7));
    }

    #[test]
    fn test_decode_replace_carries_old_reference() {
        let raw: RawRecord = [3, 10, 8, 50, 1_400_000, 1, 100, 7, 0];
        match Action::decode(4, &raw).unwrap() {
            Action::Replace {
                reference,
                old_reference,
                side,
                ..
            } => {
                assert_eq!(reference, 8);
                assert_eq!(old_reference, 7);
                assert_eq!(side, Side::Sell);
            }
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_kind() {
        let raw: RawRecord = [42, 10, 8, 50, 0, 1, 0, 0, 0];
        let err = Action::decode(3, &raw).unwrap_err();
        assert_eq!(
            err,
            EngineError::SchemaViolation {
                index: 3,
                reason: SchemaReason::UnknownKind(42)
            }
        );
    }

    #[test]
    fn test_decode_trade_ignores_side() {
        let raw: RawRecord = [7, 10, 0, 300, 1_000_000, 0, 0, 0, 0];
        let action = Action::decode(0, &raw).unwrap();
        assert_eq!(action.reference(), None);
        assert_eq!(action.traded_shares(), 300);
    }

    #[test]
    fn test_side_round_trip_codes() {
        assert_eq!(Side::decode(Side::Buy.encode()), Some(Side::Buy));
        assert_eq!(Side::decode(Side::Sell.encode()), Some(Side::Sell));
        assert_eq!(Side::decode(0), None);
    }
}
