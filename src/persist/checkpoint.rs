//! Pure conversions between in-memory checkpoints and their serializable form.
//!
//! No I/O here. Only struct <-> struct mapping and the byte encoding.

use std::collections::VecDeque;

use crate::engine::book::{Book, Level, QueuePriority, Resting};
use crate::engine::checkpoint::{Checkpoint, Checkpoints};
use crate::persist::types::{
    CheckpointData, CheckpointEntry, PersistError, PersistResult, SnapshotLevel, SnapshotResting,
    CHECKPOINT_SCHEMA_VERSION,
};

const ZSTD_LEVEL: i32 = 3;

fn levels_out<'a>(levels: impl Iterator<Item = &'a Level>) -> Vec<SnapshotLevel> {
    levels
        .map(|level| SnapshotLevel {
            price: level.price,
            orders: level
                .queue
                .iter()
                .map(|r| SnapshotResting {
                    reference: r.reference,
                    timestamp: r.timestamp,
                    remaining: r.remaining,
                })
                .collect(),
        })
        .collect()
}

fn levels_in(levels: &[SnapshotLevel]) -> Vec<Level> {
    levels
        .iter()
        .map(|level| {
            let queue: VecDeque<Resting> = level
                .orders
                .iter()
                .map(|o| Resting {
                    reference: o.reference,
                    timestamp: o.timestamp,
                    remaining: o.remaining,
                })
                .collect();
            Level {
                price: level.price,
                shares: queue.iter().map(|r| r.remaining).sum(),
                queue,
            }
        })
        .collect()
}

/// Capture one book as a checkpoint entry.
pub fn from_book(position: usize, book: &Book) -> CheckpointEntry {
    CheckpointEntry {
        position,
        max_reference: book.max_reference(),
        bid_side: levels_out(book.bids.values()),
        ask_side: levels_out(book.asks.values()),
    }
}

/// Rebuild the book a checkpoint entry was captured from.
pub fn to_book(priority: QueuePriority, entry: &CheckpointEntry) -> Book {
    Book::from_levels(
        priority,
        entry.max_reference,
        levels_in(&entry.bid_side),
        levels_in(&entry.ask_side),
    )
}

pub fn to_data(checkpoints: &Checkpoints) -> CheckpointData {
    CheckpointData {
        version: CHECKPOINT_SCHEMA_VERSION,
        interval: checkpoints.interval(),
        priority: checkpoints.priority(),
        log_len: checkpoints.log_len(),
        entries: checkpoints
            .entries()
            .iter()
            .map(|c| from_book(c.position, &c.book))
            .collect(),
    }
}

/// Restore checkpoints, refusing data written under another schema version.
pub fn from_data(data: &CheckpointData) -> PersistResult<Checkpoints> {
    if data.version != CHECKPOINT_SCHEMA_VERSION {
        return Err(PersistError::FormatMismatch {
            found: data.version,
            expected: CHECKPOINT_SCHEMA_VERSION,
        });
    }
    let entries = data
        .entries
        .iter()
        .map(|entry| Checkpoint {
            position: entry.position,
            book: to_book(data.priority, entry),
        })
        .collect();
    Ok(Checkpoints::from_entries(
        data.interval,
        data.priority,
        data.log_len,
        entries,
    ))
}

/// bincode, then zstd.
pub fn encode(data: &CheckpointData) -> PersistResult<Vec<u8>> {
    let bytes = bincode::serialize(data).map_err(|e| PersistError::Serialization(e.to_string()))?;
    zstd::encode_all(bytes.as_slice(), ZSTD_LEVEL).map_err(|e| PersistError::Serialization(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> PersistResult<CheckpointData> {
    let raw = zstd::decode_all(bytes).map_err(|e| PersistError::Serialization(e.to_string()))?;
    bincode::deserialize(&raw).map_err(|e| PersistError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::log::fixtures::*;
    use crate::engine::log::{ActionLog, LogOptions};
    use crate::engine::types::Side;

    fn log() -> ActionLog {
        let records = vec![
            add(1, 1, 100, 1000, Side::Buy),
            add(2, 2, 50, 1000, Side::Buy),
            add(3, 3, 70, 1010, Side::Sell),
            execute(4, 1, 30, Side::Buy),
            replace(5, 3, 4, 60, 1009, Side::Sell),
            add(6, 5, 10, 998, Side::Buy),
        ];
        ActionLog::from_records(link(records), LogOptions::default()).unwrap()
    }

    #[test]
    fn test_book_survives_entry_round_trip() {
        let log = log();
        let book = crate::engine::checkpoint::book_at(&log, log.len(), QueuePriority::Arrival).unwrap();
        let entry = from_book(log.len(), &book);
        assert_eq!(to_book(QueuePriority::Arrival, &entry), book);
    }

    #[test]
    fn test_checkpoints_survive_encoding() {
        let log = log();
        let checkpoints = Checkpoints::build(&log, 2, QueuePriority::Arrival).unwrap();
        let bytes = encode(&to_data(&checkpoints)).unwrap();
        let restored = from_data(&decode(&bytes).unwrap()).unwrap();
        assert_eq!(restored, checkpoints);

        for position in 0..=log.len() {
            assert_eq!(
                restored.book_at(&log, position).unwrap(),
                checkpoints.book_at(&log, position).unwrap()
            );
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let log = log();
        let checkpoints = Checkpoints::build(&log, 3, QueuePriority::Arrival).unwrap();
        let mut data = to_data(&checkpoints);
        data.version += 1;
        assert!(matches!(
            from_data(&data),
            Err(PersistError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        assert!(decode(b"not zstd").is_err());
    }
}
