//! The immutable, contiguous action log for one security and session.
//!
//! Records are kept exactly as encoded (`[u64; NUM_FIELDS]`) so the log stays
//! cache-friendly and trivially serializable; typed decoding happens on demand.

use tracing::{debug, instrument, warn};

use crate::engine::types::{
    Action, ActionRecord, EngineError, EngineResult, RawRecord, SchemaReason, NEXT_INDEX,
    NUM_FIELDS, SENTINEL, TIMESTAMP,
};

/// Load-time validation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Reject lineage links that point at or before their own record.
    pub strict_lineage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionLog {
    records: Vec<RawRecord>,
    backward_links: usize,
}

impl ActionLog {
    #[instrument(skip(records), fields(records = records.len()))]
    pub fn from_records(records: Vec<RawRecord>, options: LogOptions) -> EngineResult<Self> {
        let mut previous = 0u64;
        let mut backward_links = 0usize;

        for (index, raw) in records.iter().enumerate() {
            Action::decode(index, raw)?;

            let timestamp = raw[TIMESTAMP];
            if timestamp < previous {
                return Err(EngineError::SchemaViolation {
                    index,
                    reason: SchemaReason::OutOfOrder {
                        previous,
                        timestamp,
                    },
                });
            }
            previous = timestamp;

            let next_index = raw[NEXT_INDEX];
            if next_index != SENTINEL && next_index <= index as u64 {
                if options.strict_lineage {
                    return Err(EngineError::SchemaViolation {
                        index,
                        reason: SchemaReason::BackwardLink { next_index },
                    });
                }
                backward_links += 1;
            }
        }

        if backward_links > 0 {
            warn!(backward_links, "lineage chains are not timestamp-monotonic");
        }
        debug!(records = records.len(), "action log validated");

        Ok(Self {
            records,
            backward_links,
        })
    }

    /// Reshape a flat value array into records.
    pub fn from_flat(values: &[u64], options: LogOptions) -> EngineResult<Self> {
        if values.len() % NUM_FIELDS != 0 {
            return Err(EngineError::SchemaViolation {
                index: values.len() / NUM_FIELDS,
                reason: SchemaReason::FieldCount {
                    values: values.len(),
                },
            });
        }
        let records = values
            .chunks_exact(NUM_FIELDS)
            .map(|chunk| {
                let mut raw = [0u64; NUM_FIELDS];
                raw.copy_from_slice(chunk);
                raw
            })
            .collect();
        Self::from_records(records, options)
    }

    /// Reinterpret a native-endian `u64` blob (already decompressed).
    pub fn from_bytes(bytes: &[u8], options: LogOptions) -> EngineResult<Self> {
        const WIDTH: usize = std::mem::size_of::<u64>();
        if bytes.len() % WIDTH != 0 {
            return Err(EngineError::SchemaViolation {
                index: bytes.len() / (WIDTH * NUM_FIELDS),
                reason: SchemaReason::FieldCount {
                    values: bytes.len() / WIDTH,
                },
            });
        }
        let values: Vec<u64> = bytes
            .chunks_exact(WIDTH)
            .map(|chunk| {
                let mut buf = [0u8; WIDTH];
                buf.copy_from_slice(chunk);
                u64::from_ne_bytes(buf)
            })
            .collect();
        Self::from_flat(&values, options)
    }

    /// Encode back into the blob layout accepted by [`ActionLog::from_bytes`].
    pub fn to_bytes(&self) -> Vec<u8> {
        self.records
            .iter()
            .flatten()
            .flat_map(|value| value.to_ne_bytes())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn raw(&self, index: usize) -> EngineResult<&RawRecord> {
        self.records.get(index).ok_or(EngineError::InvalidReference {
            index: index as i64,
            len: self.records.len(),
        })
    }

    pub fn timestamp(&self, index: usize) -> EngineResult<u64> {
        Ok(self.raw(index)?[TIMESTAMP])
    }

    /// Next position in the lineage, `None` at the sentinel.
    pub fn next_index(&self, index: usize) -> EngineResult<Option<usize>> {
        let next = self.raw(index)?[NEXT_INDEX];
        Ok((next != SENTINEL).then_some(next as usize))
    }

    pub fn record(&self, index: usize) -> EngineResult<ActionRecord> {
        let raw = self.raw(index)?;
        Ok(ActionRecord {
            index,
            timestamp: raw[TIMESTAMP],
            next_index: raw[NEXT_INDEX],
            action: Action::decode(index, raw)?,
        })
    }

    /// Decoded records in log order.
    pub fn iter(&self) -> impl Iterator<Item = EngineResult<ActionRecord>> + '_ {
        (0..self.records.len()).map(move |index| self.record(index))
    }

    /// Number of lineage links that point backward; always 0 for strict logs.
    pub fn backward_links(&self) -> usize {
        self.backward_links
    }

    /// Map a possibly negative index (counted from the end) to a position.
    pub fn normalize_index(&self, index: i64) -> EngineResult<usize> {
        let len = self.records.len() as i64;
        let absolute = if index < 0 { len + index } else { index };
        if absolute < 0 || absolute >= len {
            return Err(EngineError::InvalidReference {
                index,
                len: self.records.len(),
            });
        }
        Ok(absolute as usize)
    }

    /// Number of leading records strictly before `boundary`, or at or before it
    /// when `inclusive`.
    pub fn partition_by_time(&self, boundary: u64, inclusive: bool) -> usize {
        if inclusive {
            self.records.partition_point(|raw| raw[TIMESTAMP] <= boundary)
        } else {
            self.records.partition_point(|raw| raw[TIMESTAMP] < boundary)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::engine::types::Side;

    fn sample() -> ActionLog {
        let records = link(vec![
            add(10, 1, 100, 100, Side::Buy),
            execute(20, 1, 40, Side::Buy),
            cancel(30, 1, 60, Side::Buy),
        ]);
        ActionLog::from_records(records, LogOptions::default()).unwrap()
    }

    #[test]
    fn test_link_builds_forward_chain() {
        let log = sample();
        assert_eq!(log.next_index(0).unwrap(), Some(1));
        assert_eq!(log.next_index(1).unwrap(), Some(2));
        assert_eq!(log.next_index(2).unwrap(), None);
    }

    #[test]
    fn test_from_flat_rejects_partial_record() {
        let err = ActionLog::from_flat(&[0; NUM_FIELDS + 3], LogOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SchemaViolation {
                reason: SchemaReason::FieldCount { values: 12 },
                ..
            }
        ));
    }

    #[test]
    fn test_bytes_round_trip() {
        let log = sample();
        let restored = ActionLog::from_bytes(&log.to_bytes(), LogOptions::default()).unwrap();
        assert_eq!(restored, log);
    }

    #[test]
    fn test_out_of_order_timestamps_rejected() {
        let records = vec![add(20, 1, 100, 100, Side::Buy), add(10, 2, 100, 100, Side::Buy)];
        let err = ActionLog::from_records(records, LogOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SchemaViolation {
                index: 1,
                reason: SchemaReason::OutOfOrder { .. }
            }
        ));
    }

    #[test]
    fn test_backward_link_counted_or_rejected() {
        let mut records = link(vec![
            add(10, 1, 100, 100, Side::Buy),
            execute(20, 1, 40, Side::Buy),
        ]);
        // second record loops back onto itself
        records[1][NEXT_INDEX] = 1;

        let lenient = ActionLog::from_records(records.clone(), LogOptions::default()).unwrap();
        assert_eq!(lenient.backward_links(), 1);

        let strict = ActionLog::from_records(
            records,
            LogOptions {
                strict_lineage: true,
            },
        );
        assert!(matches!(
            strict,
            Err(EngineError::SchemaViolation {
                reason: SchemaReason::BackwardLink { next_index: 1 },
                ..
            })
        ));
    }

    #[test]
    fn test_normalize_negative_index() {
        let log = sample();
        assert_eq!(log.normalize_index(-1).unwrap(), 2);
        assert_eq!(log.normalize_index(0).unwrap(), 0);
        assert!(log.normalize_index(3).is_err());
        assert!(log.normalize_index(-4).is_err());
    }

    #[test]
    fn test_partition_by_time() {
        let log = sample();
        assert_eq!(log.partition_by_time(20, false), 1);
        assert_eq!(log.partition_by_time(20, true), 2);
        assert_eq!(log.partition_by_time(1_000, false), 3);
    }
}
