use itertools::Itertools;
use tracing::{instrument, trace};

use crate::engine::log::ActionLog;
use crate::engine::types::{EngineError, EngineResult};

/// Walks one lineage chain by following `next_index` from a seed.
///
/// The seed itself is not yielded. Every hop is bounds-checked and the walk
/// fails with `CorruptLineage` once it has taken more hops than the log has
/// records, which can only happen when the chain cycles.
pub struct Lineage<'a> {
    log: &'a ActionLog,
    seed: usize,
    current: usize,
    hops: usize,
    finished: bool,
}

impl<'a> Lineage<'a> {
    pub fn new(log: &'a ActionLog, seed: usize) -> EngineResult<Self> {
        log.raw(seed)?;
        Ok(Self {
            log,
            seed,
            current: seed,
            hops: 0,
            finished: false,
        })
    }
}

impl Iterator for Lineage<'_> {
    type Item = EngineResult<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let next = match self.log.next_index(self.current) {
            Ok(Some(next)) => next,
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };

        self.hops += 1;
        if self.hops > self.log.len() {
            self.finished = true;
            return Some(Err(EngineError::CorruptLineage {
                seed: self.seed,
                len: self.log.len(),
            }));
        }
        if next >= self.log.len() {
            self.finished = true;
            return Some(Err(EngineError::InvalidReference {
                index: next as i64,
                len: self.log.len(),
            }));
        }

        self.current = next;
        Some(Ok(next))
    }
}

/// Indices chained after `seed`, in chain order.
pub fn lineage_of(log: &ActionLog, seed: usize) -> EngineResult<Vec<usize>> {
    Lineage::new(log, seed)?.collect()
}

/// Sorted, deduplicated union of the lineages of every seed.
#[instrument(skip(log), fields(records = log.len()))]
pub fn resolve_lineage(log: &ActionLog, seeds: &[usize]) -> EngineResult<Vec<usize>> {
    let mut related = Vec::new();
    for &seed in seeds {
        for index in Lineage::new(log, seed)? {
            related.push(index?);
        }
    }
    trace!(seeds = seeds.len(), related = related.len(), "lineage resolved");
    Ok(related.into_iter().sorted_unstable().dedup().collect())
}
