use tracing::{debug, instrument};

use crate::engine::book::{Book, QueuePriority};
use crate::engine::log::ActionLog;
use crate::engine::types::{EngineError, EngineResult};

/// A book state together with how many leading log records produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub position: usize,
    pub book: Book,
}

/// Periodic book checkpoints over one log.
///
/// Restoring from a checkpoint and replaying the suffix yields exactly the
/// book a full scan would have produced at the same position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoints {
    interval: usize,
    priority: QueuePriority,
    /// Length of the log the entries were built from.
    log_len: usize,
    entries: Vec<Checkpoint>,
}

impl Checkpoints {
    /// Scan `log` once, keeping a book clone every `interval` records.
    #[instrument(skip(log), fields(records = log.len()))]
    pub fn build(log: &ActionLog, interval: usize, priority: QueuePriority) -> EngineResult<Self> {
        if interval == 0 {
            return Err(EngineError::InvalidDepth { value: 0 });
        }
        let mut book = Book::new(priority);
        let mut entries = Vec::with_capacity(log.len() / interval);
        for index in 0..log.len() {
            book.apply(&log.record(index)?)?;
            let position = index + 1;
            if position % interval == 0 {
                entries.push(Checkpoint {
                    position,
                    book: book.clone(),
                });
            }
        }
        debug!(checkpoints = entries.len(), interval, "checkpoints built");
        Ok(Self {
            interval,
            priority,
            log_len: log.len(),
            entries,
        })
    }

    /// Assemble from previously persisted entries; entries are sorted by position.
    pub fn from_entries(
        interval: usize,
        priority: QueuePriority,
        log_len: usize,
        mut entries: Vec<Checkpoint>,
    ) -> Self {
        entries.sort_by_key(|c| c.position);
        Self {
            interval,
            priority,
            log_len,
            entries,
        }
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn priority(&self) -> QueuePriority {
        self.priority
    }

    pub fn log_len(&self) -> usize {
        self.log_len
    }

    /// Whether these checkpoints were built over a log of this length with
    /// this queue priority.
    pub fn matches(&self, log: &ActionLog, priority: QueuePriority) -> bool {
        self.log_len == log.len() && self.priority == priority
    }

    pub fn entries(&self) -> &[Checkpoint] {
        &self.entries
    }

    /// Latest checkpoint at or before `position`.
    pub fn nearest(&self, position: usize) -> Option<&Checkpoint> {
        let idx = self.entries.partition_point(|c| c.position <= position);
        idx.checked_sub(1).map(|i| &self.entries[i])
    }

    /// Latest checkpoint strictly after `after` and at or before `position`.
    pub fn jump(&self, after: usize, position: usize) -> Option<&Checkpoint> {
        self.nearest(position).filter(|c| c.position > after)
    }

    /// Book after the first `position` records of `log`.
    pub fn book_at(&self, log: &ActionLog, position: usize) -> EngineResult<Book> {
        if position > log.len() {
            return Err(EngineError::InvalidReference {
                index: position as i64,
                len: log.len(),
            });
        }
        if self.log_len != log.len() {
            debug!(built_for = self.log_len, records = log.len(), "checkpoints unused");
            return book_at(log, position, self.priority);
        }
        let (mut book, start) = match self.nearest(position) {
            Some(checkpoint) => (checkpoint.book.clone(), checkpoint.position),
            None => (Book::new(self.priority), 0),
        };
        for index in start..position {
            book.apply(&log.record(index)?)?;
        }
        Ok(book)
    }
}

/// Book after the first `position` records, by a full forward scan.
pub fn book_at(log: &ActionLog, position: usize, priority: QueuePriority) -> EngineResult<Book> {
    if position > log.len() {
        return Err(EngineError::InvalidReference {
            index: position as i64,
            len: log.len(),
        });
    }
    let mut book = Book::new(priority);
    for index in 0..position {
        book.apply(&log.record(index)?)?;
    }
    Ok(book)
}
