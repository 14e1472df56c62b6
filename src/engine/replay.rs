//! Steppable replay over one action log.
//!
//! The engine is a plain state object owned by the caller: every `step()`
//! synchronously advances the cursor to the next boundary and reports the book
//! state there. It cannot be rewound; build a new engine to start over.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::engine::book::{Book, QueuePriority};
use crate::engine::depth::{capture, BookView, DepthCriterion, DepthSnapshot};
use crate::engine::log::ActionLog;
use crate::engine::types::{EngineError, EngineResult, RawRecord, TIMESTAMP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Fixed session-time increment in nanoseconds.
    Time(u64),
    /// Close a step once traded shares since the last boundary reach this.
    Volume(u64),
    /// Close a step once the accumulated change of top-of-book shares reaches this.
    Queue(u64),
}

impl ReplayMode {
    fn threshold(self) -> u64 {
        match self {
            ReplayMode::Time(v) | ReplayMode::Volume(v) | ReplayMode::Queue(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Running,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStep<L> {
    pub timestamp: u64,
    pub state: DepthSnapshot<L>,
    /// Raw records consumed since the previous boundary.
    pub events: Vec<RawRecord>,
    pub done: bool,
}

/// Cooperative cancellation shared between a driver and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { steps: usize },
    Cancelled { steps: usize },
}

pub struct ReplayEngine<'a, V: BookView> {
    log: &'a ActionLog,
    mode: ReplayMode,
    criterion: DepthCriterion,
    book: Book,
    cursor: usize,
    next_boundary: u64,
    state: ReplayState,
    _view: PhantomData<V>,
}

impl<'a, V: BookView> ReplayEngine<'a, V> {
    #[instrument(skip(log), fields(records = log.len()))]
    pub fn new(
        log: &'a ActionLog,
        mode: ReplayMode,
        criterion: DepthCriterion,
        priority: QueuePriority,
    ) -> EngineResult<Self> {
        let criterion = criterion.validate()?;
        let threshold = mode.threshold();
        if threshold == 0 {
            return Err(EngineError::InvalidDepth { value: threshold });
        }

        let next_boundary = match (mode, log.records().first()) {
            (ReplayMode::Time(increment), Some(first)) => {
                (first[TIMESTAMP] / increment)
                    .saturating_mul(increment)
                    .saturating_add(increment)
            }
            _ => 0,
        };
        let state = if log.is_empty() {
            ReplayState::Done
        } else {
            ReplayState::Running
        };
        debug!(?mode, next_boundary, "replay created");

        Ok(Self {
            log,
            mode,
            criterion,
            book: Book::new(priority),
            cursor: 0,
            next_boundary,
            state,
            _view: PhantomData,
        })
    }

    pub fn by_time(
        log: &'a ActionLog,
        increment_ns: u64,
        criterion: DepthCriterion,
        priority: QueuePriority,
    ) -> EngineResult<Self> {
        Self::new(log, ReplayMode::Time(increment_ns), criterion, priority)
    }

    pub fn by_volume(
        log: &'a ActionLog,
        threshold: u64,
        criterion: DepthCriterion,
        priority: QueuePriority,
    ) -> EngineResult<Self> {
        Self::new(log, ReplayMode::Volume(threshold), criterion, priority)
    }

    pub fn by_queue(
        log: &'a ActionLog,
        threshold: u64,
        criterion: DepthCriterion,
        priority: QueuePriority,
    ) -> EngineResult<Self> {
        Self::new(log, ReplayMode::Queue(threshold), criterion, priority)
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    /// Advance to the next boundary.
    ///
    /// Fails with `ReplayExhausted` once a previous step reported `done`.
    pub fn step(&mut self) -> EngineResult<ReplayStep<V::Level>> {
        if self.state == ReplayState::Done {
            return Err(EngineError::ReplayExhausted);
        }
        let start = self.cursor;

        let timestamp = match self.advance() {
            Ok(timestamp) => timestamp,
            Err(err) => {
                // a book that failed to apply an event cannot be stepped further
                self.state = ReplayState::Done;
                return Err(err);
            }
        };

        let done = self.cursor >= self.log.len();
        if done {
            self.state = ReplayState::Done;
        }
        metrics::counter!("lobtraj_replay_steps_total").increment(1);

        Ok(ReplayStep {
            timestamp,
            state: capture::<V>(&self.book, self.criterion),
            events: self.log.records()[start..self.cursor].to_vec(),
            done,
        })
    }

    fn advance(&mut self) -> EngineResult<u64> {
        match self.mode {
            ReplayMode::Time(increment) => {
                let boundary = self.next_boundary;
                while self.cursor < self.log.len() && self.log.timestamp(self.cursor)? < boundary {
                    self.apply_next()?;
                }
                self.next_boundary = boundary.saturating_add(increment);
                Ok(boundary)
            }
            ReplayMode::Volume(threshold) => {
                let mut traded = 0u64;
                while self.cursor < self.log.len() {
                    traded += self.apply_next()?;
                    if traded >= threshold {
                        self.finish_timestamp()?;
                        break;
                    }
                }
                self.last_timestamp()
            }
            ReplayMode::Queue(threshold) => {
                let mut changed = 0u64;
                let mut previous = self.book.top_of_book_shares();
                while self.cursor < self.log.len() {
                    self.apply_next()?;
                    let current = self.book.top_of_book_shares();
                    changed += current.abs_diff(previous);
                    previous = current;
                    if changed >= threshold {
                        self.finish_timestamp()?;
                        break;
                    }
                }
                self.last_timestamp()
            }
        }
    }

    /// Apply the record under the cursor, returning the shares it traded.
    fn apply_next(&mut self) -> EngineResult<u64> {
        let record = self.log.record(self.cursor)?;
        self.book.apply(&record)?;
        self.cursor += 1;
        Ok(record.action.traded_shares())
    }

    /// Consume the rest of the records sharing the last consumed timestamp.
    fn finish_timestamp(&mut self) -> EngineResult<()> {
        let timestamp = self.last_timestamp()?;
        while self.cursor < self.log.len() && self.log.timestamp(self.cursor)? == timestamp {
            self.apply_next()?;
        }
        Ok(())
    }

    fn last_timestamp(&self) -> EngineResult<u64> {
        match self.cursor.checked_sub(1) {
            Some(last) => self.log.timestamp(last),
            None => Ok(0),
        }
    }

    /// Drain the engine, checking `cancel` between steps.
    pub fn run_until<F>(&mut self, cancel: &CancelFlag, mut on_step: F) -> EngineResult<RunOutcome>
    where
        F: FnMut(&ReplayStep<V::Level>),
    {
        let mut steps = 0usize;
        while self.state == ReplayState::Running {
            if cancel.is_cancelled() {
                info!(steps, cursor = self.cursor, "replay cancelled");
                return Ok(RunOutcome::Cancelled { steps });
            }
            let step = self.step()?;
            on_step(&step);
            steps += 1;
        }
        Ok(RunOutcome::Completed { steps })
    }
}

impl<V: BookView> Iterator for ReplayEngine<'_, V> {
    type Item = EngineResult<ReplayStep<V::Level>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ReplayState::Done => None,
            ReplayState::Running => Some(self.step()),
        }
    }
}
