//! Book snapshots at `timestamp[target] + latency` for a batch of targets.

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::engine::book::{Book, QueuePriority};
use crate::engine::checkpoint::Checkpoints;
use crate::engine::depth::{
    capture, BookView, DepthCriterion, DepthSnapshot, QueueLevel, QueueView, VolumeLevel,
    VolumeView,
};
use crate::engine::log::ActionLog;
use crate::engine::types::{EngineError, EngineResult, RawRecord, TIMESTAMP};

/// Latency applied to each target, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Latencies {
    Uniform(i64),
    PerTarget(Vec<i64>),
}

impl Latencies {
    fn resolve(&self, targets: usize) -> EngineResult<Vec<u64>> {
        let values = match self {
            Latencies::Uniform(latency) => vec![*latency; targets],
            Latencies::PerTarget(values) => {
                if values.len() != targets {
                    return Err(EngineError::InvalidLatency {
                        reason: format!(
                            "{} latencies given for {} targets",
                            values.len(),
                            targets
                        ),
                    });
                }
                values.clone()
            }
        };
        values
            .into_iter()
            .map(|latency| {
                u64::try_from(latency).map_err(|_| EngineError::InvalidLatency {
                    reason: format!("latency {} is negative", latency),
                })
            })
            .collect()
    }
}

impl From<i64> for Latencies {
    fn from(latency: i64) -> Self {
        Latencies::Uniform(latency)
    }
}

impl From<Vec<i64>> for Latencies {
    fn from(latencies: Vec<i64>) -> Self {
        Latencies::PerTarget(latencies)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Include events stamped exactly at the boundary.
    pub inclusive: bool,
    pub priority: QueuePriority,
}

/// One compiled target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryPoint<L> {
    /// Normalized (non-negative) target index.
    pub target: usize,
    pub record: RawRecord,
    pub latency_ns: u64,
    pub boundary_ns: u64,
    /// Number of leading events applied to the snapshot; equal to the log
    /// length when the boundary lies past the last event.
    pub resolved_index: usize,
    pub snapshot: DepthSnapshot<L>,
}

fn normalize_targets(log: &ActionLog, targets: &[i64]) -> EngineResult<Vec<usize>> {
    let normalized = targets
        .iter()
        .map(|&t| log.normalize_index(t))
        .collect::<EngineResult<Vec<_>>>()?;
    if let Some(position) = normalized.windows(2).position(|w| w[1] < w[0]) {
        return Err(EngineError::UnsortedTargets {
            position: position + 1,
            previous: normalized[position],
            next: normalized[position + 1],
        });
    }
    Ok(normalized)
}

/// Compile one snapshot per target, in target order.
///
/// Every target must be within the log after negative indices are normalized,
/// and the normalized targets must not decrease. The book is built with one
/// forward scan; `checkpoints`, when given, let the scan skip ahead. Checkpoints
/// built over a log of another length or with another queue priority are
/// ignored and the scan starts from the first event.
#[instrument(
    skip_all,
    fields(records = log.len(), targets = targets.len(), criterion = ?criterion)
)]
pub fn compile_trajectory<V: BookView>(
    log: &ActionLog,
    targets: &[i64],
    latencies: &Latencies,
    criterion: DepthCriterion,
    options: CompileOptions,
    checkpoints: Option<&Checkpoints>,
) -> EngineResult<Vec<TrajectoryPoint<V::Level>>> {
    let criterion = criterion.validate()?;
    let latencies = latencies.resolve(targets.len())?;
    let targets = normalize_targets(log, targets)?;
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let mut plan = Vec::with_capacity(targets.len());
    for (slot, (&target, &latency)) in targets.iter().zip(&latencies).enumerate() {
        let record = *log.raw(target)?;
        let boundary_ns = record[TIMESTAMP].saturating_add(latency);
        let resolved_index = log.partition_by_time(boundary_ns, options.inclusive);
        plan.push((resolved_index, slot, boundary_ns, record));
    }
    // Per-target latencies can reorder the resolved positions; visit them
    // ascending and write each snapshot back into its target's slot.
    plan.sort_by_key(|&(resolved_index, slot, _, _)| (resolved_index, slot));

    let checkpoints = checkpoints.filter(|c| {
        let usable = c.matches(log, options.priority);
        if !usable {
            warn!(
                built_for = c.log_len(),
                built_with = ?c.priority(),
                priority = ?options.priority,
                "checkpoints do not match this log; scanning from the start"
            );
        }
        usable
    });
    let mut book = Book::new(options.priority);
    let mut cursor = 0usize;
    let mut applied = 0u64;
    let mut out: Vec<Option<TrajectoryPoint<V::Level>>> = vec![None; targets.len()];

    for (resolved_index, slot, boundary_ns, record) in plan {
        if let Some(checkpoint) = checkpoints.and_then(|c| c.jump(cursor, resolved_index)) {
            book = checkpoint.book.clone();
            cursor = checkpoint.position;
        }
        while cursor < resolved_index {
            book.apply(&log.record(cursor)?)?;
            cursor += 1;
            applied += 1;
        }
        out[slot] = Some(TrajectoryPoint {
            target: targets[slot],
            record,
            latency_ns: latencies[slot],
            boundary_ns,
            resolved_index,
            snapshot: capture::<V>(&book, criterion),
        });
    }

    metrics::counter!("lobtraj_events_applied_total").increment(applied);
    let points: Vec<_> = out.into_iter().flatten().collect();
    debug_assert_eq!(points.len(), targets.len());
    debug!(points = points.len(), applied, "trajectory compiled");
    Ok(points)
}

pub fn compile_trajectory_with_volume_level(
    log: &ActionLog,
    targets: &[i64],
    latencies: &Latencies,
    level: usize,
    options: CompileOptions,
) -> EngineResult<Vec<TrajectoryPoint<VolumeLevel>>> {
    let criterion = DepthCriterion::Level(level);
    compile_trajectory::<VolumeView>(log, targets, latencies, criterion, options, None)
}

pub fn compile_trajectory_with_volume_spread(
    log: &ActionLog,
    targets: &[i64],
    latencies: &Latencies,
    spread: u64,
    options: CompileOptions,
) -> EngineResult<Vec<TrajectoryPoint<VolumeLevel>>> {
    let criterion = DepthCriterion::Spread(spread);
    compile_trajectory::<VolumeView>(log, targets, latencies, criterion, options, None)
}

pub fn compile_trajectory_with_queue_level(
    log: &ActionLog,
    targets: &[i64],
    latencies: &Latencies,
    level: usize,
    options: CompileOptions,
) -> EngineResult<Vec<TrajectoryPoint<QueueLevel>>> {
    let criterion = DepthCriterion::Level(level);
    compile_trajectory::<QueueView>(log, targets, latencies, criterion, options, None)
}

pub fn compile_trajectory_with_queue_spread(
    log: &ActionLog,
    targets: &[i64],
    latencies: &Latencies,
    spread: u64,
    options: CompileOptions,
) -> EngineResult<Vec<TrajectoryPoint<QueueLevel>>> {
    let criterion = DepthCriterion::Spread(spread);
    compile_trajectory::<QueueView>(log, targets, latencies, criterion, options, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::log::fixtures::*;
    use crate::engine::log::LogOptions;
    use crate::engine::types::Side;

    fn sample() -> ActionLog {
        ActionLog::from_records(
            link(vec![
                add(100, 1, 100, 1000, Side::Buy),
                add(200, 2, 50, 1010, Side::Sell),
                add(200, 3, 70, 999, Side::Buy),
                execute(300, 1, 40, Side::Buy),
                cancel(400, 2, 20, Side::Sell),
                delete(500, 3, 70, 999, Side::Buy),
            ]),
            LogOptions::default(),
        )
        .unwrap()
    }

    fn exclusive() -> CompileOptions {
        CompileOptions::default()
    }

    fn inclusive() -> CompileOptions {
        CompileOptions {
            inclusive: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_point_per_target() {
        let log = sample();
        let points = compile_trajectory_with_volume_level(
            &log,
            &[0, 1, 1, 3, 5],
            &Latencies::Uniform(0),
            5,
            exclusive(),
        )
        .unwrap();
        assert_eq!(points.len(), 5);
        let targets: Vec<usize> = points.iter().map(|p| p.target).collect();
        assert_eq!(targets, vec![0, 1, 1, 3, 5]);
    }

    #[test]
    fn test_exclusive_boundary_excludes_target() {
        let log = sample();
        let points =
            compile_trajectory_with_volume_level(&log, &[3], &Latencies::Uniform(0), 5, exclusive())
                .unwrap();
        // everything before t=300
        assert_eq!(points[0].resolved_index, 3);
        assert_eq!(points[0].snapshot.bids[0].shares, 100);
    }

    #[test]
    fn test_inclusive_boundary_includes_same_timestamp() {
        let log = sample();
        let points =
            compile_trajectory_with_volume_level(&log, &[1], &Latencies::Uniform(0), 5, inclusive())
                .unwrap();
        // both records stamped 200 are applied
        assert_eq!(points[0].resolved_index, 3);
        assert_eq!(points[0].snapshot.bids.len(), 2);
        assert_eq!(points[0].snapshot.asks.len(), 1);
    }

    #[test]
    fn test_latency_moves_boundary_forward() {
        let log = sample();
        let latency = Latencies::Uniform(250);
        let points =
            compile_trajectory_with_volume_level(&log, &[0], &latency, 5, exclusive()).unwrap();
        assert_eq!(points[0].boundary_ns, 350);
        assert_eq!(points[0].resolved_index, 4);
        assert_eq!(points[0].snapshot.bids[0].shares, 60);
    }

    #[test]
    fn test_negative_target_matches_last_index() {
        let log = sample();
        let last = log.len() as i64 - 1;
        let latency = Latencies::Uniform(10);
        let a = compile_trajectory_with_queue_level(&log, &[-1], &latency, 3, exclusive()).unwrap();
        let b =
            compile_trajectory_with_queue_level(&log, &[last], &latency, 3, exclusive()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].target, 5);
    }

    #[test]
    fn test_end_of_log_with_latency_resolves_to_final_state() {
        let log = sample();
        let latency = Latencies::Uniform(1_000_000);
        let points =
            compile_trajectory_with_volume_level(&log, &[-1], &latency, 5, exclusive()).unwrap();
        assert_eq!(points[0].resolved_index, log.len());
        assert_eq!(points[0].snapshot.bids.len(), 1);
        assert_eq!(points[0].snapshot.bids[0].shares, 60);
        assert_eq!(points[0].snapshot.asks[0].shares, 30);
    }

    #[test]
    fn test_unsorted_targets_rejected() {
        let log = sample();
        let latency = Latencies::Uniform(0);
        let err = compile_trajectory_with_volume_level(&log, &[2, -6], &latency, 5, exclusive())
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::UnsortedTargets {
                position: 1,
                previous: 2,
                next: 0
            }
        );
    }

    #[test]
    fn test_invalid_latency_and_depth() {
        let log = sample();
        assert!(matches!(
            compile_trajectory_with_volume_level(
                &log,
                &[0],
                &Latencies::Uniform(-1),
                5,
                exclusive()
            ),
            Err(EngineError::InvalidLatency { .. })
        ));
        assert!(matches!(
            compile_trajectory_with_volume_level(
                &log,
                &[0, 1],
                &Latencies::PerTarget(vec![0]),
                5,
                exclusive()
            ),
            Err(EngineError::InvalidLatency { .. })
        ));
        assert_eq!(
            compile_trajectory_with_volume_spread(
                &log,
                &[0],
                &Latencies::Uniform(0),
                0,
                exclusive()
            )
            .unwrap_err(),
            EngineError::InvalidDepth { value: 0 }
        );
    }

    #[test]
    fn test_target_out_of_range() {
        let log = sample();
        assert_eq!(
            compile_trajectory_with_volume_level(&log, &[6], &Latencies::Uniform(0), 5, exclusive())
                .unwrap_err(),
            EngineError::InvalidReference { index: 6, len: 6 }
        );
    }

    #[test]
    fn test_per_target_latency_out_of_position_order() {
        let log = sample();
        let points = compile_trajectory_with_volume_level(
            &log,
            &[0, 1],
            &Latencies::PerTarget(vec![1_000, 0]),
            5,
            exclusive(),
        )
        .unwrap();
        assert_eq!(points[0].target, 0);
        assert_eq!(points[0].resolved_index, 6);
        assert_eq!(points[1].target, 1);
        assert_eq!(points[1].resolved_index, 1);
    }

    #[test]
    fn test_checkpoints_are_invisible() {
        let log = sample();
        let checkpoints = Checkpoints::build(&log, 2, QueuePriority::Arrival).unwrap();
        let targets = [0, 2, 3, 4, -1];
        let latencies = Latencies::PerTarget(vec![0, 150, 0, 50, 0]);
        let plain = compile_trajectory::<QueueView>(
            &log,
            &targets,
            &latencies,
            DepthCriterion::Spread(20),
            inclusive(),
            None,
        )
        .unwrap();
        let fast = compile_trajectory::<QueueView>(
            &log,
            &targets,
            &latencies,
            DepthCriterion::Spread(20),
            inclusive(),
            Some(&checkpoints),
        )
        .unwrap();
        assert_eq!(plain, fast);
    }

    fn shuffled_refs() -> ActionLog {
        // same-price bids whose references arrive out of order
        ActionLog::from_records(
            link(vec![
                add(1, 10, 100, 1000, Side::Buy),
                add(2, 30, 100, 1000, Side::Buy),
                add(3, 20, 100, 1000, Side::Buy),
                add(4, 40, 100, 1000, Side::Buy),
            ]),
            LogOptions::default(),
        )
        .unwrap()
    }

    fn queue_refs(points: &[TrajectoryPoint<QueueLevel>]) -> Vec<u64> {
        points[0].snapshot.bids[0]
            .queue
            .iter()
            .map(|o| o.reference)
            .collect()
    }

    #[test]
    fn test_checkpoints_with_other_priority_are_ignored() {
        let log = shuffled_refs();
        let checkpoints = Checkpoints::build(&log, 1, QueuePriority::Reference).unwrap();
        let latency = Latencies::Uniform(10);
        let criterion = DepthCriterion::Level(1);
        let plain =
            compile_trajectory::<QueueView>(&log, &[-1], &latency, criterion, exclusive(), None)
                .unwrap();
        let with_checkpoints = compile_trajectory::<QueueView>(
            &log,
            &[-1],
            &latency,
            criterion,
            exclusive(),
            Some(&checkpoints),
        )
        .unwrap();
        assert_eq!(queue_refs(&plain), vec![10, 30, 20, 40]);
        assert_eq!(plain, with_checkpoints);
    }

    #[test]
    fn test_checkpoints_from_another_log_are_ignored() {
        let log = sample();
        let other = shuffled_refs();
        let checkpoints = Checkpoints::build(&other, 1, QueuePriority::Arrival).unwrap();
        let latency = Latencies::Uniform(0);
        let criterion = DepthCriterion::Level(5);
        let targets = [1, 3, -1];
        let plain =
            compile_trajectory::<QueueView>(&log, &targets, &latency, criterion, inclusive(), None)
                .unwrap();
        let with_checkpoints = compile_trajectory::<QueueView>(
            &log,
            &targets,
            &latency,
            criterion,
            inclusive(),
            Some(&checkpoints),
        )
        .unwrap();
        assert_eq!(plain, with_checkpoints);
    }

    #[test]
    fn test_repeat_compilation_is_identical() {
        let log = sample();
        let latency = Latencies::Uniform(75);
        let run = || {
            compile_trajectory_with_queue_spread(&log, &[0, 2, 4], &latency, 15, exclusive())
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_empty_targets() {
        let log = sample();
        let points =
            compile_trajectory_with_volume_level(&log, &[], &Latencies::Uniform(0), 5, exclusive())
                .unwrap();
        assert!(points.is_empty());
    }
}
