mod common;

use lobtraj::engine::checkpoint::book_at;
use lobtraj::engine::{
    capture, compile_trajectory, resolve_lineage, summarize_trajectories, Checkpoints,
    CompileOptions, DepthCriterion, Latencies, QueuePriority, QueueView, ReplayEngine, VolumeView,
};
use proptest::prelude::*;

fn ops() -> impl Strategy<Value = Vec<(u8, u16, u16)>> {
    prop::collection::vec((any::<u8>(), any::<u16>(), any::<u16>()), 1..120)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lineage_is_sorted_unique_and_forward(ops in ops(), picks in prop::collection::vec(any::<usize>(), 1..8)) {
        let log = common::log(common::interpret(&ops));
        let seeds: Vec<usize> = picks.iter().map(|p| p % log.len()).collect();
        let related = resolve_lineage(&log, &seeds).unwrap();

        prop_assert!(related.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(related.iter().all(|&i| i < log.len()));
        let first_seed = seeds.iter().copied().min().unwrap_or(0);
        prop_assert!(related.iter().all(|&i| i > first_seed));
    }

    #[test]
    fn summaries_never_overdraw_and_match_the_book(ops in ops()) {
        let log = common::log(common::interpret(&ops));
        let summaries = summarize_trajectories(&log).unwrap();
        for s in &summaries {
            prop_assert!(s.executed_shares + s.executed_with_price_shares + s.cancelled_shares <= s.shares);
        }

        let book = book_at(&log, log.len(), QueuePriority::Arrival).unwrap();
        let resting: u64 = book.bids.values().chain(book.asks.values()).map(|l| l.shares).sum();
        let remaining: u64 = summaries.iter().map(|s| s.remaining()).sum();
        prop_assert_eq!(resting, remaining);
    }

    #[test]
    fn checkpoints_do_not_change_trajectories(ops in ops(), interval in 1usize..16, latency in 0i64..5) {
        let log = common::log(common::interpret(&ops));
        let targets: Vec<i64> = (0..log.len() as i64).step_by(3).collect();
        let checkpoints = Checkpoints::build(&log, interval, QueuePriority::Arrival).unwrap();
        let latencies = Latencies::Uniform(latency);
        let options = CompileOptions::default();

        let plain = compile_trajectory::<QueueView>(&log, &targets, &latencies, DepthCriterion::Level(3), options, None).unwrap();
        let fast = compile_trajectory::<QueueView>(&log, &targets, &latencies, DepthCriterion::Level(3), options, Some(&checkpoints)).unwrap();
        prop_assert_eq!(plain.len(), targets.len());
        prop_assert_eq!(plain, fast);
    }

    #[test]
    fn compilation_is_deterministic(ops in ops(), spread in 1u64..20) {
        let log = common::log(common::interpret(&ops));
        let targets: Vec<i64> = vec![0, -1];
        let run = || compile_trajectory::<VolumeView>(
            &log, &targets, &Latencies::Uniform(1), DepthCriterion::Spread(spread), CompileOptions::default(), None,
        ).unwrap();
        prop_assert_eq!(run(), run());
    }

    #[test]
    fn time_replay_covers_every_event_once(ops in ops(), increment in 1u64..50) {
        let log = common::log(common::interpret(&ops));
        let steps = ReplayEngine::<VolumeView>::by_time(&log, increment, DepthCriterion::Level(5), QueuePriority::Arrival)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let replayed: Vec<_> = steps.iter().flat_map(|s| s.events.iter().copied()).collect();
        prop_assert_eq!(replayed.as_slice(), log.records());
        prop_assert!(steps.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        let last = steps.last().unwrap();
        prop_assert!(last.done);
        let book = book_at(&log, log.len(), QueuePriority::Arrival).unwrap();
        prop_assert_eq!(&last.state, &capture::<VolumeView>(&book, DepthCriterion::Level(5)));
    }
}
