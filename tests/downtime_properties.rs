//! Property tests over `Store::insert_result` (monotone `fail_count`,
//! single open episode per check).

use std::sync::Arc;

use chrono::Utc;
use probewatch::notify::ChannelNotifier;
use probewatch::store::memory::MemoryStore;
use probewatch::store::schema::{ProbeResult, Status};
use probewatch::store::Store;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Up,
    Down,
    Degraded,
    Error,
}

impl Outcome {
    fn into_status(self) -> Status {
        match self {
            Outcome::Up => Status::Up,
            Outcome::Down => Status::Down,
            Outcome::Degraded => Status::Degraded,
            Outcome::Error => Status::Error,
        }
    }
}

fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Up),
        Just(Outcome::Down),
        Just(Outcome::Degraded),
        Just(Outcome::Error),
    ]
}

fn run_sequence(outcomes: Vec<Outcome>) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async move {
        let notifier = Arc::new(ChannelNotifier::new(Default::default(), None));
        let store = Store::new(Box::new(MemoryStore::new()), notifier);

        let mut last_fail_count: Option<i64> = None;
        let mut episode_open = false;

        for outcome in outcomes {
            let status = outcome.into_status();
            let is_up = matches!(outcome, Outcome::Up);

            store
                .insert_result(ProbeResult::new("e", "c1", "Demo", status, "", None, 1, Utc::now()))
                .await
                .unwrap();

            let open = store
                .downtimes("e")
                .await
                .unwrap()
                .into_iter()
                .find(|d| !d.recovered);

            if is_up {
                assert!(open.is_none(), "episode must be closed once a non-UP run recovers");
                last_fail_count = None;
                episode_open = false;
            } else {
                let downtime = open.expect("a non-UP result must leave an open episode");
                if episode_open {
                    let previous = last_fail_count.expect("episode was open, fail_count must be tracked");
                    assert_eq!(
                        downtime.fail_count,
                        previous + 1,
                        "fail_count must increment by exactly 1 per non-UP result while an episode is open"
                    );
                } else {
                    assert_eq!(downtime.fail_count, 1, "a freshly opened episode starts at fail_count 1");
                }
                assert!(downtime.fail_count >= last_fail_count.unwrap_or(0), "fail_count must never decrease");
                last_fail_count = Some(downtime.fail_count);
                episode_open = true;
            }

            // at most one open episode for this (environment, check) ever exists.
            let open_count = store
                .downtimes("e")
                .await
                .unwrap()
                .into_iter()
                .filter(|d| !d.recovered)
                .count();
            assert!(open_count <= 1);
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fail_count_is_monotone_while_an_episode_is_open(
        outcomes in prop::collection::vec(outcome_strategy(), 1..40)
    ) {
        run_sequence(outcomes);
    }
}
