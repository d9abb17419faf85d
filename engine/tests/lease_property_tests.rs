// Property-based tests for the execution lease and watch bookkeeping

use chrono::{Duration, TimeZone, Utc};
use engine::models::Job;
use engine::store::{JobStore, MemoryJobStore};
use engine::watch::{FileWatchState, Observation};
use proptest::prelude::*;
use uuid::Uuid;

/// *For any* TTL, a second holder is refused while the first holder's
/// lease is unexpired, and admitted once the TTL has elapsed.
#[test]
fn property_lease_is_exclusive_within_ttl() {
    proptest!(|(ttl_seconds in 1i64..3600i64, elapsed in 0i64..7200i64)| {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        rt.block_on(async {
            let store = MemoryJobStore::new();
            let job = Job::new("owner-1", "contended", "scripts/x");
            store.create_job(&job).await.unwrap();

            let t0 = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
            let ttl = Duration::seconds(ttl_seconds);

            let first = store.try_acquire_lease(job.id, "node-a", ttl, t0).await.unwrap();
            prop_assert!(first);

            let later = t0 + Duration::seconds(elapsed);
            let second = store.try_acquire_lease(job.id, "node-b", ttl, later).await.unwrap();
            prop_assert_eq!(second, elapsed >= ttl_seconds);
            Ok(())
        })?;
    });
}

/// *For any* interleaving of N simultaneous holders at the same instant,
/// exactly one acquisition succeeds.
#[test]
fn property_exactly_one_holder_wins() {
    proptest!(|(holders in 2usize..16usize, ttl_seconds in 1i64..600i64)| {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        rt.block_on(async {
            let store = std::sync::Arc::new(MemoryJobStore::new());
            let job = Job::new("owner-1", "raced", "scripts/x");
            store.create_job(&job).await.unwrap();

            let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
            let ttl = Duration::seconds(ttl_seconds);

            let mut wins = 0;
            for i in 0..holders {
                let holder = format!("node-{}", i);
                if store.try_acquire_lease(job.id, &holder, ttl, now).await.unwrap() {
                    wins += 1;
                }
            }
            prop_assert_eq!(wins, 1);
            Ok(())
        })?;
    });
}

proptest! {
    /// *For any* sequence of observed mtimes, the recorded last-seen value
    /// is the running maximum, and a change fires only when the maximum
    /// strictly advances.
    #[test]
    fn property_watch_last_seen_is_running_max(offsets in proptest::collection::vec(0i64..100_000i64, 1..40)) {
        let watch = FileWatchState::new();
        let job_id = Uuid::new_v4();
        let base = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");

        let mut running_max: Option<i64> = None;
        for offset in offsets {
            let mtime = base + Duration::seconds(offset);
            let observation = watch.observe(job_id, mtime, None);

            match running_max {
                None => prop_assert_eq!(observation, Observation::FirstSeen),
                Some(max) if offset > max => {
                    prop_assert_eq!(
                        observation,
                        Observation::Advanced { from: base + Duration::seconds(max) }
                    );
                }
                Some(_) => prop_assert_eq!(observation, Observation::Unchanged),
            }

            running_max = Some(running_max.map_or(offset, |max| max.max(offset)));
            prop_assert_eq!(
                watch.last_seen(job_id),
                running_max.map(|max| base + Duration::seconds(max))
            );
        }
    }
}
