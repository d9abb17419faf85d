// Property-based tests for recurrence calculation

use chrono::{Duration, TimeZone, Utc};
use engine::models::Recurrence;
use engine::recurrence::{next_due, MissedPolicy};
use proptest::prelude::*;

fn anchor_time() -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp")
}

proptest! {
    /// *For any* interval and downtime gap, the collapse policy produces
    /// exactly one occurrence strictly after `now`, at most one interval
    /// away, and still on the anchor's grid.
    #[test]
    fn property_collapse_lands_on_grid_strictly_after_now(
        interval in 1u32..86_400u32,
        gap_seconds in 0i64..2_000_000i64,
    ) {
        let anchor = anchor_time();
        let now = anchor + Duration::seconds(gap_seconds);
        let rule = Recurrence::Every { interval_seconds: interval };

        let next = next_due(&rule, anchor, now, MissedPolicy::Collapse)
            .unwrap()
            .unwrap();

        prop_assert!(next > now);
        prop_assert!(next <= now + Duration::seconds(i64::from(interval)));
        prop_assert_eq!((next - anchor).num_seconds() % i64::from(interval), 0);
    }

    /// *For any* interval and gap, the catch-up policy advances exactly one
    /// interval past the anchor, regardless of how much time was missed.
    #[test]
    fn property_catch_up_advances_exactly_one_interval(
        interval in 1u32..86_400u32,
        gap_seconds in 0i64..2_000_000i64,
    ) {
        let anchor = anchor_time();
        let now = anchor + Duration::seconds(gap_seconds);
        let rule = Recurrence::Every { interval_seconds: interval };

        let next = next_due(&rule, anchor, now, MissedPolicy::CatchUp)
            .unwrap()
            .unwrap();

        prop_assert_eq!(next, anchor + Duration::seconds(i64::from(interval)));
    }

    /// *For any* policy, the recomputed due time strictly exceeds the due
    /// time that triggered the run: schedules never regress or stall.
    #[test]
    fn property_next_due_strictly_exceeds_anchor(
        interval in 1u32..86_400u32,
        gap_seconds in 0i64..2_000_000i64,
        catch_up in proptest::bool::ANY,
    ) {
        let anchor = anchor_time();
        let now = anchor + Duration::seconds(gap_seconds);
        let rule = Recurrence::Every { interval_seconds: interval };
        let policy = if catch_up { MissedPolicy::CatchUp } else { MissedPolicy::Collapse };

        let next = next_due(&rule, anchor, now, policy).unwrap().unwrap();
        prop_assert!(next > anchor);
    }

    /// *For any* run that starts late (anchor in the recent past, now a few
    /// seconds later), the next occurrence is measured from the anchor, so
    /// repeated lateness does not accumulate drift.
    #[test]
    fn property_no_drift_from_late_runs(
        interval in 60u32..86_400u32,
        lateness in 0i64..59i64,
    ) {
        let anchor = anchor_time();
        let now = anchor + Duration::seconds(lateness);
        let rule = Recurrence::Every { interval_seconds: interval };

        let next = next_due(&rule, anchor, now, MissedPolicy::Collapse)
            .unwrap()
            .unwrap();

        prop_assert_eq!(next, anchor + Duration::seconds(i64::from(interval)));
    }
}

/// A five-minute recurrence left unpolled for an hour collapses to one
/// future occurrence, never a backlog of twelve.
#[test]
fn test_hour_long_outage_collapses_to_single_occurrence() {
    let anchor = anchor_time();
    let now = anchor + Duration::hours(1);
    let rule = Recurrence::Every { interval_seconds: 300 };

    let next = next_due(&rule, anchor, now, MissedPolicy::Collapse)
        .unwrap()
        .unwrap();

    assert!(next > now);
    assert_eq!(next, anchor + Duration::seconds(300 * 13));
}
