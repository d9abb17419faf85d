// Recurrence parsing and next-due-time calculation.
//
// The next due time is always anchored to the due time that produced the
// run, never to the wall-clock time the run actually started, so repeated
// executions do not drift. When one or more whole intervals elapsed while
// the engine was not polling, the configured MissedPolicy decides whether
// the backlog collapses to a single future occurrence or is drained one
// interval per recomputation.

use crate::errors::RecurrenceError;
use crate::models::Recurrence;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Policy for recurrences whose occurrences were missed while the engine
/// was not polling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissedPolicy {
    /// Skip everything missed and land on the next occurrence after `now`.
    /// Bounds load after downtime: a 5-minute job left alone for an hour
    /// produces one future run, not twelve.
    #[default]
    Collapse,
    /// Advance exactly one interval past the anchor, even if that is still
    /// in the past. Each poll tick then drains one missed occurrence.
    CatchUp,
}

/// Parse and validate a cron expression.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, RecurrenceError> {
    CronSchedule::from_str(expression).map_err(|e| RecurrenceError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Validate a recurrence rule at job-registration time, so malformed rules
/// are rejected synchronously instead of failing inside the poll loop.
pub fn validate(rule: &Recurrence) -> Result<(), RecurrenceError> {
    match rule {
        Recurrence::Cron { expression, .. } => parse_cron_expression(expression).map(|_| ()),
        Recurrence::Every { interval_seconds } => {
            if *interval_seconds == 0 {
                return Err(RecurrenceError::InvalidConfiguration(
                    "interval_seconds must be greater than 0".to_string(),
                ));
            }
            Ok(())
        }
    }
}

/// First due time for a newly registered recurring job.
pub fn initial_due(rule: &Recurrence, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
    match rule {
        Recurrence::Cron {
            expression,
            timezone,
        } => cron_after(expression, *timezone, now),
        Recurrence::Every { interval_seconds } => {
            validate(rule)?;
            Ok(Some(now + Duration::seconds(i64::from(*interval_seconds))))
        }
    }
}

/// Compute the due time that follows `anchor`, the due time whose elapsing
/// triggered the run being rescheduled. The result is always strictly
/// after `anchor`; under `Collapse` it is also strictly after `now`.
/// `Ok(None)` means the rule has no further occurrences.
pub fn next_due(
    rule: &Recurrence,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: MissedPolicy,
) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
    match rule {
        Recurrence::Cron {
            expression,
            timezone,
        } => {
            let reference = match policy {
                MissedPolicy::Collapse => anchor.max(now),
                MissedPolicy::CatchUp => anchor,
            };
            cron_after(expression, *timezone, reference)
        }
        Recurrence::Every { interval_seconds } => {
            validate(rule)?;
            let interval = i64::from(*interval_seconds);
            let steps = match policy {
                MissedPolicy::CatchUp => 1,
                MissedPolicy::Collapse => {
                    if anchor >= now {
                        1
                    } else {
                        // Smallest multiple of the interval that lands
                        // strictly past `now`.
                        (now - anchor).num_seconds() / interval + 1
                    }
                }
            };
            Ok(Some(anchor + Duration::seconds(interval * steps)))
        }
    }
}

fn cron_after(
    expression: &str,
    timezone: Tz,
    reference: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
    let schedule = parse_cron_expression(expression)?;
    let reference_in_tz = reference.with_timezone(&timezone);
    Ok(schedule
        .after(&reference_in_tz)
        .next()
        .map(|next| next.with_timezone(&Utc)))
}

/// Default timezone for cron rules that do not specify one.
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every(seconds: u32) -> Recurrence {
        Recurrence::Every {
            interval_seconds: seconds,
        }
    }

    #[test]
    fn test_parse_valid_cron_expression() {
        assert!(parse_cron_expression("0 0 12 * * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        assert!(parse_cron_expression("invalid").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        assert!(validate(&every(0)).is_err());
        assert!(validate(&every(1)).is_ok());
    }

    #[test]
    fn test_next_due_is_anchored_not_drifting() {
        // Run started 3 seconds after its due time; the next occurrence is
        // still measured from the due time, not the start time.
        let anchor = Utc::now();
        let now = anchor + Duration::seconds(3);
        let next = next_due(&every(600), anchor, now, MissedPolicy::Collapse)
            .unwrap()
            .unwrap();
        assert_eq!(next, anchor + Duration::seconds(600));
    }

    #[test]
    fn test_collapse_skips_missed_occurrences() {
        // 5-minute recurrence left unpolled for an hour: exactly one
        // future occurrence, not a backlog of twelve.
        let anchor = Utc::now() - Duration::hours(1);
        let now = Utc::now();
        let next = next_due(&every(300), anchor, now, MissedPolicy::Collapse)
            .unwrap()
            .unwrap();
        assert!(next > now);
        assert!(next <= now + Duration::seconds(300));
        // Still on the anchor's grid.
        assert_eq!((next - anchor).num_seconds() % 300, 0);
    }

    #[test]
    fn test_collapse_exact_boundary_moves_past_now() {
        let anchor = Utc::now();
        let now = anchor + Duration::seconds(600);
        let next = next_due(&every(300), anchor, now, MissedPolicy::Collapse)
            .unwrap()
            .unwrap();
        assert_eq!(next, now + Duration::seconds(300));
    }

    #[test]
    fn test_catch_up_drains_one_interval_at_a_time() {
        let anchor = Utc::now() - Duration::hours(1);
        let now = Utc::now();
        let next = next_due(&every(300), anchor, now, MissedPolicy::CatchUp)
            .unwrap()
            .unwrap();
        // One step past the anchor, even though that is still in the past.
        assert_eq!(next, anchor + Duration::seconds(300));
        assert!(next < now);
    }

    #[test]
    fn test_next_due_strictly_exceeds_anchor() {
        let anchor = Utc::now();
        for policy in [MissedPolicy::Collapse, MissedPolicy::CatchUp] {
            let next = next_due(&every(60), anchor, anchor, policy).unwrap().unwrap();
            assert!(next > anchor);
        }
    }

    #[test]
    fn test_cron_next_due_respects_timezone() {
        let rule = Recurrence::Cron {
            expression: "0 0 12 * * * *".to_string(),
            timezone: default_timezone(),
        };
        let anchor = Utc::now();
        let next = next_due(&rule, anchor, anchor, MissedPolicy::Collapse)
            .unwrap()
            .unwrap();
        assert!(next > anchor);
    }

    #[test]
    fn test_cron_collapse_lands_after_now() {
        let rule = Recurrence::Cron {
            // Every minute.
            expression: "0 * * * * * *".to_string(),
            timezone: default_timezone(),
        };
        let anchor = Utc::now() - Duration::hours(2);
        let now = Utc::now();
        let next = next_due(&rule, anchor, now, MissedPolicy::Collapse)
            .unwrap()
            .unwrap();
        assert!(next > now);
        assert!(next <= now + Duration::seconds(60));
    }

    #[test]
    fn test_cron_catch_up_stays_near_anchor() {
        let rule = Recurrence::Cron {
            expression: "0 * * * * * *".to_string(),
            timezone: default_timezone(),
        };
        let anchor = Utc::now() - Duration::hours(2);
        let now = Utc::now();
        let next = next_due(&rule, anchor, now, MissedPolicy::CatchUp)
            .unwrap()
            .unwrap();
        assert!(next > anchor);
        assert!(next < now);
    }

    #[test]
    fn test_initial_due_for_interval_rule() {
        let now = Utc::now();
        let due = initial_due(&every(120), now).unwrap().unwrap();
        assert_eq!(due, now + Duration::seconds(120));
    }
}
