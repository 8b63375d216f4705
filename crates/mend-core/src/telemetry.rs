//! Report enrichment: run counters and the safety-gate summary.

use serde_json::Value;

use mend_memory::{EventKind, EventStore};
use mend_plan::{ApplyReport, SafetyGates, Telemetry};

/// Recent patch events considered for the median verify duration.
const MEDIAN_WINDOW: usize = 10;

/// Counters that reach the report from outside its own bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TelemetryInputs {
    /// Operations the cycle planned after policy evaluation
    pub operations_total: usize,
    /// Operations dropped by campaign memory before selection
    pub campaign_skipped: usize,
    /// Operations dropped by session memory before selection
    pub session_skipped: usize,
}

/// Attach run counters to the report.
///
/// Rates divide by `operations_total`, rounded to four decimals, and stay
/// zero for an empty plan. The median verify duration spans the last ten
/// patch events plus this run, so it is only present when this run verified.
pub(crate) fn attach_telemetry(
    report: &mut ApplyReport,
    inputs: TelemetryInputs,
    events: &EventStore,
) {
    let total = inputs.operations_total;
    let modified_count = report.modified.len();
    let skipped_count = report.skipped.len() + inputs.campaign_skipped + inputs.session_skipped;
    let verify_duration_ms = report.verify.as_ref().map(|v| v.duration_ms);

    let (apply_rate, no_op_rate) = if total > 0 {
        (
            round4(modified_count as f64 / total as f64),
            round4(skipped_count as f64 / total as f64),
        )
    } else {
        (0.0, 0.0)
    };
    let rollback_rate = if report.verify.is_some() {
        f64::from(report.rollback.as_ref().map_or(false, |r| r.done))
    } else {
        0.0
    };

    report.telemetry = Some(Telemetry {
        operations_total: total,
        modified_count,
        skipped_count,
        apply_rate,
        no_op_rate,
        rollback_rate,
        verify_duration_ms,
        median_verify_duration_ms: median_verify_duration(events, verify_duration_ms),
    });
}

/// Attach the safety-gate summary after the gates have (or have not) run.
pub(crate) fn attach_safety_gates(report: &mut ApplyReport, backup: bool) {
    report.safety_gates = Some(SafetyGates {
        backup,
        verify: report.verify.is_some(),
        auto_rollback: report.verify.is_some(),
        health_gate: report.health.is_some(),
    });
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Median over the recent verify durations, this run included.
///
/// Events without a recorded duration are dropped after windowing, matching
/// how the window is persisted; an even count takes the integer mean of the
/// two central values.
fn median_verify_duration(events: &EventStore, current: Option<u64>) -> Option<u64> {
    let current = current?;
    let history = events.by_kind(EventKind::Patch);
    let mut durations: Vec<u64> = history
        .iter()
        .rev()
        .take(MEDIAN_WINDOW)
        .filter_map(|event| event.output.get("verify_duration_ms").and_then(Value::as_u64))
        .collect();
    durations.push(current);
    durations.sort_unstable();
    let mid = durations.len() / 2;
    if durations.len() % 2 == 1 {
        Some(durations[mid])
    } else {
        Some((durations[mid - 1] + durations[mid]) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use mend_plan::{FixedClock, RollbackOutcome, VerifyOutcome};

    fn store_with_durations(dir: &std::path::Path, durations: &[u64]) -> EventStore {
        let events = EventStore::new(dir);
        let clock = FixedClock(1_700_000_000);
        for &ms in durations {
            events
                .append(
                    EventKind::Patch,
                    json!({}),
                    json!({ "verify_duration_ms": ms }),
                    Some(json!(true)),
                    &clock,
                )
                .unwrap();
        }
        events
    }

    fn verified_report(duration_ms: u64) -> ApplyReport {
        let mut report = ApplyReport::new(false);
        report.verify = Some(VerifyOutcome {
            success: true,
            return_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            command: "true".into(),
            reason: None,
            timed_out: false,
            py_compile_fallback: false,
            fix_import_retry: false,
        });
        report
    }

    #[test]
    fn empty_plan_yields_zero_rates() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ApplyReport::new(false);
        attach_telemetry(
            &mut report,
            TelemetryInputs::default(),
            &EventStore::new(dir.path()),
        );

        let telemetry = report.telemetry.unwrap();
        assert_eq!(telemetry.operations_total, 0);
        assert_eq!(telemetry.apply_rate, 0.0);
        assert_eq!(telemetry.no_op_rate, 0.0);
        assert_eq!(telemetry.rollback_rate, 0.0);
        assert_eq!(telemetry.median_verify_duration_ms, None);
    }

    #[test]
    fn rates_are_rounded_to_four_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ApplyReport::new(false);
        report.record_modified("a.py");
        report.record_modified("b.py");
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: 3,
                campaign_skipped: 1,
                session_skipped: 0,
            },
            &EventStore::new(dir.path()),
        );

        let telemetry = report.telemetry.unwrap();
        assert_eq!(telemetry.modified_count, 2);
        assert_eq!(telemetry.skipped_count, 1);
        assert_eq!(telemetry.apply_rate, 0.6667);
        assert_eq!(telemetry.no_op_rate, 0.3333);
    }

    #[test]
    fn campaign_and_session_skips_count_as_no_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ApplyReport::new(false);
        report.skipped.insert("a.py".into(), "already applied".into());
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: 4,
                campaign_skipped: 2,
                session_skipped: 1,
            },
            &EventStore::new(dir.path()),
        );
        assert_eq!(report.telemetry.unwrap().skipped_count, 4);
    }

    #[test]
    fn rollback_rate_requires_a_verify_run() {
        let dir = tempfile::tempdir().unwrap();
        let events = EventStore::new(dir.path());

        let mut no_verify = ApplyReport::new(false);
        no_verify.rollback = Some(RollbackOutcome {
            done: true,
            restored: Vec::new(),
            errors: Vec::new(),
            reason: None,
        });
        attach_telemetry(&mut no_verify, TelemetryInputs::default(), &events);
        assert_eq!(no_verify.telemetry.unwrap().rollback_rate, 0.0);

        let mut rolled_back = verified_report(120);
        rolled_back.rollback = Some(RollbackOutcome {
            done: true,
            restored: Vec::new(),
            errors: Vec::new(),
            reason: Some("verify_failed".into()),
        });
        attach_telemetry(
            &mut rolled_back,
            TelemetryInputs {
                operations_total: 1,
                ..TelemetryInputs::default()
            },
            &events,
        );
        assert_eq!(rolled_back.telemetry.unwrap().rollback_rate, 1.0);
    }

    #[test]
    fn median_is_the_middle_of_history_plus_current() {
        let dir = tempfile::tempdir().unwrap();
        let events = store_with_durations(dir.path(), &[100, 300]);

        let mut report = verified_report(200);
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: 1,
                ..TelemetryInputs::default()
            },
            &events,
        );
        let telemetry = report.telemetry.unwrap();
        assert_eq!(telemetry.verify_duration_ms, Some(200));
        assert_eq!(telemetry.median_verify_duration_ms, Some(200));
    }

    #[test]
    fn even_count_takes_integer_mean_of_central_pair() {
        let dir = tempfile::tempdir().unwrap();
        let events = store_with_durations(dir.path(), &[100, 200, 400]);

        let mut report = verified_report(301);
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: 1,
                ..TelemetryInputs::default()
            },
            &events,
        );
        // sorted [100, 200, 301, 400] -> (200 + 301) / 2 truncated
        assert_eq!(
            report.telemetry.unwrap().median_verify_duration_ms,
            Some(250)
        );
    }

    #[test]
    fn median_window_ignores_older_events() {
        let dir = tempfile::tempdir().unwrap();
        // One ancient outlier followed by ten identical runs
        let mut durations = vec![60_000];
        durations.extend(std::iter::repeat(100).take(10));
        let events = store_with_durations(dir.path(), &durations);

        let mut report = verified_report(100);
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: 1,
                ..TelemetryInputs::default()
            },
            &events,
        );
        assert_eq!(
            report.telemetry.unwrap().median_verify_duration_ms,
            Some(100)
        );
    }

    #[test]
    fn no_verify_run_means_no_median() {
        let dir = tempfile::tempdir().unwrap();
        let events = store_with_durations(dir.path(), &[100, 200, 300]);
        let mut report = ApplyReport::new(false);
        attach_telemetry(
            &mut report,
            TelemetryInputs {
                operations_total: 2,
                ..TelemetryInputs::default()
            },
            &events,
        );

        let telemetry = report.telemetry.unwrap();
        assert_eq!(telemetry.verify_duration_ms, None);
        assert_eq!(telemetry.median_verify_duration_ms, None);
    }

    #[test]
    fn safety_gates_reflect_what_ran() {
        let mut bare = ApplyReport::new(false);
        attach_safety_gates(&mut bare, true);
        let gates = bare.safety_gates.unwrap();
        assert!(gates.backup);
        assert!(!gates.verify);
        assert!(!gates.auto_rollback);
        assert!(!gates.health_gate);

        let mut verified = verified_report(50);
        attach_safety_gates(&mut verified, true);
        let gates = verified.safety_gates.unwrap();
        assert!(gates.verify);
        assert!(gates.auto_rollback);
        assert!(!gates.health_gate);
    }
}
