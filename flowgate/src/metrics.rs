//! Guard metrics, recorded through the `metrics` facade.
//!
//! When `enable_metrics` is set the router installs the axum-prometheus recorder, and these
//! counters are rendered alongside the HTTP metrics at `/internal/metrics`. Without a recorder the
//! macros are no-ops.

use metrics::counter;

use crate::auth::middleware::GuardOutcome;

/// Count a terminal guard decision.
pub fn record_guard_outcome(outcome: GuardOutcome) {
    counter!("flowgate_guard_outcomes_total", "outcome" => outcome.as_str()).increment(1);
}

/// Count a refresh exchange by result (`success`, `expired`, `error`).
pub fn record_refresh_exchange(result: &'static str) {
    counter!("flowgate_refresh_exchanges_total", "result" => result).increment(1);
}
