// Metrics for lock operations
// Counters are emitted through the `metrics` facade; install a recorder to export them

use metrics::{counter, describe_counter};

use keylease_common::LockError;

pub const ACQUIRE_TOTAL: &str = "keylease_acquire_total";
pub const RELEASE_TOTAL: &str = "keylease_release_total";
pub const REFRESH_TOTAL: &str = "keylease_refresh_total";
pub const FORCE_UNLOCK_TOTAL: &str = "keylease_force_unlock_total";
pub const SCOPE_RELEASE_FAILURES_TOTAL: &str = "keylease_scope_release_failures_total";

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(ACQUIRE_TOTAL, "Lock acquisition attempts by result");
    describe_counter!(RELEASE_TOTAL, "Lock release attempts by result");
    describe_counter!(REFRESH_TOTAL, "Lease refresh attempts by result");
    describe_counter!(FORCE_UNLOCK_TOTAL, "Unconditional lock deletions");
    describe_counter!(
        SCOPE_RELEASE_FAILURES_TOTAL,
        "Releases that failed after scoped work completed"
    );
}

fn result_label<T>(result: &Result<T, LockError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

pub(crate) fn record_acquire<T>(result: &Result<T, LockError>) {
    counter!(ACQUIRE_TOTAL, "result" => result_label(result)).increment(1);
}

pub(crate) fn record_release<T>(result: &Result<T, LockError>) {
    counter!(RELEASE_TOTAL, "result" => result_label(result)).increment(1);
}

pub(crate) fn record_refresh<T>(result: &Result<T, LockError>) {
    counter!(REFRESH_TOTAL, "result" => result_label(result)).increment(1);
}

pub(crate) fn record_force_unlock() {
    counter!(FORCE_UNLOCK_TOTAL).increment(1);
}

pub(crate) fn record_scope_release_failure() {
    counter!(SCOPE_RELEASE_FAILURES_TOTAL).increment(1);
}
