use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};

static LAST_STAMP_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Returns the current UTC time at millisecond precision, the finest
/// precision every store keeps.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Write timestamp for a store mutation. Strictly increasing within the
/// process, so a re-stamped `updatedAt` always moves forward even when two
/// writes land in the same millisecond.
pub fn next_write_stamp() -> DateTime<Utc> {
    let now = now_utc().timestamp_millis();
    let mut last = LAST_STAMP_MILLIS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_STAMP_MILLIS.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                return Utc
                    .timestamp_millis_opt(candidate)
                    .single()
                    .unwrap_or_else(now_utc)
            }
            Err(actual) => last = actual,
        }
    }
}

/// Moment a record created at `created_at` expires under a retention of
/// `days` days.
pub fn expiry_after(created_at: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    created_at + Duration::days(i64::from(days))
}
