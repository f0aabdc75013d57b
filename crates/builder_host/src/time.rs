//! Host clock for edit timestamps, save stamps on stored documents, and action-id suffixes.

use std::cell::Cell;
#[cfg(not(target_arch = "wasm32"))]
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static LAST_SAVE_STAMP_MS: Cell<u64> = const { Cell::new(0) };
    static ACTION_SEQUENCE: Cell<u64> = const { Cell::new(0) };
}

/// Wall-clock time in unix milliseconds, used as the default clock for a document session.
///
/// Reads before the epoch report `0`.
pub fn unix_time_ms_now() -> u64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now().max(0.0) as u64
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Stamp written into a saved document envelope.
///
/// Stamps only move forward on this thread, so a later save never carries an older
/// `updated_at_unix_ms` than an earlier one, even when both land in the same millisecond or the
/// wall clock steps back.
pub fn next_monotonic_timestamp_ms() -> u64 {
    let now = unix_time_ms_now();
    LAST_SAVE_STAMP_MS.with(|last| {
        let stamp = save_stamp_after(last.get(), now);
        last.set(stamp);
        stamp
    })
}

fn save_stamp_after(previous: u64, now: u64) -> u64 {
    now.max(previous.saturating_add(1))
}

/// Counter appended to generated action ids so ids minted in one millisecond stay distinct.
pub fn next_sequence() -> u64 {
    ACTION_SEQUENCE.with(|counter| {
        let value = counter.get().saturating_add(1);
        counter.set(value);
        value
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_stamps_follow_the_clock_when_it_advances() {
        assert_eq!(save_stamp_after(100, 250), 250);
    }

    #[test]
    fn save_stamps_still_advance_when_the_clock_stalls_or_steps_back() {
        assert_eq!(save_stamp_after(250, 250), 251);
        assert_eq!(save_stamp_after(251, 90), 252);
        assert_eq!(save_stamp_after(u64::MAX, 5), u64::MAX);
    }

    #[test]
    fn consecutive_saves_get_ordered_stamps() {
        let first = next_monotonic_timestamp_ms();
        let second = next_monotonic_timestamp_ms();
        assert!(second > first);
    }

    #[test]
    fn action_sequence_never_repeats() {
        let a = next_sequence();
        let b = next_sequence();
        assert!(b > a);
    }
}
