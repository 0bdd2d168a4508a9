//! Percent-done math for selection jobs.

/// Ceiling factor reserving 100 for finalize: while the queue is being
/// worked, progress tops out at `floor(99.99) == 99` even when every case
/// is processed.
pub const PROGRESS_CEILING: f64 = 99.99;

/// Compute the progress percentage for a running job.
///
/// `floor(99.99 * processed / initial)`, clamped into `0..=99`. An empty
/// snapshot reports 0 — only finalize ever declares 100.
pub fn progress_percent(initial_todo: i64, todo_remaining: i64) -> i16 {
    if initial_todo <= 0 {
        return 0;
    }
    let processed = (initial_todo - todo_remaining).clamp(0, initial_todo);
    let pct = (PROGRESS_CEILING * processed as f64 / initial_todo as f64).floor();
    pct as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halfway_through_ten_cases_is_49() {
        // floor(99.99 * 5 / 10) = floor(49.995)
        assert_eq!(progress_percent(10, 5), 49);
    }

    #[test]
    fn fully_processed_queue_stays_below_100() {
        assert_eq!(progress_percent(10, 0), 99);
        assert_eq!(progress_percent(1, 0), 99);
    }

    #[test]
    fn untouched_queue_is_zero() {
        assert_eq!(progress_percent(10, 10), 0);
    }

    #[test]
    fn empty_snapshot_is_zero() {
        assert_eq!(progress_percent(0, 0), 0);
    }

    #[test]
    fn seven_case_queue() {
        // floor(99.99 * 3 / 7) = floor(42.852...)
        assert_eq!(progress_percent(7, 4), 42);
    }

    #[test]
    fn monotonically_non_decreasing_as_queue_drains() {
        let initial = 137;
        let mut last = 0;
        for remaining in (0..=initial).rev() {
            let pct = progress_percent(initial, remaining);
            assert!(pct >= last, "regressed at remaining={remaining}");
            assert!(pct <= 99);
            last = pct;
        }
    }

    #[test]
    fn out_of_range_remaining_is_clamped() {
        assert_eq!(progress_percent(10, -3), 99);
        assert_eq!(progress_percent(10, 15), 0);
    }
}
