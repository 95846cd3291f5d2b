//! Advertising interval estimation.
//!
//! Beacons repeat their advertisement on a fixed period, but the receiver
//! sees that period through scan-window jitter and lost packets. The
//! estimator walks the gaps between consecutive timestamps once, in order,
//! and keeps a running estimate that:
//!
//! - re-seeds on a much shorter gap while fewer than [`WARM_UP_SAMPLES`]
//!   timestamps have been seen,
//! - averages gaps within [`CLOSE_TOLERANCE_NANOS`] of the estimate over a
//!   window of at most [`WARM_UP_SAMPLES`],
//! - slowly folds in gaps up to [`SLOW_BLEND_RATIO`] times the estimate,
//! - ignores everything else (multiples of the period from missed packets).
//!
//! An estimate of [`INSUFFICIENT_DATA`] means "unknown", never "zero period".

use std::time::Duration;

/// Sentinel for "no usable gap has been seen yet".
pub const INSUFFICIENT_DATA: u64 = 0;

/// Number of timestamps after which the estimate stops re-seeding and the
/// close-sample moving average stops widening.
pub const WARM_UP_SAMPLES: usize = 10;

/// Gaps shorter than `estimate * RESEED_RATIO` replace the estimate during warm-up.
pub const RESEED_RATIO: f64 = 0.7;

/// Gaps shorter than `estimate + CLOSE_TOLERANCE_NANOS` count as close samples.
pub const CLOSE_TOLERANCE_NANOS: u64 = 3_000_000;

/// Gaps shorter than `estimate * SLOW_BLEND_RATIO` are blended with weight 1/30.
pub const SLOW_BLEND_RATIO: f64 = 1.4;

const SLOW_BLEND_WINDOW: u64 = 30;

/// Estimate the advertising interval from unordered capture timestamps.
///
/// Returns [`INSUFFICIENT_DATA`] for fewer than two timestamps or when no
/// gap was usable.
///
/// # Example
/// ```
/// use beacon_scan::interval::estimate_interval_nanos;
///
/// assert_eq!(estimate_interval_nanos(&[3_000_000, 0, 2_000_000, 1_000_000]), 1_000_000);
/// assert_eq!(estimate_interval_nanos(&[100]), 0);
/// ```
pub fn estimate_interval_nanos(timestamps: &[u64]) -> u64 {
    if timestamps.len() < 2 {
        return INSUFFICIENT_DATA;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    estimate_sorted(&sorted)
}

/// Same as [`estimate_interval_nanos`] for timestamps already in ascending order.
///
/// Unsorted input yields a wrong estimate, so only callers that keep their
/// timestamps sorted may use it.
pub(crate) fn estimate_sorted(sorted: &[u64]) -> u64 {
    debug_assert!(sorted.is_sorted());

    let mut result = INSUFFICIENT_DATA;

    for (i, pair) in sorted.windows(2).enumerate() {
        // timestamps visited so far, including the first one
        let count = i + 2;
        let delta = pair[1].saturating_sub(pair[0]);

        if delta == 0 {
            continue;
        }

        if result == INSUFFICIENT_DATA {
            result = delta;
        } else if (delta as f64) < result as f64 * RESEED_RATIO && count < WARM_UP_SAMPLES {
            result = delta;
        } else if delta < result.saturating_add(CLOSE_TOLERANCE_NANOS) {
            let limited = count.min(WARM_UP_SAMPLES) as u64;
            result = blend(result, limited - 1, delta, limited);
        } else if (delta as f64) < result as f64 * SLOW_BLEND_RATIO {
            result = blend(result, SLOW_BLEND_WINDOW - 1, delta, SLOW_BLEND_WINDOW);
        }
    }

    result
}

/// Convert an estimate to a [`Duration`], mapping the sentinel to `None`.
pub fn as_duration(nanos: u64) -> Option<Duration> {
    (nanos != INSUFFICIENT_DATA).then(|| Duration::from_nanos(nanos))
}

/// `(current * weight + sample) / window`, computed without overflow.
fn blend(current: u64, weight: u64, sample: u64, window: u64) -> u64 {
    let total = u128::from(current) * u128::from(weight) + u128::from(sample);
    u64::try_from(total / u128::from(window)).unwrap_or(u64::MAX)
}
