//! Shared stochastic helpers: every behavior in this crate that needs a
//! random draw goes through here so the clamping and degenerate-input
//! guards live in one place.

use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Samples `N(mean, std_dev)` clamped to `>= floor`. `std_dev <= 0` (the
/// `min == max` case) skips the distribution entirely and returns `mean`,
/// since `rand_distr::Normal` rejects a non-positive standard deviation.
pub fn sample_normal_clamped(mean: f64, std_dev: f64, floor: f64) -> f64 {
    if std_dev <= 0.0 {
        return mean.max(floor);
    }
    let normal = Normal::new(mean, std_dev).unwrap_or_else(|_| Normal::new(mean, 0.0).unwrap());
    let sample = normal.sample(&mut rand::rng());
    sample.max(floor)
}

/// `N(mu=(min+max)/2, sigma=(max-min)/6)` clamped to `>= 0`, the work-duration
/// sampling rule used throughout.
pub fn sample_range_ms(min: f64, max: f64) -> f64 {
    sample_range_ms_floor(min, max, 0.0)
}

/// As [`sample_range_ms`] but with a caller-chosen floor -- the network leg
/// uses `1.0` since a zero-latency hop isn't meaningful to simulate.
pub fn sample_range_ms_floor(min: f64, max: f64, floor: f64) -> f64 {
    let mean = (min + max) / 2.0;
    let std_dev = (max - min) / 6.0;
    sample_normal_clamped(mean, std_dev, floor)
}

/// Uniform jitter in `[-frac * base, +frac * base]`.
pub fn jitter(base: f64, frac: f64) -> f64 {
    if base <= 0.0 {
        return 0.0;
    }
    let span = base * frac;
    rand::rng().random_range(-span..=span)
}

/// `true` with probability `p` (clamped to `[0, 1]`).
pub fn chance(p: f64) -> bool {
    rand::rng().random::<f64>() < p.clamp(0.0, 1.0)
}

/// Milliseconds since the Unix epoch, for `Request`/`Response` timestamps.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_std_dev_returns_mean() {
        for _ in 0..20 {
            assert_eq!(sample_range_ms(50.0, 50.0), 50.0);
        }
    }

    #[test]
    fn sampled_range_is_nonnegative() {
        for _ in 0..200 {
            assert!(sample_range_ms(0.0, 10.0) >= 0.0);
        }
    }

    #[test]
    fn chance_respects_extremes() {
        assert!(!chance(0.0));
        assert!(chance(1.0));
    }
}
