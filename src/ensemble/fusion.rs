// src/ensemble/fusion.rs
//
// Two-view time alignment and confidence-weighted fusion. The two
// recordings do not start at the same instant; both series are resampled
// onto a coarse common grid, cross-correlated over all lags, and the
// secondary timeline is shifted by the best lag before interpolating onto
// the primary view's own grid.
//
// Known limitation: a single dominant lag is assumed for the whole clip.
// Views that drift in relative speed over time are not compensated.

use crate::series::interp;
use ndarray::Array1;
use tracing::debug;

/// Estimate the temporal offset of `(t2, f2)` against `(t1, f1)` and
/// return the shifted copy of `t2`.
pub fn synchronize_signals(
    t1: &[f64],
    f1: &[f64],
    t2: &[f64],
    f2: &[f64],
    dt: f64,
) -> Vec<f64> {
    let max_time = last_or_zero(t1).max(last_or_zero(t2));
    let steps = (max_time / dt).ceil() as usize;
    if steps == 0 {
        return t2.to_vec();
    }

    let grid: Vec<f64> = (0..steps).map(|i| i as f64 * dt).collect();
    let f1_resampled = interp(&grid, t1, f1, 0.0, 0.0);
    let f2_resampled = interp(&grid, t2, f2, 0.0, 0.0);

    let lag = best_correlation_lag(&f1_resampled, &f2_resampled);
    let time_shift = lag as f64 * dt;
    debug!("Cross-correlation lag: {} steps ({:+.2} s)", lag, time_shift);

    t2.iter().map(|t| t + time_shift).collect()
}

/// Argmax lag of the full cross-correlation
/// `c(lag) = Σ_i a[i]·b[i-lag]`, lag ∈ [-(len(b)-1), len(a)-1].
/// A positive lag means `b` happens earlier than `a`.
fn best_correlation_lag(a: &[f64], b: &[f64]) -> i64 {
    let n = a.len() as i64;
    let m = b.len() as i64;
    let mut best_lag = 0i64;
    let mut best_value = f64::MIN;

    for lag in -(m - 1)..n {
        let mut sum = 0.0;
        let start = lag.max(0);
        let end = n.min(m + lag);
        for i in start..end {
            sum += a[i as usize] * b[(i - lag) as usize];
        }
        if sum > best_value {
            best_value = sum;
            best_lag = lag;
        }
    }
    best_lag
}

/// Fuse the secondary view into the primary view's time grid, weighted by
/// the per-view confidence scores. Returns `(times, fused_flow)`.
pub fn fuse_signals(
    t_primary: &[f64],
    f_primary: &[f64],
    conf_primary: f64,
    t_secondary: &[f64],
    f_secondary: &[f64],
    conf_secondary: f64,
    dt: f64,
) -> (Vec<f64>, Vec<f64>) {
    let t_secondary_shifted =
        synchronize_signals(t_primary, f_primary, t_secondary, f_secondary, dt);

    let f_secondary_aligned = interp(t_primary, &t_secondary_shifted, f_secondary, 0.0, 0.0);

    let primary = Array1::from_vec(f_primary.to_vec());
    let secondary = Array1::from_vec(f_secondary_aligned);

    let total_weight = conf_primary + conf_secondary;
    let fused = if total_weight == 0.0 {
        // both views scored zero: an unweighted mean beats dividing by zero
        (&primary + &secondary) / 2.0
    } else {
        let w_primary = conf_primary / total_weight;
        let w_secondary = conf_secondary / total_weight;
        &primary * w_primary + &secondary * w_secondary
    };

    (t_primary.to_vec(), fused.to_vec())
}

fn last_or_zero(values: &[f64]) -> f64 {
    values.last().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(times: &[f64], start: f64, end: f64, level: f64) -> Vec<f64> {
        times
            .iter()
            .map(|&t| if t >= start && t < end { level } else { 0.0 })
            .collect()
    }

    #[test]
    fn correlation_recovers_known_lag() {
        // identical 10 s pulses, the second recorded 2 s late
        let t: Vec<f64> = (0..300).map(|i| i as f64 / 10.0).collect();
        let f1 = pulse(&t, 5.0, 15.0, 10.0);
        let f2 = pulse(&t, 7.0, 17.0, 10.0);

        let shifted = synchronize_signals(&t, &f1, &t, &f2, 0.1);
        // the secondary timeline must move back by ~2 s
        let shift = shifted[0] - t[0];
        assert!((shift + 2.0).abs() < 0.15, "shift {}", shift);
    }

    #[test]
    fn aligned_signals_need_no_shift() {
        let t: Vec<f64> = (0..200).map(|i| i as f64 / 10.0).collect();
        let f = pulse(&t, 3.0, 12.0, 8.0);
        let shifted = synchronize_signals(&t, &f, &t, &f, 0.1);
        assert!((shifted[0] - t[0]).abs() < 1e-9);
    }

    #[test]
    fn fusion_weights_by_confidence() {
        let t = vec![0.0, 1.0, 2.0];
        let f1 = vec![10.0, 10.0, 10.0];
        let f2 = vec![20.0, 20.0, 20.0];

        // 3:1 weighting ⇒ 0.75·10 + 0.25·20 = 12.5
        let (_, fused) = fuse_signals(&t, &f1, 0.9, &t, &f2, 0.3, 0.1);
        assert!((fused[1] - 12.5).abs() < 1e-9);
    }

    #[test]
    fn zero_confidence_falls_back_to_plain_mean() {
        let t = vec![0.0, 1.0, 2.0];
        let f1 = vec![10.0, 10.0, 10.0];
        let f2 = vec![20.0, 20.0, 20.0];
        let (_, fused) = fuse_signals(&t, &f1, 0.0, &t, &f2, 0.0, 0.1);
        assert!((fused[0] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn secondary_contributes_zero_outside_its_range() {
        let t1 = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let f1 = vec![10.0; 5];
        // flat secondary signal covering only [0, 1]: no information to
        // correlate on, so no shift; beyond 1 s it interpolates as zero
        let t2 = vec![0.0, 1.0];
        let f2 = vec![10.0; 2];

        let (_, fused) = fuse_signals(&t1, &f1, 0.5, &t2, &f2, 0.5, 0.1);
        assert!((fused[0] - 10.0).abs() < 1e-9);
        assert!((fused[4] - 5.0).abs() < 1e-9);
    }
}
