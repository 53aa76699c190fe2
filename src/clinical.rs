// src/clinical.rs
//
// Threshold-crossing metric extraction shared by the per-view estimator
// and the ensemble aggregator, so both stages report identical semantics:
//   Hesitancy     : recording start to first sample above threshold
//   Voiding_Time  : wall-clock span from flow onset to flow end
//   Flow_Time     : sum of flowing sample intervals (gaps excluded)
//   Time_to_Qmax  : peak time relative to flow onset

use crate::series::dt_prepend;
use crate::types::ClinicalMetrics;

/// Derive the scalar metrics from a smoothed curve and its cumulative
/// volume. Returns all-zero metrics when no sample exceeds `threshold`.
pub fn compute_metrics(
    times: &[f64],
    flow_smooth: &[f64],
    accumulated_volume_ml: &[f64],
    threshold_ml_s: f64,
) -> ClinicalMetrics {
    let mut metrics = ClinicalMetrics::default();
    if times.is_empty() {
        return metrics;
    }

    let dt = dt_prepend(times);
    let flowing: Vec<bool> = flow_smooth.iter().map(|&f| f > threshold_ml_s).collect();

    let first = flowing.iter().position(|&f| f);
    let last = flowing.iter().rposition(|&f| f);
    let (start_idx, end_idx) = match (first, last) {
        (Some(s), Some(e)) => (s, e),
        _ => return metrics,
    };

    let start_time = times[start_idx];
    let end_time = times[end_idx];

    metrics.hesitancy = start_time;
    metrics.voiding_time = end_time - start_time;
    metrics.flow_time = flowing
        .iter()
        .zip(dt.iter())
        .filter(|(&f, _)| f)
        .map(|(_, &d)| d)
        .sum();

    let (qmax_idx, qmax) = flow_smooth
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |acc, (i, &v)| {
            if v > acc.1 {
                (i, v)
            } else {
                acc
            }
        });
    metrics.qmax = qmax;
    metrics.time_to_qmax = times[qmax_idx] - start_time;

    metrics.voided_volume = *accumulated_volume_ml.last().unwrap_or(&0.0);
    if metrics.flow_time > 0.0 {
        metrics.average_flow_rate = metrics.voided_volume / metrics.flow_time;
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::cumulative_trapezoid;

    fn uniform_times(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn no_flow_yields_all_zero() {
        let times = uniform_times(10, 0.1);
        let flow = vec![0.2; 10];
        let vol = cumulative_trapezoid(&flow, &times);
        let m = compute_metrics(&times, &flow, &vol, 1.0);
        assert_eq!(m.qmax, 0.0);
        assert_eq!(m.voided_volume, 0.0);
        assert_eq!(m.hesitancy, 0.0);
        assert_eq!(m.average_flow_rate, 0.0);
    }

    #[test]
    fn interruption_splits_flow_time_but_not_voiding_time() {
        // 1 Hz sampling: flow for 3 s, a 2 s gap, flow for 3 s
        let times = uniform_times(10, 1.0);
        let flow = vec![0.0, 5.0, 5.0, 5.0, 0.0, 0.0, 5.0, 5.0, 5.0, 0.0];
        let vol = cumulative_trapezoid(&flow, &times);
        let m = compute_metrics(&times, &flow, &vol, 1.0);

        assert!((m.hesitancy - 1.0).abs() < 1e-9);
        // onset at t=1, end at t=8
        assert!((m.voiding_time - 7.0).abs() < 1e-9);
        // six flowing samples, each preceded by a 1 s interval
        assert!((m.flow_time - 6.0).abs() < 1e-9);
    }

    #[test]
    fn time_to_qmax_is_relative_to_onset() {
        let times = uniform_times(6, 1.0);
        let flow = vec![0.0, 2.0, 4.0, 9.0, 4.0, 0.0];
        let vol = cumulative_trapezoid(&flow, &times);
        let m = compute_metrics(&times, &flow, &vol, 1.0);
        assert!((m.qmax - 9.0).abs() < 1e-9);
        // onset t=1, peak t=3
        assert!((m.time_to_qmax - 2.0).abs() < 1e-9);
    }

    #[test]
    fn average_flow_rate_uses_flow_time() {
        let times = uniform_times(4, 1.0);
        let flow = vec![0.0, 6.0, 6.0, 0.0];
        let vol = cumulative_trapezoid(&flow, &times);
        let m = compute_metrics(&times, &flow, &vol, 1.0);
        assert!(m.flow_time > 0.0);
        assert!((m.average_flow_rate - m.voided_volume / m.flow_time).abs() < 1e-9);
    }
}
