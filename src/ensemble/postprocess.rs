// src/ensemble/postprocess.rs
//
// Final conditioning of the fused curve. Heavier than the per-view
// smoothing: fused noise compounds, and this curve is what the clinical
// metrics are read from.

use crate::series::{fill_edges, rolling_mean_centered, rolling_median_centered};
use crate::types::EnsembleConfig;

/// Clamp to the physical range, remove outliers with a centered median,
/// apply the final rolling mean, and extract Qmax with its absolute
/// timestamp. Returns `(flow_smooth, qmax, t_qmax)`.
pub fn post_process_flow(
    times: &[f64],
    flow: &[f64],
    config: &EnsembleConfig,
) -> (Vec<f64>, f64, f64) {
    let clamped: Vec<f64> = flow
        .iter()
        .map(|f| f.clamp(0.0, config.post_clamp_ml_s))
        .collect();

    let despiked = if clamped.len() >= config.median_window {
        let mut median = rolling_median_centered(&clamped, config.median_window, config.median_window);
        fill_edges(&mut median);
        median
    } else {
        clamped
    };

    let window = config.smooth_window;
    let smooth = if despiked.len() > window {
        let mut mean = rolling_mean_centered(&despiked, window, window / 4);
        fill_edges(&mut mean);
        mean
    } else {
        despiked
    };

    let mut qmax = 0.0;
    let mut t_qmax = times.first().copied().unwrap_or(0.0);
    for (i, &value) in smooth.iter().enumerate() {
        if value > qmax {
            qmax = value;
            t_qmax = times[i];
        }
    }

    (smooth, qmax, t_qmax)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EnsembleConfig {
        EnsembleConfig::default()
    }

    fn times(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 / 30.0).collect()
    }

    #[test]
    fn clamps_to_physical_ceiling() {
        let t = times(30);
        let flow = vec![500.0; 30];
        let (smooth, qmax, _) = post_process_flow(&t, &flow, &config());
        assert!(smooth.iter().all(|&f| f <= 80.0));
        assert!((qmax - 80.0).abs() < 1e-9);
    }

    #[test]
    fn negative_artifacts_are_clamped_to_zero() {
        let t = times(30);
        let flow = vec![-3.0; 30];
        let (smooth, qmax, _) = post_process_flow(&t, &flow, &config());
        assert!(smooth.iter().all(|&f| f == 0.0));
        assert_eq!(qmax, 0.0);
    }

    #[test]
    fn median_filter_removes_isolated_spike() {
        let t = times(60);
        let mut flow = vec![10.0; 60];
        flow[30] = 79.0;
        let (smooth, qmax, _) = post_process_flow(&t, &flow, &config());
        assert!(qmax < 15.0, "qmax {}", qmax);
        assert!(smooth[30] < 15.0);
    }

    #[test]
    fn qmax_timestamp_is_absolute() {
        // long enough to engage the final rolling mean
        let n = 200;
        let t = times(n);
        let flow: Vec<f64> = (0..n)
            .map(|i| {
                let x = i as f64 / (n - 1) as f64;
                40.0 * (std::f64::consts::PI * x).sin()
            })
            .collect();
        let (_, qmax, t_qmax) = post_process_flow(&t, &flow, &config());
        assert!(qmax > 0.0);
        // peak of the sine sits mid-series
        let mid = t[n / 2];
        assert!((t_qmax - mid).abs() < 1.0, "t_qmax {} vs {}", t_qmax, mid);
    }

    #[test]
    fn short_series_passes_through_unsmoothed() {
        let t = times(5);
        let flow = vec![1.0, 2.0, 3.0, 2.0, 1.0];
        let (smooth, qmax, t_qmax) = post_process_flow(&t, &flow, &config());
        assert_eq!(smooth, flow);
        assert!((qmax - 3.0).abs() < 1e-9);
        assert!((t_qmax - t[2]).abs() < 1e-9);
    }
}
