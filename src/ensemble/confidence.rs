// src/ensemble/confidence.rs
//
// Per-view reliability score used as the fusion weight. Derived from the
// view's own flow series only; no cross-view knowledge.
//
// Criteria:
//   1. Jitter: frame-to-frame std relative to mean flow
//   2. Dropouts: zeros inside the active flow span
//   3. Shape sanity: peaks beyond the physical range

use crate::series::{mean, std_dev};
use crate::types::EnsembleConfig;

/// Score a flow series in [floor, 1.0]. An empty series scores 0.0, the
/// aggregator's marker for a missing view; a near-silent series scores
/// the floor.
pub fn calculate_confidence(flow: &[f64], config: &EnsembleConfig) -> f64 {
    if flow.is_empty() {
        return 0.0;
    }

    let mut score = 1.0;

    let mean_flow = mean(flow);
    if mean_flow < 1e-3 {
        return config.confidence_floor;
    }

    // 1. Jitter: high-frequency, high-amplitude noise relative to signal.
    let diffs: Vec<f64> = flow.windows(2).map(|w| w[1] - w[0]).collect();
    let noise_ratio = std_dev(&diffs) / mean_flow;
    if noise_ratio > config.jitter_heavy_ratio {
        score *= config.jitter_heavy_penalty;
    } else if noise_ratio > config.jitter_light_ratio {
        score *= config.jitter_light_penalty;
    }

    // 2. Dropouts: inactive samples inside the span between the first and
    // last active sample.
    let threshold = config.activity_threshold_ml_s;
    let active: Vec<usize> = flow
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > threshold)
        .map(|(i, _)| i)
        .collect();
    if active.len() > 2 {
        let (start, end) = (active[0], active[active.len() - 1]);
        let segment = &flow[start..=end];
        let zero_count = segment.iter().filter(|&&f| f <= threshold).count();
        let zero_ratio = zero_count as f64 / segment.len() as f64;
        if zero_ratio > config.dropout_penalty_ratio {
            score *= 1.0 - zero_ratio;
        }
    }

    // 3. Shape sanity: wild peaks mean the detector latched onto something
    // that is not the stream.
    let max_flow = flow.iter().cloned().fold(f64::MIN, f64::max);
    if max_flow > config.implausible_peak_ml_s {
        score *= config.implausible_peak_penalty;
    }

    score.clamp(config.confidence_floor, 1.0)
}
