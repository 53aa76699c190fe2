// src/flow_estimation.rs
//
// Accumulates per-frame (area, velocity) into the per-view flow series.
// `update` is called once per frame in temporal order; `finalize` runs the
// smoothing/integration pass once the view's frame loop is done.

use crate::clinical;
use crate::series::{cumulative_trapezoid, fill_edges, rolling_mean_centered};
use crate::types::{ClinicalMetrics, FlowConfig, FlowSample, FlowSeries};

pub struct FlowEstimator {
    samples: Vec<FlowSample>,
    config: FlowConfig,
}

impl FlowEstimator {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            samples: Vec::new(),
            config,
        }
    }

    /// Append one frame's measurement. Q (ml/s) = area (cm²) × velocity
    /// (cm/s), 1 cm³ = 1 ml. Clamped to zero: upward flow is noise here.
    /// Returns the instantaneous value for live overlay/logging.
    pub fn update(
        &mut self,
        area_cm2: f64,
        velocity_cm_s: f64,
        timestamp_s: f64,
        frame_id: u64,
    ) -> f64 {
        let flow_ml_s = (area_cm2 * velocity_cm_s).max(0.0);
        self.samples.push(FlowSample {
            timestamp_s,
            frame_id,
            area_cm2,
            velocity_cm_s,
            flow_ml_s,
        });
        flow_ml_s
    }

    /// Most recent samples, for the live trend inset.
    pub fn recent(&self, n: usize) -> &[FlowSample] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }

    /// Smooth, integrate, and extract metrics. `None` means the view
    /// produced no usable signal at all.
    pub fn finalize(mut self) -> Option<(FlowSeries, ClinicalMetrics)> {
        if self.samples.is_empty() {
            return None;
        }

        // Cap raw detector spikes before any smoothing sees them.
        for s in self.samples.iter_mut() {
            s.flow_ml_s = s.flow_ml_s.min(self.config.raw_clamp_ml_s);
        }

        let times: Vec<f64> = self.samples.iter().map(|s| s.timestamp_s).collect();
        let raw: Vec<f64> = self.samples.iter().map(|s| s.flow_ml_s).collect();

        let window = self.config.smooth_window;
        let flow_smooth = if raw.len() > window {
            let mut smooth = rolling_mean_centered(&raw, window, window / 2);
            fill_edges(&mut smooth);
            smooth
        } else {
            raw.clone()
        };

        let accumulated_volume_ml = cumulative_trapezoid(&flow_smooth, &times);

        let metrics = clinical::compute_metrics(
            &times,
            &flow_smooth,
            &accumulated_volume_ml,
            self.config.flow_threshold_ml_s,
        );

        Some((
            FlowSeries {
                samples: self.samples,
                flow_smooth,
                accumulated_volume_ml,
            },
            metrics,
        ))
    }
}
