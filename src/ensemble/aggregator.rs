// src/ensemble/aggregator.rs
//
// Synchronization barrier of the whole pipeline: consumes the completed,
// immutable per-view series and produces the single calibrated result.
//
// View availability drives the path taken:
//   BOTH    : confidence scoring, optional per-view volume normalization,
//             time alignment, weighted fusion, then post-processing
//   ONE     : that view's (optionally normalized) series goes straight to
//             post-processing
//   NEITHER : `Error::NoValidData`, the one fatal condition

use crate::clinical;
use crate::ensemble::confidence::calculate_confidence;
use crate::ensemble::fusion::fuse_signals;
use crate::ensemble::postprocess::post_process_flow;
use crate::error::{Error, Result};
use crate::series::cumulative_trapezoid;
use crate::types::{ClinicalMetrics, EnsembleConfig, FusedSeries, ViewResult};
use crate::volume::normalize_flow_by_volume;
use tracing::{info, warn};

pub struct EnsembleAggregator {
    config: EnsembleConfig,
}

struct ViewInput {
    times: Vec<f64>,
    flow: Vec<f64>,
    confidence: f64,
}

impl EnsembleAggregator {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config }
    }

    pub fn process(
        &self,
        top: Option<&ViewResult>,
        bottom: Option<&ViewResult>,
        manual_volume_ml: Option<f64>,
    ) -> Result<(FusedSeries, ClinicalMetrics)> {
        let top_input = top
            .filter(|r| !r.series.samples.is_empty())
            .map(|r| self.prepare_view(r, manual_volume_ml));
        let bottom_input = bottom
            .filter(|r| !r.series.samples.is_empty())
            .map(|r| self.prepare_view(r, manual_volume_ml));

        let (times, raw_flow) = match (top_input, bottom_input) {
            (Some(top), Some(bottom)) => {
                info!(
                    "Confidence scores -- top: {:.2}, bottom: {:.2}",
                    top.confidence, bottom.confidence
                );
                fuse_signals(
                    &top.times,
                    &top.flow,
                    top.confidence,
                    &bottom.times,
                    &bottom.flow,
                    bottom.confidence,
                    self.config.resample_dt_s,
                )
            }
            (Some(only), None) | (None, Some(only)) => {
                info!(
                    "Single view available (confidence {:.2}), fusion skipped",
                    only.confidence
                );
                (only.times, only.flow)
            }
            (None, None) => return Err(Error::NoValidData),
        };

        // Post-process and integrate the final curve.
        let (mut flow_smooth, qmax, t_qmax) = post_process_flow(&times, &raw_flow, &self.config);
        let mut accumulated = cumulative_trapezoid(&flow_smooth, &times);

        // Reconcile against the externally measured volume: when one is
        // supplied, the reported total must match it exactly.
        if let Some(volume) = manual_volume_ml {
            let computed_total = accumulated.last().copied().unwrap_or(0.0);
            let correction = if computed_total > 0.0 {
                volume / computed_total
            } else {
                warn!(
                    "Computed volume {:.2} ml is non-positive, reconciliation skipped",
                    computed_total
                );
                1.0
            };
            for f in flow_smooth.iter_mut() {
                *f *= correction;
            }
            for v in accumulated.iter_mut() {
                *v *= correction;
            }
        }

        info!("Post-processed Qmax {:.2} ml/s at {:.2} s", qmax, t_qmax);

        let metrics = clinical::compute_metrics(
            &times,
            &flow_smooth,
            &accumulated,
            self.config.flow_threshold_ml_s,
        );

        Ok((
            FusedSeries {
                timestamp_s: times,
                flow_ml_s: raw_flow,
                flow_smooth,
                accumulated_volume_ml: accumulated,
            },
            metrics,
        ))
    }

    /// Confidence is scored on the raw series; normalization (when a
    /// manual volume is known) happens afterwards so both views arrive at
    /// the fusion step on the same physical scale.
    fn prepare_view(&self, result: &ViewResult, manual_volume_ml: Option<f64>) -> ViewInput {
        let times = result.series.timestamps();
        let mut flow = result.series.raw_flow();
        let confidence = calculate_confidence(&flow, &self.config);

        if let Some(volume) = manual_volume_ml {
            let (normalized, computed_total, factor) =
                normalize_flow_by_volume(&flow, &times, volume);
            info!(
                "{} view: integrated {:.1} ml, normalization factor {:.3}",
                result.view.as_str(),
                computed_total,
                factor
            );
            flow = normalized;
        }

        ViewInput {
            times,
            flow,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowSample, FlowSeries, ViewLabel};

    fn make_view(view: ViewLabel, times: &[f64], flows: &[f64]) -> ViewResult {
        let samples: Vec<FlowSample> = times
            .iter()
            .zip(flows.iter())
            .enumerate()
            .map(|(i, (&t, &f))| FlowSample {
                timestamp_s: t,
                frame_id: i as u64,
                area_cm2: 0.0,
                velocity_cm_s: 0.0,
                flow_ml_s: f,
            })
            .collect();
        let accumulated = cumulative_trapezoid(flows, times);
        ViewResult {
            view,
            series: FlowSeries {
                samples,
                flow_smooth: flows.to_vec(),
                accumulated_volume_ml: accumulated,
            },
            metrics: ClinicalMetrics::default(),
            px_to_cm: 0.052,
            annotated_video: None,
        }
    }

    fn bell(n: usize, fps: f64, peak: f64) -> (Vec<f64>, Vec<f64>) {
        let times: Vec<f64> = (0..n).map(|i| i as f64 / fps).collect();
        let flows: Vec<f64> = (0..n)
            .map(|i| {
                let x = i as f64 / (n - 1) as f64;
                peak * (std::f64::consts::PI * x).sin().max(0.0)
            })
            .collect();
        (times, flows)
    }

    #[test]
    fn neither_view_is_fatal() {
        let aggregator = EnsembleAggregator::new(EnsembleConfig::default());
        let err = aggregator.process(None, None, None).unwrap_err();
        assert!(matches!(err, Error::NoValidData));
    }

    #[test]
    fn single_view_equals_direct_postprocess() {
        let config = EnsembleConfig::default();
        let (times, flows) = bell(300, 30.0, 20.0);
        let view = make_view(ViewLabel::Top, &times, &flows);

        let aggregator = EnsembleAggregator::new(config.clone());
        let (fused, metrics) = aggregator.process(Some(&view), None, None).unwrap();

        let (expected_smooth, _, _) = post_process_flow(&times, &flows, &config);
        let expected_vol = cumulative_trapezoid(&expected_smooth, &times);
        let expected_metrics = clinical::compute_metrics(
            &times,
            &expected_smooth,
            &expected_vol,
            config.flow_threshold_ml_s,
        );

        assert_eq!(fused.flow_smooth, expected_smooth);
        assert!((metrics.qmax - expected_metrics.qmax).abs() < 1e-12);
        assert!((metrics.voided_volume - expected_metrics.voided_volume).abs() < 1e-12);
    }

    #[test]
    fn bottom_only_works_like_top_only() {
        let (times, flows) = bell(300, 30.0, 20.0);
        let top_view = make_view(ViewLabel::Top, &times, &flows);
        let bottom_view = make_view(ViewLabel::Bottom, &times, &flows);

        let aggregator = EnsembleAggregator::new(EnsembleConfig::default());
        let (from_top, _) = aggregator.process(Some(&top_view), None, None).unwrap();
        let (from_bottom, _) = aggregator.process(None, Some(&bottom_view), None).unwrap();
        assert_eq!(from_top.flow_smooth, from_bottom.flow_smooth);
    }

    #[test]
    fn fused_output_lives_on_the_primary_grid() {
        let (t_top, f_top) = bell(300, 30.0, 20.0);
        let (t_bottom, f_bottom) = bell(250, 25.0, 22.0);
        let top = make_view(ViewLabel::Top, &t_top, &f_top);
        let bottom = make_view(ViewLabel::Bottom, &t_bottom, &f_bottom);

        let aggregator = EnsembleAggregator::new(EnsembleConfig::default());
        let (fused, metrics) = aggregator.process(Some(&top), Some(&bottom), None).unwrap();
        assert_eq!(fused.timestamp_s, t_top);
        assert_eq!(fused.flow_smooth.len(), t_top.len());
        assert!(metrics.qmax > 0.0);
    }

    #[test]
    fn reconciliation_matches_manual_volume_exactly() {
        let (times, flows) = bell(300, 30.0, 20.0);
        let view = make_view(ViewLabel::Top, &times, &flows);
        let aggregator = EnsembleAggregator::new(EnsembleConfig::default());

        let (unscaled, unscaled_metrics) = aggregator.process(Some(&view), None, None).unwrap();
        let manual = 369.0;
        let (fused, metrics) = aggregator
            .process(Some(&view), None, Some(manual))
            .unwrap();

        let total = *fused.accumulated_volume_ml.last().unwrap();
        assert!((total - manual).abs() < 1e-6, "total {}", total);
        assert!((metrics.voided_volume - manual).abs() < 1e-6);

        // Qmax scales by the same correction factor as the curve
        let factor = metrics.qmax / unscaled_metrics.qmax;
        let expected_factor = manual / unscaled.accumulated_volume_ml.last().unwrap();
        assert!((factor - expected_factor).abs() < 1e-6);
    }

    #[test]
    fn reconciliation_skipped_for_silent_series() {
        let times: Vec<f64> = (0..100).map(|i| i as f64 / 30.0).collect();
        let flows = vec![0.0; 100];
        let view = make_view(ViewLabel::Top, &times, &flows);
        let aggregator = EnsembleAggregator::new(EnsembleConfig::default());
        let (fused, metrics) = aggregator
            .process(Some(&view), None, Some(250.0))
            .unwrap();
        // nothing to scale: the curve stays silent and the metrics zero
        assert!(fused.flow_smooth.iter().all(|&f| f == 0.0));
        assert_eq!(metrics.voided_volume, 0.0);
    }
}
