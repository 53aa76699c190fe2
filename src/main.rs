// src/main.rs

mod calibration;
mod clinical;
mod config;
mod ensemble;
mod error;
mod flow_estimation;
mod segmentation;
mod series;
mod tracking;
mod types;
mod video_processor;
mod visualize;
mod volume;

use anyhow::Result;
use ensemble::EnsembleAggregator;
use flow_estimation::FlowEstimator;
use segmentation::StreamSegmenter;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracking::StreamTracker;
use tracing::{error, info, warn};
use types::{ClinicalMetrics, Config, FusedSeries, ViewLabel, ViewResult};
use video_processor::VideoProcessor;
use visualize::Visualizer;

const CONFIG_PATH: &str = "config.yaml";

fn main() -> Result<()> {
    let config = Config::load(CONFIG_PATH)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("uroflow_analysis={}", config.logging.level))
        .init();

    info!("Uroflow Analysis Pipeline Starting");
    if !Path::new(CONFIG_PATH).exists() {
        info!("No {} found, using built-in defaults", CONFIG_PATH);
    }

    if config.video.top_video.is_none() && config.video.bottom_video.is_none() {
        anyhow::bail!("no video inputs configured (video.top_video / video.bottom_video)");
    }

    // Calibration runs once, before any frame loop. Failure is recoverable:
    // the fallback scale keeps the run alive.
    let px_to_cm = match config.calibration.image_path.as_deref() {
        Some(path) => match calibration::compute_px_to_cm_scale(path, &config.calibration) {
            Ok(scale) => {
                info!("✓ Calibration scale: {:.5} cm/px", scale);
                scale
            }
            Err(e) => {
                warn!(
                    "Calibration failed ({}), falling back to {:.3} cm/px",
                    e, config.calibration.fallback_px_to_cm
                );
                config.calibration.fallback_px_to_cm
            }
        },
        None => {
            info!(
                "No calibration image configured, using fallback scale {:.3} cm/px",
                config.calibration.fallback_px_to_cm
            );
            config.calibration.fallback_px_to_cm
        }
    };

    let run_dir = PathBuf::from(&config.video.output_dir).join(format!(
        "run_{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));
    std::fs::create_dir_all(&run_dir)?;
    info!("Output directory: {}", run_dir.display());

    let video_processor = VideoProcessor::new(config.video.clone());
    let top_path = config.video.top_video.clone().map(PathBuf::from);
    let bottom_path = config.video.bottom_video.clone().map(PathBuf::from);

    // The two per-view pipelines are mutually independent; each carries its
    // own cross-frame state and runs strictly sequentially inside its
    // thread. The aggregator below is the join barrier.
    let config_ref = &config;
    let processor_ref = &video_processor;
    let run_dir_ref = run_dir.as_path();
    let (top_result, bottom_result) = std::thread::scope(|s| {
        let top_handle = top_path.as_deref().map(|path| {
            s.spawn(move || {
                process_single_video(
                    path,
                    ViewLabel::Top,
                    processor_ref,
                    config_ref,
                    px_to_cm,
                    run_dir_ref,
                )
            })
        });
        let bottom_handle = bottom_path.as_deref().map(|path| {
            s.spawn(move || {
                process_single_video(
                    path,
                    ViewLabel::Bottom,
                    processor_ref,
                    config_ref,
                    px_to_cm,
                    run_dir_ref,
                )
            })
        });
        (
            join_view(top_handle, ViewLabel::Top),
            join_view(bottom_handle, ViewLabel::Bottom),
        )
    });

    for view in [&top_result, &bottom_result].into_iter().flatten() {
        tracing::debug!(
            "{} view: scale {:.5} cm/px, per-view Qmax {:.2} ml/s",
            view.view.as_str(),
            view.px_to_cm,
            view.metrics.qmax
        );
        let csv_path = run_dir.join(format!("flow_timeseries_{}.csv", view.view.as_str()));
        write_series_csv(
            &csv_path,
            &view.series.timestamps(),
            &view.series.raw_flow(),
            &view.series.flow_smooth,
            &view.series.accumulated_volume_ml,
        )?;
        if let Some(path) = &view.annotated_video {
            info!("Annotated {} view: {}", view.view.as_str(), path.display());
        }
    }

    info!(">>> Running ensemble aggregation");
    let aggregator = EnsembleAggregator::new(config.ensemble.clone());
    let (fused, metrics) = aggregator.process(
        top_result.as_ref(),
        bottom_result.as_ref(),
        config.manual_volume_ml,
    )?;

    write_flow_csv(&run_dir.join("flow_timeseries.csv"), &fused)?;
    write_metrics_json(&run_dir.join("qmax_report.json"), &metrics, &config)?;

    info!("\n=== Analysis Complete ===");
    info!("  Qmax: {:.2} ml/s", metrics.qmax);
    info!("  Time to Qmax: {:.2} s", metrics.time_to_qmax);
    info!("  Voided volume: {:.2} ml", metrics.voided_volume);
    info!("  Flow time: {:.2} s", metrics.flow_time);
    info!("  Voiding time: {:.2} s", metrics.voiding_time);
    info!("  Hesitancy: {:.2} s", metrics.hesitancy);
    info!("  Average flow rate: {:.2} ml/s", metrics.average_flow_rate);
    info!("  Results written to {}", run_dir.display());

    Ok(())
}

fn join_view(
    handle: Option<std::thread::ScopedJoinHandle<'_, Result<Option<ViewResult>>>>,
    view: ViewLabel,
) -> Option<ViewResult> {
    match handle?.join() {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("{} view pipeline failed: {:#}", view.as_str(), e);
            None
        }
        Err(_) => {
            error!("{} view pipeline panicked", view.as_str());
            None
        }
    }
}

/// One view's full frame loop: Segmenter → Tracker → FlowEstimator, in
/// strict frame order. Returns `None` when the video cannot be opened or
/// yields no samples; the run continues on the other view.
fn process_single_video(
    video_path: &Path,
    view: ViewLabel,
    video_processor: &VideoProcessor,
    config: &Config,
    px_to_cm: f64,
    output_dir: &Path,
) -> Result<Option<ViewResult>> {
    let tag = view.as_str().to_uppercase();
    info!("[{}] Starting analysis: {}", tag, video_path.display());

    let mut reader = match video_processor.open_video(video_path) {
        Ok(reader) => reader,
        Err(e) => {
            error!("[{}] {}", tag, e);
            return Ok(None);
        }
    };

    // Downscaled pixels cover more centimeters; compensate the scale.
    let px_to_cm = px_to_cm * reader.scale_compensation;

    let mut segmenter = StreamSegmenter::new(config.segmenter.clone())?;
    let mut tracker = StreamTracker::new(px_to_cm, reader.fps, config.tracker.clone())?;
    let mut estimator = FlowEstimator::new(config.flow.clone());

    let mut visualizer = video_processor
        .create_writer(output_dir, view, reader.width, reader.height, reader.fps)?
        .map(|(writer, path)| (Visualizer::new(writer, reader.width, reader.height), path));

    while let Some((frame_id, frame)) = reader.read_frame()? {
        let mask = segmenter.advance(&frame)?;
        let contour = segmenter.get_stream_contour(&mask)?;
        let sample = tracker.process(&frame, &mask, contour.as_ref())?;

        let timestamp_s = frame_id as f64 / reader.fps;
        let flow = estimator.update(sample.area_cm2, sample.velocity_cm_s, timestamp_s, frame_id);

        if let Some((vis, _)) = visualizer.as_mut() {
            vis.process_frame(
                &frame,
                contour.as_ref(),
                flow,
                sample.velocity_cm_s,
                sample.area_cm2,
                frame_id,
                estimator.recent(100),
            )?;
        }

        if frame_id % 60 == 0 {
            info!(
                "[{}] Frame {} ({:.1}%): {:.2} ml/s",
                tag,
                frame_id,
                reader.progress(),
                flow
            );
        }
    }

    let annotated_video = match visualizer {
        Some((mut vis, path)) => {
            vis.release()?;
            Some(path)
        }
        None => None,
    };

    match estimator.finalize() {
        Some((series, metrics)) => {
            info!(
                "[{}] ✓ {} samples, per-view Qmax {:.2} ml/s, volume {:.2} ml",
                tag,
                series.samples.len(),
                metrics.qmax,
                metrics.voided_volume
            );
            Ok(Some(ViewResult {
                view,
                series,
                metrics,
                px_to_cm,
                annotated_video,
            }))
        }
        None => {
            warn!("[{}] No usable samples from this view", tag);
            Ok(None)
        }
    }
}

fn write_flow_csv(path: &Path, fused: &FusedSeries) -> Result<()> {
    write_series_csv(
        path,
        &fused.timestamp_s,
        &fused.flow_ml_s,
        &fused.flow_smooth,
        &fused.accumulated_volume_ml,
    )
}

fn write_series_csv(
    path: &Path,
    times: &[f64],
    raw: &[f64],
    smooth: &[f64],
    accumulated: &[f64],
) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "timestamp_s,flow_ml_s,flow_smooth,accumulated_volume_ml")?;
    for i in 0..times.len() {
        writeln!(
            file,
            "{:.4},{:.4},{:.4},{:.4}",
            times[i], raw[i], smooth[i], accumulated[i]
        )?;
    }
    file.flush()?;
    info!("💾 Flow series written to {}", path.display());
    Ok(())
}

fn write_metrics_json(path: &Path, metrics: &ClinicalMetrics, config: &Config) -> Result<()> {
    let mut report = serde_json::to_value(metrics)?;
    report["inputs"] = serde_json::json!({
        "top": config.video.top_video,
        "bottom": config.video.bottom_video,
        "volume_manual": config.manual_volume_ml,
    });
    std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    info!("💾 Metrics report written to {}", path.display());
    Ok(())
}
