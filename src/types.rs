use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub calibration: CalibrationConfig,
    pub segmenter: SegmenterConfig,
    pub tracker: TrackerConfig,
    pub flow: FlowConfig,
    pub ensemble: EnsembleConfig,
    /// Manually measured total voided volume (ml), when available.
    pub manual_volume_ml: Option<f64>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub top_video: Option<String>,
    pub bottom_video: Option<String>,
    pub output_dir: String,
    /// Frames wider than this are downscaled; the calibration scale is
    /// compensated by the same ratio.
    pub target_width: i32,
    /// Used when the container reports no usable frame rate.
    pub fallback_fps: f64,
    /// Overrides the container frame rate for both views when set.
    pub fps_override: Option<f64>,
    pub save_annotated: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            top_video: None,
            bottom_video: None,
            output_dir: "output".to_string(),
            target_width: 640,
            fallback_fps: 30.0,
            fps_override: None,
            save_annotated: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Reference image containing the blue line of known length. When
    /// absent or unreadable the fallback scale is used instead.
    pub image_path: Option<String>,
    pub known_length_cm: f64,
    pub fallback_px_to_cm: f64,
    /// HSV threshold band for the reference line color.
    pub hsv_lower: [u8; 3],
    pub hsv_upper: [u8; 3],
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            known_length_cm: 26.0,
            fallback_px_to_cm: 0.052,
            hsv_lower: [100, 50, 50],
            hsv_upper: [140, 255, 255],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// MOG2 background model history length.
    pub history: i32,
    pub var_threshold: f64,
    /// Foreground confidence cutoff for the binary mask.
    pub mask_threshold: f64,
    /// Width of the horizontal band kept around the locked stream center.
    pub roi_width: i32,
    /// Consecutive missed detections before the lock is released.
    pub max_missed_frames: u32,
    /// EMA factor for lock center updates.
    pub lock_ema_alpha: f64,
    /// Minimum contour area (px) considered at all.
    pub min_contour_area: f64,
    /// Minimum area (px) for the final stream contour.
    pub min_stream_area: f64,
    /// Aspect-ratio gate while locked (permissive).
    pub aspect_ratio_locked: f64,
    /// Aspect-ratio gate while unlocked (strict).
    pub aspect_ratio_unlocked: f64,
    /// Ellipse kernel isolating wide blobs (hands); the stream is thinner.
    pub thick_kernel: [i32; 2],
    /// Small ellipse kernel for speckle cleanup.
    pub clean_kernel: [i32; 2],
    /// Tall narrow rect kernel bridging vertical gaps in the silhouette.
    pub vertical_kernel: [i32; 2],
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 10.0,
            mask_threshold: 200.0,
            roi_width: 120,
            max_missed_frames: 10,
            lock_ema_alpha: 0.3,
            min_contour_area: 30.0,
            min_stream_area: 50.0,
            aspect_ratio_locked: 1.2,
            aspect_ratio_unlocked: 2.0,
            thick_kernel: [40, 40],
            clean_kernel: [3, 3],
            vertical_kernel: [5, 25],
        }
    }
}

/// Farneback dense optical flow parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub pyr_scale: f64,
    pub levels: i32,
    pub winsize: i32,
    pub iterations: i32,
    pub poly_n: i32,
    pub poly_sigma: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 3,
            winsize: 15,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Centered rolling-mean window in samples (~3 s at 30 fps).
    pub smooth_window: usize,
    /// Hard cap on raw per-frame flow before smoothing.
    pub raw_clamp_ml_s: f64,
    /// A sample is "flowing" above this smoothed rate.
    pub flow_threshold_ml_s: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            smooth_window: 90,
            raw_clamp_ml_s: 100.0,
            flow_threshold_ml_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Common resampling grid step for cross-correlation alignment.
    pub resample_dt_s: f64,
    /// Activity threshold for dropout detection.
    pub activity_threshold_ml_s: f64,
    /// Dropout fraction above which the confidence is penalized.
    pub dropout_penalty_ratio: f64,
    pub jitter_heavy_ratio: f64,
    pub jitter_heavy_penalty: f64,
    pub jitter_light_ratio: f64,
    pub jitter_light_penalty: f64,
    pub implausible_peak_ml_s: f64,
    pub implausible_peak_penalty: f64,
    pub confidence_floor: f64,
    /// Physical ceiling applied to the fused curve.
    pub post_clamp_ml_s: f64,
    /// Centered median filter window (outlier removal).
    pub median_window: usize,
    /// Final centered rolling-mean window (~4 s on the per-frame grid).
    pub smooth_window: usize,
    pub flow_threshold_ml_s: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            resample_dt_s: 0.1,
            activity_threshold_ml_s: 0.5,
            dropout_penalty_ratio: 0.1,
            jitter_heavy_ratio: 0.5,
            jitter_heavy_penalty: 0.7,
            jitter_light_ratio: 0.2,
            jitter_light_penalty: 0.9,
            implausible_peak_ml_s: 150.0,
            implausible_peak_penalty: 0.5,
            confidence_floor: 0.1,
            post_clamp_ml_s: 80.0,
            median_window: 15,
            smooth_window: 120,
            flow_threshold_ml_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewLabel {
    Top,
    Bottom,
}

impl ViewLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewLabel::Top => "top",
            ViewLabel::Bottom => "bottom",
        }
    }
}

/// Per-frame kinematic measurement derived from mask + contour.
#[derive(Debug, Clone, Copy)]
pub struct TrackSample {
    pub area_cm2: f64,
    pub velocity_cm_s: f64,
    pub centroid: Option<(i32, i32)>,
}

impl TrackSample {
    pub fn zero() -> Self {
        Self {
            area_cm2: 0.0,
            velocity_cm_s: 0.0,
            centroid: None,
        }
    }
}

/// One row of the per-view flow log.
#[derive(Debug, Clone, Copy)]
pub struct FlowSample {
    pub timestamp_s: f64,
    pub frame_id: u64,
    pub area_cm2: f64,
    pub velocity_cm_s: f64,
    pub flow_ml_s: f64,
}

/// Completed per-view series: raw samples plus the derived columns.
/// Immutable once the estimator finishes a view.
#[derive(Debug, Clone)]
pub struct FlowSeries {
    pub samples: Vec<FlowSample>,
    pub flow_smooth: Vec<f64>,
    pub accumulated_volume_ml: Vec<f64>,
}

impl FlowSeries {
    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp_s).collect()
    }

    pub fn raw_flow(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.flow_ml_s).collect()
    }
}

/// Scalar clinical metrics. All zero when no flow crosses threshold.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ClinicalMetrics {
    #[serde(rename = "Qmax")]
    pub qmax: f64,
    #[serde(rename = "Time_to_Qmax")]
    pub time_to_qmax: f64,
    #[serde(rename = "Voided_Volume")]
    pub voided_volume: f64,
    #[serde(rename = "Flow_Time")]
    pub flow_time: f64,
    #[serde(rename = "Voiding_Time")]
    pub voiding_time: f64,
    #[serde(rename = "Hesitancy")]
    pub hesitancy: f64,
    #[serde(rename = "Average_Flow_Rate")]
    pub average_flow_rate: f64,
}

/// Everything one view's pipeline produces.
#[derive(Debug, Clone)]
pub struct ViewResult {
    pub view: ViewLabel,
    pub series: FlowSeries,
    pub metrics: ClinicalMetrics,
    pub px_to_cm: f64,
    pub annotated_video: Option<PathBuf>,
}

/// Output of the ensemble stage: the fused (or single-view) curve on its
/// final time grid with the post-processed column and cumulative volume.
#[derive(Debug, Clone)]
pub struct FusedSeries {
    pub timestamp_s: Vec<f64>,
    pub flow_ml_s: Vec<f64>,
    pub flow_smooth: Vec<f64>,
    pub accumulated_volume_ml: Vec<f64>,
}
