// src/tracking.rs
//
// Per-frame kinematics: cross-sectional area from the stream contour,
// velocity from dense optical flow restricted to the mask. Carries the
// previous grayscale frame, so frames must be fed strictly in order.

use crate::error::{Error, Result};
use crate::types::{TrackSample, TrackerConfig};
use opencv::{
    core::{self, Mat, Point, Vector},
    imgproc,
    prelude::*,
    video,
};

pub struct StreamTracker {
    px_to_cm: f64,
    fps: f64,
    prev_gray: Option<Mat>,
    config: TrackerConfig,
}

impl StreamTracker {
    pub fn new(px_to_cm: f64, fps: f64, config: TrackerConfig) -> Result<Self> {
        if px_to_cm <= 0.0 {
            return Err(Error::Calibration(format!(
                "pixel-to-cm scale must be positive, got {}",
                px_to_cm
            )));
        }
        Ok(Self {
            px_to_cm,
            fps,
            prev_gray: None,
            config,
        })
    }

    /// Measure the current frame. Without a contour both area and velocity
    /// are zero; without a previous frame velocity is zero.
    pub fn process(
        &mut self,
        frame: &Mat,
        mask: &Mat,
        contour: Option<&Vector<Point>>,
    ) -> Result<TrackSample> {
        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

        let mut sample = TrackSample::zero();

        if let Some(contour) = contour {
            let area_px = imgproc::contour_area(contour, false)?;
            sample.area_cm2 = area_px * self.px_to_cm * self.px_to_cm;
            sample.centroid = centroid(contour)?;

            if let Some(prev) = self.prev_gray.as_ref() {
                sample.velocity_cm_s = self.masked_flow_velocity(prev, &gray, mask)?;
            }
        }

        self.prev_gray = Some(gray);
        Ok(sample)
    }

    /// Mean Farneback flow magnitude over mask pixels, converted to cm/s.
    fn masked_flow_velocity(&self, prev: &Mat, curr: &Mat, mask: &Mat) -> Result<f64> {
        if core::count_non_zero(mask)? == 0 {
            return Ok(0.0);
        }

        let mut flow = Mat::default();
        video::calc_optical_flow_farneback(
            prev,
            curr,
            &mut flow,
            self.config.pyr_scale,
            self.config.levels,
            self.config.winsize,
            self.config.iterations,
            self.config.poly_n,
            self.config.poly_sigma,
            0,
        )?;

        let mut components: Vector<Mat> = Vector::new();
        core::split(&flow, &mut components)?;
        let mut magnitude = Mat::default();
        let mut angle = Mat::default();
        core::cart_to_polar(
            &components.get(0)?,
            &components.get(1)?,
            &mut magnitude,
            &mut angle,
            false,
        )?;

        // Mean over stream pixels only: averaging the full frame would
        // dilute the estimate with zeros outside the mask.
        let mean_px_per_frame = core::mean(&magnitude, mask)?[0];
        Ok((mean_px_per_frame * self.px_to_cm * self.fps).max(0.0))
    }
}

fn centroid(contour: &Vector<Point>) -> Result<Option<(i32, i32)>> {
    let m = imgproc::moments(contour, false)?;
    if m.m00 != 0.0 {
        Ok(Some(((m.m10 / m.m00) as i32, (m.m01 / m.m00) as i32)))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::Scalar;

    fn gray_frame_bgr(width: i32, height: i32, value: f64) -> Mat {
        Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, Scalar::all(value)).unwrap()
    }

    fn rect_contour(x: i32, y: i32, w: i32, h: i32) -> Vector<Point> {
        Vector::from_iter([
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    #[test]
    fn rejects_non_positive_scale() {
        assert!(StreamTracker::new(0.0, 30.0, TrackerConfig::default()).is_err());
        assert!(StreamTracker::new(-0.1, 30.0, TrackerConfig::default()).is_err());
    }

    #[test]
    fn no_contour_measures_zero() {
        let mut tracker = StreamTracker::new(0.1, 30.0, TrackerConfig::default()).unwrap();
        let frame = gray_frame_bgr(64, 64, 0.0);
        let mask = Mat::zeros(64, 64, core::CV_8UC1).unwrap().to_mat().unwrap();
        let sample = tracker.process(&frame, &mask, None).unwrap();
        assert_eq!(sample.area_cm2, 0.0);
        assert_eq!(sample.velocity_cm_s, 0.0);
        assert!(sample.centroid.is_none());
    }

    #[test]
    fn area_scales_quadratically_and_first_frame_has_no_velocity() {
        let mut tracker = StreamTracker::new(0.1, 30.0, TrackerConfig::default()).unwrap();
        let frame = gray_frame_bgr(64, 64, 0.0);
        let mask = Mat::zeros(64, 64, core::CV_8UC1).unwrap().to_mat().unwrap();
        let contour = rect_contour(10, 10, 10, 10);

        let sample = tracker.process(&frame, &mask, Some(&contour)).unwrap();
        // 100 px² at 0.1 cm/px ⇒ 1.0 cm²
        assert!((sample.area_cm2 - 1.0).abs() < 1e-9);
        assert_eq!(sample.velocity_cm_s, 0.0);
        assert!(sample.centroid.is_some());
    }

    #[test]
    fn static_scene_has_near_zero_velocity() {
        let mut tracker = StreamTracker::new(0.1, 30.0, TrackerConfig::default()).unwrap();
        let frame = gray_frame_bgr(64, 64, 128.0);
        let mut mask = Mat::zeros(64, 64, core::CV_8UC1).unwrap().to_mat().unwrap();
        imgproc::rectangle(
            &mut mask,
            core::Rect::new(20, 10, 8, 40),
            Scalar::all(255.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        let contour = rect_contour(20, 10, 8, 40);

        tracker.process(&frame, &mask, Some(&contour)).unwrap();
        let sample = tracker.process(&frame, &mask, Some(&contour)).unwrap();
        // identical frames: Farneback flow is (numerically) zero
        assert!(sample.velocity_cm_s < 1e-3, "{}", sample.velocity_cm_s);
    }
}
