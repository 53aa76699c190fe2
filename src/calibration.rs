// src/calibration.rs
//
// Pixel-to-cm scale from a reference image containing a straight blue line
// of known physical length. Runs once per view before the frame loop.
// Failure here is recoverable: callers fall back to the configured scale.

use crate::error::{Error, Result};
use crate::types::CalibrationConfig;
use opencv::{
    core::{self, Mat, Point, Scalar, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use tracing::info;

/// Load the reference image and derive the scale (cm per pixel).
pub fn compute_px_to_cm_scale(path: &str, config: &CalibrationConfig) -> Result<f64> {
    let img = imgcodecs::imread(path, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Err(Error::Calibration(format!(
            "failed to load calibration image {}",
            path
        )));
    }
    scale_from_image(&img, config)
}

/// Scale from an already-loaded BGR image. Thresholds the configured HSV
/// band, cleans speckle, takes the largest external contour, and reads the
/// reference length off the longer side of its minimum-area rectangle.
pub fn scale_from_image(img: &Mat, config: &CalibrationConfig) -> Result<f64> {
    let mut hsv = Mat::default();
    imgproc::cvt_color(img, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

    let lower = Scalar::new(
        config.hsv_lower[0] as f64,
        config.hsv_lower[1] as f64,
        config.hsv_lower[2] as f64,
        0.0,
    );
    let upper = Scalar::new(
        config.hsv_upper[0] as f64,
        config.hsv_upper[1] as f64,
        config.hsv_upper[2] as f64,
        0.0,
    );
    let mut mask = Mat::default();
    core::in_range(&hsv, &lower, &upper, &mut mask)?;

    let kernel =
        imgproc::get_structuring_element(imgproc::MORPH_RECT, Size::new(5, 5), Point::new(-1, -1))?;
    let mut opened = Mat::default();
    imgproc::morphology_ex(
        &mask,
        &mut opened,
        imgproc::MORPH_OPEN,
        &kernel,
        Point::new(-1, -1),
        1,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    let mut cleaned = Mat::default();
    imgproc::morphology_ex(
        &opened,
        &mut cleaned,
        imgproc::MORPH_CLOSE,
        &kernel,
        Point::new(-1, -1),
        1,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;

    let mut contours: Vector<Vector<Point>> = Vector::new();
    imgproc::find_contours(
        &cleaned,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::default(),
    )?;

    if contours.is_empty() {
        return Err(Error::Calibration(
            "no reference line detected in calibration image".to_string(),
        ));
    }

    // The largest detected region is assumed to be the reference line.
    let mut best: Option<Vector<Point>> = None;
    let mut best_area = -1.0;
    for contour in contours.iter() {
        let area = imgproc::contour_area(&contour, false)?;
        if area > best_area {
            best_area = area;
            best = Some(contour);
        }
    }
    let contour = best.ok_or_else(|| {
        Error::Calibration("no reference line detected in calibration image".to_string())
    })?;

    let rect = imgproc::min_area_rect(&contour)?;
    let size = rect.size();
    let pixel_length = size.width.max(size.height) as f64;

    if pixel_length <= 0.0 {
        return Err(Error::Calibration(
            "detected reference line has zero length".to_string(),
        ));
    }

    let px_to_cm = config.known_length_cm / pixel_length;
    info!(
        "Calibration: line length {:.2} px, scale {:.5} cm/px",
        pixel_length, px_to_cm
    );

    Ok(px_to_cm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_bgr(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn synthetic_line_yields_expected_scale() {
        // 50 px pure-blue line: BGR (255, 0, 0) lands at HSV (120, 255, 255)
        let mut img = blank_bgr(100, 100);
        imgproc::line(
            &mut img,
            Point::new(25, 50),
            Point::new(75, 50),
            Scalar::new(255.0, 0.0, 0.0, 0.0),
            5,
            imgproc::LINE_8,
            0,
        )
        .unwrap();

        let config = CalibrationConfig {
            known_length_cm: 10.0,
            ..CalibrationConfig::default()
        };
        let scale = scale_from_image(&img, &config).unwrap();
        // 10 cm over 50 px ⇒ 0.2 cm/px
        assert!((scale - 0.2).abs() < 0.01, "scale {}", scale);
    }

    #[test]
    fn empty_image_is_a_calibration_error() {
        let img = blank_bgr(64, 64);
        let err = scale_from_image(&img, &CalibrationConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Calibration(_)));
    }

    #[test]
    fn missing_file_fails_recoverably() {
        let result = compute_px_to_cm_scale("no/such/image.png", &CalibrationConfig::default());
        assert!(result.is_err());
    }
}
