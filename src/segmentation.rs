// src/segmentation.rs
//
// Stream segmentation with ROI locking.
//
// Per-frame flow:
//   MOG2 foreground → binarize → ROI band gate (when locked) →
//   thick-blob subtraction (hands) → open/vertical-close cleanup →
//   aspect-ratio contour gate → lock update
//
// The lock is a small FSM: once a thread-like contour is accepted, its
// horizontal center is tracked with an EMA and the mask is gated to a
// narrow band around it, which rejects hands and other objects entering
// elsewhere in frame. More than `max_missed_frames` consecutive misses
// releases the lock. The aspect-ratio gate is deliberately asymmetric:
// permissive while locked, strict while unlocked. This is hysteresis against
// flickering onto non-thread-like blobs at state boundaries.

use crate::error::Result;
use crate::types::SegmenterConfig;
use opencv::{
    core::{self, Mat, Point, Ptr, Rect, Scalar, Size, Vector},
    imgproc,
    prelude::*,
    video::{self, BackgroundSubtractorMOG2},
};
use tracing::debug;

pub struct StreamSegmenter {
    fgbg: Ptr<BackgroundSubtractorMOG2>,
    /// Bridges small vertical gaps in the stream silhouette.
    kernel_vertical: Mat,
    /// Small speckle cleanup.
    kernel_clean: Mat,
    /// Isolates wide objects (hands); the stream is thinner than this.
    kernel_thick: Mat,
    locked_x_center: Option<i32>,
    missed_frames: u32,
    config: SegmenterConfig,
}

impl StreamSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        let fgbg = video::create_background_subtractor_mog2(
            config.history,
            config.var_threshold,
            false,
        )?;
        Ok(Self {
            fgbg,
            kernel_vertical: imgproc::get_structuring_element(
                imgproc::MORPH_RECT,
                Size::new(config.vertical_kernel[0], config.vertical_kernel[1]),
                Point::new(-1, -1),
            )?,
            kernel_clean: imgproc::get_structuring_element(
                imgproc::MORPH_ELLIPSE,
                Size::new(config.clean_kernel[0], config.clean_kernel[1]),
                Point::new(-1, -1),
            )?,
            kernel_thick: imgproc::get_structuring_element(
                imgproc::MORPH_ELLIPSE,
                Size::new(config.thick_kernel[0], config.thick_kernel[1]),
                Point::new(-1, -1),
            )?,
            locked_x_center: None,
            missed_frames: 0,
            config,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked_x_center.is_some()
    }

    /// Segment the next frame. Frames must arrive in temporal order: both
    /// the background model and the lock state are cross-frame.
    pub fn advance(&mut self, frame: &Mat) -> Result<Mat> {
        let frame_width = frame.cols();
        let frame_height = frame.rows();

        // 1. Background subtraction, binarized at high confidence.
        let mut raw_fg = Mat::default();
        self.fgbg.apply(frame, &mut raw_fg, -1.0)?;
        let mut fgmask = Mat::default();
        imgproc::threshold(
            &raw_fg,
            &mut fgmask,
            self.config.mask_threshold,
            255.0,
            imgproc::THRESH_BINARY,
        )?;

        // 2. ROI gating around the locked stream center.
        if let Some(center) = self.locked_x_center {
            let half = self.config.roi_width / 2;
            let x1 = (center - half).max(0);
            let x2 = (center + half).min(frame_width);
            let mut roi_mask =
                Mat::zeros(frame_height, frame_width, core::CV_8UC1)?.to_mat()?;
            imgproc::rectangle(
                &mut roi_mask,
                Rect::new(x1, 0, (x2 - x1).max(0), frame_height),
                Scalar::all(255.0),
                -1,
                imgproc::LINE_8,
                0,
            )?;
            let mut gated = Mat::default();
            core::bitwise_and(&fgmask, &roi_mask, &mut gated, &core::no_array())?;
            fgmask = gated;
        }

        // 3. Thick-object removal: opening with the large kernel keeps only
        // wide blobs; subtracting them leaves thin stream-like regions.
        let mut thick = Mat::default();
        imgproc::morphology_ex(
            &fgmask,
            &mut thick,
            imgproc::MORPH_OPEN,
            &self.kernel_thick,
            Point::new(-1, -1),
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;
        let mut not_thick = Mat::default();
        core::bitwise_not(&thick, &mut not_thick, &core::no_array())?;
        let mut thin = Mat::default();
        core::bitwise_and(&fgmask, &not_thick, &mut thin, &core::no_array())?;

        // 4. Cleanup, then a strong vertical close to repair gaps left by
        // the subtraction.
        let mut cleaned = Mat::default();
        imgproc::morphology_ex(
            &thin,
            &mut cleaned,
            imgproc::MORPH_OPEN,
            &self.kernel_clean,
            Point::new(-1, -1),
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;
        let mut bridged = Mat::default();
        imgproc::morphology_ex(
            &cleaned,
            &mut bridged,
            imgproc::MORPH_CLOSE,
            &self.kernel_vertical,
            Point::new(-1, -1),
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;

        // 5. Geometric selection and lock update.
        let mut contours: Vector<Vector<Point>> = Vector::new();
        imgproc::find_contours(
            &bridged,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::default(),
        )?;

        let mut clean_mask = Mat::zeros(frame_height, frame_width, core::CV_8UC1)?.to_mat()?;
        let threshold = self.aspect_ratio_threshold();
        let mut best: Option<Rect> = None;
        let mut best_area = 0.0;

        for (idx, contour) in contours.iter().enumerate() {
            let area = imgproc::contour_area(&contour, false)?;
            if area < self.config.min_contour_area {
                continue;
            }

            let bounds = imgproc::bounding_rect(&contour)?;
            let length = bounds.width.max(bounds.height) as f64;
            let thickness = bounds.width.min(bounds.height) as f64;
            if thickness == 0.0 {
                continue;
            }

            if length / thickness > threshold {
                imgproc::draw_contours(
                    &mut clean_mask,
                    &contours,
                    idx as i32,
                    Scalar::all(255.0),
                    -1,
                    imgproc::LINE_8,
                    &core::no_array(),
                    i32::MAX,
                    Point::default(),
                )?;
                if area > best_area {
                    best_area = area;
                    best = Some(bounds);
                }
            }
        }

        match best {
            Some(bounds) => self.register_hit(bounds.x + bounds.width / 2),
            None => self.register_miss(),
        }

        Ok(clean_mask)
    }

    /// Largest contour of the cleaned mask, if any region is big enough to
    /// be the stream.
    pub fn get_stream_contour(&self, mask: &Mat) -> Result<Option<Vector<Point>>> {
        let mut contours: Vector<Vector<Point>> = Vector::new();
        imgproc::find_contours(
            mask,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::default(),
        )?;

        let mut best: Option<Vector<Point>> = None;
        let mut best_area = -1.0;
        for contour in contours.iter() {
            let area = imgproc::contour_area(&contour, false)?;
            if area > best_area {
                best_area = area;
                best = Some(contour);
            }
        }

        if best_area < self.config.min_stream_area {
            return Ok(None);
        }
        Ok(best)
    }

    fn aspect_ratio_threshold(&self) -> f64 {
        if self.locked_x_center.is_some() {
            self.config.aspect_ratio_locked
        } else {
            self.config.aspect_ratio_unlocked
        }
    }

    fn register_hit(&mut self, center_x: i32) {
        let alpha = self.config.lock_ema_alpha;
        self.locked_x_center = Some(match self.locked_x_center {
            None => center_x,
            Some(old) => ((1.0 - alpha) * old as f64 + alpha * center_x as f64) as i32,
        });
        self.missed_frames = 0;
    }

    fn register_miss(&mut self) {
        self.missed_frames += 1;
        if self.missed_frames > self.config.max_missed_frames {
            if self.locked_x_center.is_some() {
                debug!(
                    "Releasing ROI lock after {} consecutive misses",
                    self.missed_frames
                );
            }
            self.locked_x_center = None;
        }
    }
}
