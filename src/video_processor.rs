// src/video_processor.rs

use crate::error::{Error, Result};
use crate::types::{VideoConfig, ViewLabel};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct VideoProcessor {
    config: VideoConfig,
}

impl VideoProcessor {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    /// Open a view's video. Frames wider than the target width are
    /// downscaled on read; `scale_compensation` is the ratio the caller
    /// must multiply into its pixel-to-cm scale to stay physically
    /// consistent (a downscaled pixel covers more centimeters).
    pub fn open_video(&self, path: &Path) -> Result<VideoReader> {
        info!("Opening video: {}", path.display());

        let cap = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(Error::VideoOpen(path.display().to_string()));
        }

        let mut fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        if let Some(fps_override) = self.config.fps_override {
            fps = fps_override;
        }
        if !fps.is_finite() || fps <= 0.0 {
            warn!(
                "Unreadable frame rate for {}, assuming {} fps",
                path.display(),
                self.config.fallback_fps
            );
            fps = self.config.fallback_fps;
        }

        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i64;
        let source_width =
            VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let source_height =
            VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        let (width, height, scale_compensation) = if source_width > self.config.target_width {
            let ratio = source_width as f64 / self.config.target_width as f64;
            (
                self.config.target_width,
                (source_height as f64 / ratio) as i32,
                ratio,
            )
        } else {
            (source_width, source_height, 1.0)
        };

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames{}",
            source_width,
            source_height,
            fps,
            total_frames,
            if scale_compensation != 1.0 {
                format!(" (processing at {}x{})", width, height)
            } else {
                String::new()
            }
        );

        Ok(VideoReader {
            cap,
            fps,
            total_frames,
            next_frame: 0,
            width,
            height,
            resize: scale_compensation != 1.0,
            scale_compensation,
        })
    }

    /// Writer for the per-view annotated overlay video, when enabled.
    pub fn create_writer(
        &self,
        output_dir: &Path,
        view: ViewLabel,
        width: i32,
        height: i32,
        fps: f64,
    ) -> Result<Option<(VideoWriter, PathBuf)>> {
        if !self.config.save_annotated {
            return Ok(None);
        }

        std::fs::create_dir_all(output_dir)?;
        let output_path = output_dir.join(format!("annotated_{}.mp4", view.as_str()));
        info!("Annotated output: {}", output_path.display());

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            &output_path.to_string_lossy(),
            fourcc,
            fps,
            Size::new(width, height),
            true,
        )?;

        Ok(Some((writer, output_path)))
    }
}

pub struct VideoReader {
    cap: VideoCapture,
    pub fps: f64,
    pub total_frames: i64,
    next_frame: u64,
    pub width: i32,
    pub height: i32,
    resize: bool,
    pub scale_compensation: f64,
}

impl VideoReader {
    /// Next BGR frame with its zero-based index, `None` at end of stream.
    /// Frames come out strictly in order; the per-view pipeline depends on
    /// that for its optical-flow and background-model state.
    pub fn read_frame(&mut self) -> Result<Option<(u64, Mat)>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        let frame = if self.resize {
            let mut resized = Mat::default();
            imgproc::resize(
                &mat,
                &mut resized,
                Size::new(self.width, self.height),
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            )?;
            resized
        } else {
            mat
        };

        let frame_id = self.next_frame;
        self.next_frame += 1;
        Ok(Some((frame_id, frame)))
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames <= 0 {
            return 0.0;
        }
        (self.next_frame as f32 / self.total_frames as f32) * 100.0
    }
}
