// src/visualize.rs
//
// Per-view annotated overlay: blurred background with the detected stream
// isolated and tinted, live flow/velocity/area readouts, and a small inset
// trend graph of the recent flow log. Pure visualization sink; nothing
// downstream consumes these frames.

use crate::error::Result;
use crate::types::FlowSample;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size, Vector},
    imgproc,
    prelude::*,
    videoio::VideoWriter,
};

const GRAPH_WIDTH: i32 = 250;
const GRAPH_HEIGHT: i32 = 150;
const GRAPH_MARGIN: i32 = 10;

pub struct Visualizer {
    writer: VideoWriter,
    width: i32,
    height: i32,
}

impl Visualizer {
    pub fn new(writer: VideoWriter, width: i32, height: i32) -> Self {
        Self {
            writer,
            width,
            height,
        }
    }

    pub fn process_frame(
        &mut self,
        frame: &Mat,
        contour: Option<&Vector<Point>>,
        flow_ml_s: f64,
        velocity_cm_s: f64,
        area_cm2: f64,
        frame_id: u64,
        history: &[FlowSample],
    ) -> Result<()> {
        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            frame,
            &mut blurred,
            Size::new(31, 31),
            0.0,
            0.0,
            core::BORDER_DEFAULT,
        )?;

        let mut mask = Mat::zeros(frame.rows(), frame.cols(), core::CV_8UC1)?.to_mat()?;
        if let Some(contour) = contour {
            let contours: Vector<Vector<Point>> = Vector::from_iter([contour.clone()]);
            imgproc::draw_contours(
                &mut mask,
                &contours,
                -1,
                Scalar::all(255.0),
                -1,
                imgproc::LINE_8,
                &core::no_array(),
                i32::MAX,
                Point::default(),
            )?;
        }

        // Isolate the stream pixels and tint them cyan.
        let mut stream_original = Mat::default();
        core::bitwise_and(frame, frame, &mut stream_original, &mask)?;

        let color_block = Mat::new_rows_cols_with_default(
            frame.rows(),
            frame.cols(),
            core::CV_8UC3,
            Scalar::new(255.0, 255.0, 0.0, 0.0),
        )?;
        let mut stream_colored = Mat::default();
        core::add_weighted(&stream_original, 0.7, &color_block, 0.3, 0.0, &mut stream_colored, -1)?;
        let mut stream_masked = Mat::default();
        core::bitwise_and(&stream_colored, &stream_colored, &mut stream_masked, &mask)?;

        // Composite over the blurred background.
        let mut mask_inv = Mat::default();
        core::bitwise_not(&mask, &mut mask_inv, &core::no_array())?;
        let mut background = Mat::default();
        core::bitwise_and(&blurred, &blurred, &mut background, &mask_inv)?;
        let mut output = Mat::default();
        core::add(&background, &stream_masked, &mut output, &core::no_array(), -1)?;

        if let Some(contour) = contour {
            let contours: Vector<Vector<Point>> = Vector::from_iter([contour.clone()]);
            imgproc::draw_contours(
                &mut output,
                &contours,
                -1,
                Scalar::new(0.0, 255.0, 255.0, 0.0),
                2,
                imgproc::LINE_8,
                &core::no_array(),
                i32::MAX,
                Point::default(),
            )?;
        }

        draw_text(
            &mut output,
            &format!("Frame: {}", frame_id),
            Point::new(10, 30),
            Scalar::new(0.0, 255.0, 0.0, 0.0),
        )?;
        draw_text(
            &mut output,
            &format!("Flow: {:.1} ml/s", flow_ml_s),
            Point::new(10, 60),
            Scalar::new(0.0, 255.0, 255.0, 0.0),
        )?;
        draw_text(
            &mut output,
            &format!("Vel: {:.1} cm/s", velocity_cm_s),
            Point::new(10, 90),
            Scalar::new(0.0, 255.0, 0.0, 0.0),
        )?;
        draw_text(
            &mut output,
            &format!("Area: {:.2} cm2", area_cm2),
            Point::new(10, 120),
            Scalar::new(0.0, 255.0, 0.0, 0.0),
        )?;

        self.draw_trend_inset(&mut output, history)?;

        use opencv::videoio::VideoWriterTrait;
        self.writer.write(&output)?;
        Ok(())
    }

    fn draw_trend_inset(&self, output: &mut Mat, history: &[FlowSample]) -> Result<()> {
        if history.len() < 2 {
            return Ok(());
        }

        let start_x = self.width - GRAPH_WIDTH - GRAPH_MARGIN;
        let start_y = self.height - GRAPH_MARGIN;
        if start_x < 0 || start_y - GRAPH_HEIGHT < 0 {
            return Ok(());
        }

        imgproc::rectangle(
            output,
            Rect::new(start_x, start_y - GRAPH_HEIGHT, GRAPH_WIDTH, GRAPH_HEIGHT),
            Scalar::all(0.0),
            -1,
            imgproc::LINE_8,
            0,
        )?;

        let max_flow = history
            .iter()
            .map(|s| s.flow_ml_s)
            .fold(0.0, f64::max)
            .max(1.0);

        let mut previous: Option<Point> = None;
        for (i, sample) in history.iter().enumerate() {
            let px = start_x + ((i as f64 / history.len() as f64) * GRAPH_WIDTH as f64) as i32;
            let py = start_y - ((sample.flow_ml_s / max_flow) * GRAPH_HEIGHT as f64) as i32;
            let point = Point::new(px, py);
            if let Some(prev) = previous {
                imgproc::line(
                    output,
                    prev,
                    point,
                    Scalar::new(0.0, 255.0, 255.0, 0.0),
                    1,
                    imgproc::LINE_8,
                    0,
                )?;
            }
            previous = Some(point);
        }
        Ok(())
    }

    pub fn release(&mut self) -> Result<()> {
        use opencv::videoio::VideoWriterTrait;
        self.writer.release()?;
        Ok(())
    }
}

fn draw_text(img: &mut Mat, text: &str, pos: Point, color: Scalar) -> Result<()> {
    imgproc::put_text(
        img,
        text,
        pos,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        color,
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}
