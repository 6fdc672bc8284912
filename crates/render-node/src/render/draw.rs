//! Annotation drawing on raw BGR24 frames.

use common::detections::Detection;
use common::frames::Frame;
use image::{ImageBuffer, Rgb};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

// Stored as BGR in the frame buffer; green reads the same either way.
const BOX_COLOR: Rgb<u8> = Rgb([0, 220, 0]);

const LABEL_TAB_HEIGHT: u32 = 12;
const LABEL_TAB_WIDTH: u32 = 48;

/// Draw a hollow box plus a fixed label tab for every detection.
/// Coordinates outside the frame are clipped by the canvas.
pub fn draw_detections(frame: &mut Frame, detections: &[Detection]) {
    let (width, height) = (frame.width, frame.height);
    let Some(mut canvas) =
        ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(width, height, frame.data.as_mut_slice())
    else {
        return;
    };
    for detection in detections {
        let x = detection.bbox.x.round() as i32;
        let y = detection.bbox.y.round() as i32;
        let w = detection.bbox.width.round().max(1.0) as u32;
        let h = detection.bbox.height.round().max(1.0) as u32;
        draw_hollow_rect_mut(&mut canvas, Rect::at(x, y).of_size(w, h), BOX_COLOR);
        let tab_y = y - LABEL_TAB_HEIGHT as i32;
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(x, tab_y).of_size(LABEL_TAB_WIDTH.min(w), LABEL_TAB_HEIGHT),
            BOX_COLOR,
        );
    }
}
