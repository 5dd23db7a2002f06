use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;
use log::{debug, error};

use crate::corners::SheetCorners;
use crate::fiducials::CandidatePoint;
use crate::grid::{GridLayout, GridSpec};
use crate::marks::AnswerMatrix;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);

/// Writes per-stage overlay images next to the input file when enabled.
/// Every overlay is drawn on a clone of the stage's image; the pipeline's
/// returned data never depends on this writer.
pub struct ImageDebugWriter {
    input_path: Option<PathBuf>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            input_path: Some(input_path),
        }
    }

    pub const fn disabled() -> Self {
        Self { input_path: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.input_path.is_some()
    }

    /// Clones `base`, lets `draw` annotate it, and saves it under a
    /// label derived from the input file name. A save failure is logged
    /// and otherwise ignored.
    pub fn write(&self, label: &str, base: &RgbImage, draw: impl FnOnce(&mut RgbImage)) {
        let Some(input_path) = &self.input_path else {
            return;
        };
        let mut canvas = base.clone();
        draw(&mut canvas);
        let path = debug_image_path(input_path, label);
        match canvas.save(&path) {
            Ok(()) => debug!("wrote debug image {}", path.display()),
            Err(e) => error!("error writing debug image {}: {}", path.display(), e),
        }
    }
}

/// Creates a path for a debug image.
fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Marks every candidate point with a circle around its center.
pub fn draw_candidates_mut(canvas: &mut RgbImage, candidates: &[CandidatePoint]) {
    for candidate in candidates {
        draw_hollow_circle_mut(canvas, (candidate.x, candidate.y), 10, GREEN);
    }
}

/// Draws the estimated sheet quadrilateral and its corner points.
pub fn draw_corners_mut(canvas: &mut RgbImage, corners: &SheetCorners) {
    let quad = corners.to_array();
    for i in 0..quad.len() {
        let a = quad[i];
        let b = quad[(i + 1) % quad.len()];
        draw_line_segment_mut(canvas, (a.x, a.y), (b.x, b.y), RED);
    }
    for corner in quad {
        draw_cross_mut(canvas, CYAN, corner.x.round() as i32, corner.y.round() as i32);
    }
}

/// Draws every column and row boundary of the computed layout.
pub fn draw_grid_lines_mut(canvas: &mut RgbImage, layout: &GridLayout) {
    let height = canvas.height() as f32 - 1.0;
    let width = canvas.width() as f32 - 1.0;
    for x in &layout.col_starts {
        draw_line_segment_mut(canvas, (*x as f32, 0.0), (*x as f32, height), GREEN);
    }
    for y in &layout.row_starts {
        draw_line_segment_mut(canvas, (0.0, *y as f32), (width, *y as f32), BLUE);
    }
}

/// Outlines the winning option cell for every answered question.
pub fn draw_answers_mut(
    canvas: &mut RgbImage,
    layout: &GridLayout,
    spec: &GridSpec,
    answers: &AnswerMatrix,
) {
    for (subject, questions) in answers.subjects().iter().enumerate() {
        for (question, answer) in questions.iter().enumerate() {
            let Some(label) = answer else {
                continue;
            };
            let option = (*label as u8 - b'A') as usize;
            let Some(col) = layout.column_of(subject, option) else {
                continue;
            };
            let (Some((x1, x2)), Some((y1, y2))) = (
                layout.column_bounds(col),
                layout.question_row_bounds(question),
            ) else {
                continue;
            };
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            let rect = Rect::at(x1 as i32, y1 as i32).of_size(x2 - x1, y2 - y1);
            draw_hollow_rect_mut(canvas, rect, PINK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_writer_saves_labeled_overlays() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("sheet.png");
        let writer = ImageDebugWriter::new(input.clone());
        let base = RgbImage::new(16, 16);
        writer.write("corners", &base, |canvas| {
            canvas.put_pixel(0, 0, RED);
        });
        assert!(dir.path().join("sheet_debug_corners.png").exists());
    }

    #[test]
    fn disabled_writer_never_draws_or_saves() {
        let writer = ImageDebugWriter::disabled();
        assert!(!writer.is_enabled());
        let base = RgbImage::new(8, 8);
        let mut drawn = false;
        writer.write("never", &base, |_| {
            drawn = true;
        });
        assert!(!drawn);
    }
}
