use std::fmt;
use std::path::{Path, PathBuf};

use image::imageops::grayscale;
use image::RgbImage;
use log::info;
use logging_timer::time;

use crate::cluster::largest_cluster;
use crate::config::PipelineConfig;
use crate::corners::{estimate_corners, CornerEstimator, SheetCorners};
use crate::debug::{self, ImageDebugWriter};
use crate::fiducials::{detect_fiducials, DetectionMethod};
use crate::grid::compute_layout;
use crate::image_utils::resize_to_height;
use crate::marks::{compute_ink_statistics, detect_marks, AnswerMatrix, MarkPath};
use crate::rectify::rectify_sheet;

/// Why one invocation failed. Every variant is fatal to its invocation;
/// no partial answer matrix is ever produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The image is missing or undecodable.
    Input(PathBuf),
    /// Neither fiducial-detection method reached the minimum candidate
    /// count.
    Detection {
        circle_candidates: usize,
        contour_candidates: usize,
    },
    /// No cluster reached the minimum size.
    Clustering { points: usize },
    /// Both corner-estimation methods failed on a degenerate point set.
    CornerEstimation { points: usize },
    /// The rectified dimensions are zero or the transform is singular.
    Rectification { width: u32, height: u32 },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(path) => write!(f, "cannot open image {}", path.display()),
            Self::Detection {
                circle_candidates,
                contour_candidates,
            } => write!(
                f,
                "too few bubble candidates (circle transform {circle_candidates}, contour fallback {contour_candidates})"
            ),
            Self::Clustering { points } => {
                write!(f, "no dense bubble cluster among {points} candidates")
            }
            Self::CornerEstimation { points } => {
                write!(f, "degenerate point set of {points} points has no corners")
            }
            Self::Rectification { width, height } => {
                write!(f, "rectified target {width}x{height} is degenerate")
            }
        }
    }
}

/// Everything one successful invocation produces. The rectified image is
/// returned for the caller to persist; the core itself stores nothing.
#[derive(Debug)]
pub struct SheetInterpretation {
    pub answers: AnswerMatrix,
    pub rectified: RgbImage,
    pub corners: SheetCorners,
    pub detection_method: DetectionMethod,
    pub corner_estimator: CornerEstimator,
    pub mark_path: MarkPath,
}

/// Loads a sheet image from disk and interprets it.
#[time]
pub fn interpret_sheet(
    path: &Path,
    config: &PipelineConfig,
    debug_writer: &ImageDebugWriter,
) -> Result<SheetInterpretation, PipelineError> {
    let original = image::open(path)
        .map_err(|_| PipelineError::Input(path.to_path_buf()))?
        .into_rgb8();
    interpret_sheet_image(&original, config, debug_writer)
}

/// Runs the full pipeline on a decoded sheet image:
/// detect fiducials → isolate the main cluster → estimate corners →
/// rectify → (area thresholds ∥ grid layout) → detect marks.
///
/// A pure function of (image, config); nothing is retried internally and
/// no state outlives the call. The debug writer only adds overlay output
/// and never influences the result.
#[time]
pub fn interpret_sheet_image(
    original: &RgbImage,
    config: &PipelineConfig,
    debug_writer: &ImageDebugWriter,
) -> Result<SheetInterpretation, PipelineError> {
    let (reference, scale) = resize_to_height(original, config.fiducials.reference_height);
    let gray = grayscale(&reference);

    let candidates =
        detect_fiducials(&gray, &config.fiducials).map_err(|counts| PipelineError::Detection {
            circle_candidates: counts.circle_candidates,
            contour_candidates: counts.contour_candidates,
        })?;
    let detection_method = candidates[0].method;
    info!(
        "detected {} bubble candidates via {:?}",
        candidates.len(),
        detection_method
    );
    debug_writer.write("candidates", &reference, |canvas| {
        debug::draw_candidates_mut(canvas, &candidates);
    });

    let cluster =
        largest_cluster(&candidates, &config.cluster).ok_or(PipelineError::Clustering {
            points: candidates.len(),
        })?;
    debug_writer.write("cluster", &reference, |canvas| {
        debug::draw_candidates_mut(canvas, &cluster);
    });

    let (reference_corners, corner_estimator) = estimate_corners(&cluster, &config.corners)
        .ok_or(PipelineError::CornerEstimation {
            points: cluster.len(),
        })?;
    info!("estimated corners via {:?}", corner_estimator);
    debug_writer.write("corners", &reference, |canvas| {
        debug::draw_corners_mut(canvas, &reference_corners);
    });

    let corners = reference_corners.scaled(scale);
    let rectified = rectify_sheet(original, &corners, &config.rectify).map_err(|(width, height)| {
        PipelineError::Rectification { width, height }
    })?;

    // layout depends only on dimensions, the coarse statistics only on
    // pixels; the two are independent
    let (layout, ink_statistics) = rayon::join(
        || compute_layout(&config.grid, rectified.width(), rectified.height()),
        || compute_ink_statistics(&rectified, &config.marks),
    );

    let detection = detect_marks(&rectified, &ink_statistics, &layout, &config.grid, &config.marks);
    info!("marks read via {:?} path", detection.path);
    debug_writer.write("grid", &rectified, |canvas| {
        debug::draw_grid_lines_mut(canvas, &layout);
        debug::draw_answers_mut(canvas, &layout, &config.grid, &detection.answers);
    });

    Ok(SheetInterpretation {
        answers: detection.answers,
        rectified,
        corners,
        detection_method,
        corner_estimator,
        mark_path: detection.path,
    })
}
