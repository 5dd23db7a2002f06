use imageproc::point::Point;
use log::debug;
use logging_timer::time;

use crate::config::CornerParams;
use crate::fiducials::CandidatePoint;
use crate::geometry::{fit_line_through_points, intersection_of_lines};

/// The sheet's four outer corners, ordered top-left, top-right,
/// bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SheetCorners {
    pub top_left: Point<f32>,
    pub top_right: Point<f32>,
    pub bottom_right: Point<f32>,
    pub bottom_left: Point<f32>,
}

impl SheetCorners {
    pub fn to_array(self) -> [Point<f32>; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Maps corners from reference scale back to original resolution.
    pub fn scaled(&self, factor: f32) -> Self {
        let scale = |p: Point<f32>| Point::new(p.x * factor, p.y * factor);
        Self {
            top_left: scale(self.top_left),
            top_right: scale(self.top_right),
            bottom_right: scale(self.bottom_right),
            bottom_left: scale(self.bottom_left),
        }
    }

    /// True when any two corners coincide, which cannot describe a sheet.
    fn is_degenerate(&self) -> bool {
        let corners = self.to_array();
        for i in 0..corners.len() {
            for j in i + 1..corners.len() {
                let dx = corners[i].x - corners[j].x;
                let dy = corners[i].y - corners[j].y;
                if (dx * dx + dy * dy).sqrt() < 1.0 {
                    return true;
                }
            }
        }
        false
    }
}

/// Which estimation strategy produced the corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CornerEstimator {
    LineFit,
    ExtremalHeuristic,
}

/// Derives the sheet corners from the surviving cluster. Line fitting
/// runs first; any failure there falls back to the extremal heuristic
/// unconditionally. `None` means even the heuristic produced a
/// degenerate quadrilateral.
#[time]
pub fn estimate_corners(
    points: &[CandidatePoint],
    params: &CornerParams,
) -> Option<(SheetCorners, CornerEstimator)> {
    if let Some(corners) = estimate_by_line_fit(points, params) {
        if !corners.is_degenerate() {
            return Some((corners, CornerEstimator::LineFit));
        }
    }
    debug!("line fitting failed, falling back to extremal heuristic");

    let corners = estimate_by_extremes(points)?;
    if corners.is_degenerate() {
        return None;
    }
    Some((corners, CornerEstimator::ExtremalHeuristic))
}

/// Method A: partition points into four edge bands around the extremal
/// coordinates, fit a line through each band, and intersect adjacent
/// lines. Fails when a band holds too few points to define a line or
/// when adjacent lines are parallel.
fn estimate_by_line_fit(points: &[CandidatePoint], params: &CornerParams) -> Option<SheetCorners> {
    let positions = points.iter().map(CandidatePoint::position).collect::<Vec<_>>();

    let min_x = positions.iter().map(|p| p.x).reduce(f32::min)?;
    let max_x = positions.iter().map(|p| p.x).reduce(f32::max)?;
    let min_y = positions.iter().map(|p| p.y).reduce(f32::min)?;
    let max_y = positions.iter().map(|p| p.y).reduce(f32::max)?;

    let tolerance = params.edge_tolerance;
    let band = |keep: &dyn Fn(&Point<f32>) -> bool| {
        positions
            .iter()
            .filter(|p| keep(p))
            .copied()
            .collect::<Vec<_>>()
    };
    let left = band(&|p| p.x < min_x + tolerance);
    let right = band(&|p| p.x > max_x - tolerance);
    let top = band(&|p| p.y < min_y + tolerance);
    let bottom = band(&|p| p.y > max_y - tolerance);

    let left_line = fit_line_through_points(&left)?;
    let right_line = fit_line_through_points(&right)?;
    let top_line = fit_line_through_points(&top)?;
    let bottom_line = fit_line_through_points(&bottom)?;

    Some(SheetCorners {
        top_left: intersection_of_lines(&top_line, &left_line)?,
        top_right: intersection_of_lines(&top_line, &right_line)?,
        bottom_right: intersection_of_lines(&bottom_line, &right_line)?,
        bottom_left: intersection_of_lines(&bottom_line, &left_line)?,
    })
}

/// Method B: extremal heuristic over coordinate sums and differences,
/// robust to tilt. Top-left minimizes x + y, bottom-right maximizes it;
/// top-right maximizes x - y, bottom-left minimizes it.
fn estimate_by_extremes(points: &[CandidatePoint]) -> Option<SheetCorners> {
    let first = points.first()?.position();
    let mut top_left = (first.x + first.y, first);
    let mut bottom_right = top_left;
    let mut top_right = (first.x - first.y, first);
    let mut bottom_left = top_right;

    for point in points.iter().skip(1) {
        let p = point.position();
        let sum = p.x + p.y;
        let diff = p.x - p.y;
        if sum < top_left.0 {
            top_left = (sum, p);
        }
        if sum > bottom_right.0 {
            bottom_right = (sum, p);
        }
        if diff > top_right.0 {
            top_right = (diff, p);
        }
        if diff < bottom_left.0 {
            bottom_left = (diff, p);
        }
    }

    Some(SheetCorners {
        top_left: top_left.1,
        top_right: top_right.1,
        bottom_right: bottom_right.1,
        bottom_left: bottom_left.1,
    })
}
