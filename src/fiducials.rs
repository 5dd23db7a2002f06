use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use imageproc::point::Point;
use log::debug;
use logging_timer::time;

use crate::config::FiducialParams;
use crate::image_utils::{binarize_ink, contour_stats};

/// Which detection strategy produced a candidate point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    CircleTransform,
    ContourFallback,
}

/// A bubble-center candidate at reference scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePoint {
    pub x: i32,
    pub y: i32,
    pub method: DetectionMethod,
}

impl CandidatePoint {
    pub fn position(&self) -> Point<f32> {
        Point::new(self.x as f32, self.y as f32)
    }
}

/// Candidate counts from both strategies, reported when neither reaches
/// the minimum yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionYield {
    pub circle_candidates: usize,
    pub contour_candidates: usize,
}

/// Locates bubble-center candidates in a grayscale sheet at reference
/// scale. The circle transform runs first; the contour fallback is
/// consulted only when the transform's yield is at or below
/// `min_candidates`. Neither sufficing is a detection failure and yields
/// no partial result.
#[time]
pub fn detect_fiducials(
    gray: &GrayImage,
    params: &FiducialParams,
) -> Result<Vec<CandidatePoint>, DetectionYield> {
    let circle_centers = circle_transform_centers(gray, params);
    debug!("circle transform found {} candidates", circle_centers.len());
    if circle_centers.len() > params.min_candidates {
        return Ok(tag(circle_centers, DetectionMethod::CircleTransform));
    }

    let contour_centers = contour_fallback_centers(gray, params);
    debug!("contour fallback found {} candidates", contour_centers.len());
    if contour_centers.len() > params.min_candidates {
        return Ok(tag(contour_centers, DetectionMethod::ContourFallback));
    }

    Err(DetectionYield {
        circle_candidates: circle_centers.len(),
        contour_candidates: contour_centers.len(),
    })
}

fn tag(centers: Vec<Point<i32>>, method: DetectionMethod) -> Vec<CandidatePoint> {
    centers
        .into_iter()
        .map(|p| CandidatePoint {
            x: p.x,
            y: p.y,
            method,
        })
        .collect()
}

/// Hough-style circle search tuned for the expected bubble radius range.
/// Strong-gradient pixels vote for possible centers along both gradient
/// directions at every radius in range; centers are vote peaks thinned by
/// a minimum mutual distance.
fn circle_transform_centers(gray: &GrayImage, params: &FiducialParams) -> Vec<Point<i32>> {
    let blurred = gaussian_blur_f32(gray, params.blur_sigma);
    let gx = horizontal_sobel(&blurred);
    let gy = vertical_sobel(&blurred);
    let (width, height) = gray.dimensions();

    let mut votes = vec![0u32; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let dx = i32::from(gx.get_pixel(x, y).0[0]);
            let dy = i32::from(gy.get_pixel(x, y).0[0]);
            if dx.abs() + dy.abs() < params.gradient_threshold {
                continue;
            }
            let magnitude = ((dx * dx + dy * dy) as f32).sqrt();
            let ux = dx as f32 / magnitude;
            let uy = dy as f32 / magnitude;
            for radius in params.min_radius..=params.max_radius {
                for sign in [-1.0f32, 1.0] {
                    let cx = (x as f32 + sign * ux * radius as f32).round() as i32;
                    let cy = (y as f32 + sign * uy * radius as f32).round() as i32;
                    if cx >= 0 && cx < width as i32 && cy >= 0 && cy < height as i32 {
                        votes[(cy as u32 * width + cx as u32) as usize] += 1;
                    }
                }
            }
        }
    }

    let mut peaks = Vec::new();
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let v = votes[(y as u32 * width + x as u32) as usize];
            if v < params.vote_threshold {
                continue;
            }
            let mut is_peak = true;
            'neighbors: for ny in (y - 1).max(0)..=(y + 1).min(height as i32 - 1) {
                for nx in (x - 1).max(0)..=(x + 1).min(width as i32 - 1) {
                    if votes[(ny as u32 * width + nx as u32) as usize] > v {
                        is_peak = false;
                        break 'neighbors;
                    }
                }
            }
            if is_peak {
                peaks.push((v, Point::new(x, y)));
            }
        }
    }
    peaks.sort_by(|a, b| b.0.cmp(&a.0));

    let min_distance_sq = (params.min_center_distance * params.min_center_distance) as i32;
    let mut centers: Vec<Point<i32>> = Vec::new();
    for (_, p) in peaks {
        let separated = centers.iter().all(|c| {
            let dx = c.x - p.x;
            let dy = c.y - p.y;
            dx * dx + dy * dy >= min_distance_sq
        });
        if separated {
            centers.push(p);
        }
    }
    centers
}

/// Contour-based fallback: adaptive local thresholding, external contour
/// extraction, then an area and circularity gate. Output is the contour
/// centroids.
fn contour_fallback_centers(gray: &GrayImage, params: &FiducialParams) -> Vec<Point<i32>> {
    let mask = binarize_ink(gray, params.block_radius, params.threshold_offset);
    let contours = find_contours::<i32>(&mask);

    contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(contour_stats)
        .filter(|stats| {
            stats.area > params.min_area
                && stats.area < params.max_area
                && stats.circularity() > params.min_circularity
                && stats.circularity() < params.max_circularity
        })
        .map(|stats| {
            Point::new(
                stats.centroid.x.round() as i32,
                stats.centroid.y.round() as i32,
            )
        })
        .collect()
}
