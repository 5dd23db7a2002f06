use serde::Deserialize;

use crate::grid::GridSpec;

/// Every tunable constant of the pipeline in one immutable value, passed
/// by reference into each component call. Loadable from JSON; `Default`
/// supplies the reference-scale constants. Per-image statistics (dynamic
/// area bounds) are computed per invocation and never stored here.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub fiducials: FiducialParams,
    pub cluster: ClusterParams,
    pub corners: CornerParams,
    pub rectify: RectifyParams,
    pub marks: MarkParams,
    pub grid: GridSpec,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FiducialParams {
    /// Detection runs on the image resized to this height.
    pub reference_height: u32,
    /// Minimum candidate yield for either detection method to count as a
    /// success.
    pub min_candidates: usize,
    /// Expected bubble radius range at reference scale, inclusive.
    pub min_radius: u32,
    pub max_radius: u32,
    /// Suppression distance between accepted circle centers.
    pub min_center_distance: u32,
    /// Gradient votes a center must collect.
    pub vote_threshold: u32,
    /// Sobel magnitude (|gx| + |gy|) floor for a pixel to vote.
    pub gradient_threshold: i32,
    pub blur_sigma: f32,
    /// Local-mean block radius and offset for the contour fallback.
    pub block_radius: u32,
    pub threshold_offset: u8,
    /// Contour-fallback filters.
    pub min_area: f64,
    pub max_area: f64,
    pub min_circularity: f64,
    pub max_circularity: f64,
}

impl Default for FiducialParams {
    fn default() -> Self {
        Self {
            reference_height: 1000,
            min_candidates: 50,
            min_radius: 9,
            max_radius: 15,
            min_center_distance: 17,
            vote_threshold: 25,
            gradient_threshold: 320,
            blur_sigma: 1.5,
            block_radius: 25,
            threshold_offset: 15,
            min_area: 50.0,
            max_area: 500.0,
            min_circularity: 0.8,
            max_circularity: 1.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterParams {
    /// Neighborhood radius at reference scale.
    pub eps: f64,
    /// Neighbors (self included) required for a core point.
    pub min_samples: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps: 90.0,
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CornerParams {
    /// Width of the band around the extremal x/y coordinates from which
    /// each edge's points are drawn.
    pub edge_tolerance: f32,
}

impl Default for CornerParams {
    fn default() -> Self {
        Self {
            edge_tolerance: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RectifyParams {
    /// Symmetric padding added around the rectified sheet, as a fraction
    /// of each dimension.
    pub padding_ratio: f32,
}

impl Default for RectifyParams {
    fn default() -> Self {
        Self {
            padding_ratio: 0.02,
        }
    }
}

/// One HSV acceptance range for highlight-marked bubbles. Hue uses the
/// half-degree scale (0..=180); two ranges together express wraparound.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HueRange {
    pub min_hue: u8,
    pub max_hue: u8,
    pub min_saturation: u8,
    pub min_value: u8,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkParams {
    /// Coarse ink-mask pass over the rectified sheet.
    pub blur_sigma: f32,
    pub block_radius: u32,
    pub threshold_offset: u8,
    /// Raw-area and aspect gates for contours feeding the dynamic
    /// area statistics.
    pub initial_min_area: f64,
    pub initial_max_area: f64,
    pub stat_min_aspect: f64,
    pub stat_max_aspect: f64,
    /// Clamp applied to the median ± 1.5·IQR bounds.
    pub area_floor: f64,
    pub area_ceiling: f64,
    /// Used when no contour qualifies for the statistics.
    pub fallback_min_area: f64,
    pub fallback_max_area: f64,
    /// Dynamic bounds are loosened by this fraction when filtering
    /// bubble contours.
    pub bounds_slack: f64,
    /// Bubble-contour gates for the fill-ratio path.
    pub bubble_min_aspect: f64,
    pub bubble_max_aspect: f64,
    pub bubble_min_circularity: f64,
    /// A bubble is filled when ink covers more than this fraction of it.
    pub fill_threshold: f64,
    /// Highlight hue ranges; defaults cover red with wraparound.
    pub highlight_ranges: Vec<HueRange>,
}

impl Default for MarkParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.4,
            block_radius: 25,
            threshold_offset: 15,
            initial_min_area: 50.0,
            initial_max_area: 2000.0,
            stat_min_aspect: 0.65,
            stat_max_aspect: 1.38,
            area_floor: 100.0,
            area_ceiling: 2000.0,
            fallback_min_area: 250.0,
            fallback_max_area: 800.0,
            bounds_slack: 0.1,
            bubble_min_aspect: 0.5,
            bubble_max_aspect: 1.5,
            bubble_min_circularity: 0.35,
            fill_threshold: 0.6,
            highlight_ranges: vec![
                HueRange {
                    min_hue: 0,
                    max_hue: 10,
                    min_saturation: 120,
                    min_value: 70,
                },
                HueRange {
                    min_hue: 170,
                    max_hue: 180,
                    min_saturation: 120,
                    min_value: 70,
                },
            ],
        }
    }
}
