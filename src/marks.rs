use image::imageops::grayscale;
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::drawing::draw_polygon_mut;
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;
use log::debug;
use logging_timer::time;
use serde::Serialize;

use crate::config::{HueRange, MarkParams};
use crate::grid::{GridLayout, GridSpec};
use crate::image_utils::{
    binarize_ink, contour_stats, count_nonzero, count_nonzero_in_window, rgb_to_hsv, ContourStats,
    WHITE,
};

/// Per subject, the marked option label for every question, in question
/// order. `None` is "no mark". The sole output of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AnswerMatrix {
    subjects: Vec<Vec<Option<char>>>,
}

impl AnswerMatrix {
    pub fn empty(spec: &GridSpec) -> Self {
        Self {
            subjects: vec![vec![None; spec.questions]; spec.subjects],
        }
    }

    pub fn set(&mut self, subject: usize, question: usize, label: char) {
        self.subjects[subject][question] = Some(label);
    }

    pub fn get(&self, subject: usize, question: usize) -> Option<char> {
        self.subjects[subject][question]
    }

    pub fn subjects(&self) -> &[Vec<Option<char>>] {
        &self.subjects
    }
}

/// Which detection path produced the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkPath {
    ColorHighlight,
    FillRatio,
}

/// Plausible bubble-area bounds for one image, derived from local contour
/// statistics. Never cached across images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaBounds {
    pub min: f64,
    pub max: f64,
}

/// The result of mark detection, with the per-image context that debug
/// overlays may want to render.
#[derive(Debug, Clone)]
pub struct MarkDetection {
    pub answers: AnswerMatrix,
    pub path: MarkPath,
    pub area_bounds: AreaBounds,
}

/// Coarse ink mask of a rectified sheet, its external contours, and the
/// per-image area bounds derived from them. Computable independently of
/// the grid layout, so the pipeline runs both in parallel.
#[derive(Debug)]
pub struct InkStatistics {
    pub ink: GrayImage,
    contours: Vec<Contour<i32>>,
    pub area_bounds: AreaBounds,
}

/// Runs the coarse threshold pass over a rectified sheet and derives the
/// dynamic bubble-area bounds from its external contours.
#[time]
pub fn compute_ink_statistics(rectified: &RgbImage, params: &MarkParams) -> InkStatistics {
    let gray = grayscale(rectified);
    let blurred = gaussian_blur_f32(&gray, params.blur_sigma);
    let ink = binarize_ink(&blurred, params.block_radius, params.threshold_offset);
    let contours = external_contours(&ink);
    let stats = contours
        .iter()
        .filter_map(contour_stats)
        .collect::<Vec<ContourStats>>();
    let area_bounds = dynamic_area_bounds(&stats, params);
    InkStatistics {
        ink,
        contours,
        area_bounds,
    }
}

/// Reads the answer matrix off a rectified sheet. The color-highlight
/// path runs whenever the highlight mask has any signal; a sheet with no
/// color cue falls back to the geometric fill-ratio path. Pure: nothing
/// here draws or writes.
#[time]
pub fn detect_marks(
    rectified: &RgbImage,
    statistics: &InkStatistics,
    layout: &GridLayout,
    spec: &GridSpec,
    params: &MarkParams,
) -> MarkDetection {
    let mask = highlight_mask(rectified, &params.highlight_ranges);
    if count_nonzero(&mask) > 0 {
        debug!("highlight signal present, using color path");
        MarkDetection {
            answers: detect_marks_by_highlight(&mask, layout, spec),
            path: MarkPath::ColorHighlight,
            area_bounds: statistics.area_bounds,
        }
    } else {
        debug!("no highlight signal, using fill-ratio path");
        let bubbles = bubble_fill_ratios(
            &statistics.ink,
            &statistics.contours,
            &statistics.area_bounds,
            params,
        );
        MarkDetection {
            answers: detect_marks_by_fill(&bubbles, layout, spec, params),
            path: MarkPath::FillRatio,
            area_bounds: statistics.area_bounds,
        }
    }
}

fn external_contours(mask: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .collect()
}

/// Derives per-image bubble-area bounds as median ± 1.5·IQR over the
/// areas of plausible contours, clamped to a fixed window. Falls back to
/// fixed bounds when nothing qualifies.
pub fn dynamic_area_bounds(stats: &[ContourStats], params: &MarkParams) -> AreaBounds {
    let mut areas = stats
        .iter()
        .filter(|s| {
            s.area > params.initial_min_area
                && s.area < params.initial_max_area
                && s.aspect_ratio() >= params.stat_min_aspect
                && s.aspect_ratio() <= params.stat_max_aspect
        })
        .map(|s| s.area)
        .collect::<Vec<f64>>();

    if areas.is_empty() {
        debug!("no contours qualify for area statistics, using fallback bounds");
        return AreaBounds {
            min: params.fallback_min_area,
            max: params.fallback_max_area,
        };
    }

    areas.sort_by(|a, b| a.partial_cmp(b).expect("areas are finite"));
    let median = percentile(&areas, 50.0);
    let iqr = percentile(&areas, 75.0) - percentile(&areas, 25.0);
    AreaBounds {
        min: params.area_floor.max(median - 1.5 * iqr),
        max: params.area_ceiling.min(median + 1.5 * iqr),
    }
}

/// Linear-interpolated percentile of an ascending-sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let position = q / 100.0 * (sorted.len() - 1) as f64;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    let fraction = position - low as f64;
    sorted[low] + (sorted[high] - sorted[low]) * fraction
}

/// Binary mask of pixels whose HSV value falls in any highlight range.
pub fn highlight_mask(img: &RgbImage, ranges: &[HueRange]) -> GrayImage {
    let mut mask = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let (h, s, v) = rgb_to_hsv(pixel);
        let hit = ranges.iter().any(|r| {
            h >= r.min_hue && h <= r.max_hue && s >= r.min_saturation && v >= r.min_value
        });
        if hit {
            mask.put_pixel(x, y, WHITE);
        }
    }
    mask
}

/// Color path: per question row and per subject's option-column block,
/// the option cell with the strictly greatest nonzero mask-pixel count
/// wins; ties keep the first-encountered option; a subject with no
/// masked pixel in the row stays unmarked.
pub fn detect_marks_by_highlight(
    mask: &GrayImage,
    layout: &GridLayout,
    spec: &GridSpec,
) -> AnswerMatrix {
    let mut answers = AnswerMatrix::empty(spec);
    let height = mask.height();

    for question in 0..spec.questions {
        let Some((y1, y2)) = layout.question_row_bounds(question) else {
            continue;
        };
        let y2 = y2.min(height);
        if y2 <= y1 {
            continue;
        }

        let mut best: Vec<Option<(usize, u32)>> = vec![None; spec.subjects];
        for (col, mapping) in layout.col_map.iter().enumerate() {
            let Some((subject, option)) = *mapping else {
                continue;
            };
            let Some((x1, x2)) = layout.column_bounds(col) else {
                continue;
            };
            if x2 <= x1 {
                continue;
            }
            let hits = count_nonzero_in_window(mask, x1, y1, x2, y2);
            if hits == 0 {
                continue;
            }
            if best[subject].map_or(true, |(_, top)| hits > top) {
                best[subject] = Some((option, hits));
            }
        }

        for (subject, winner) in best.iter().enumerate() {
            if let Some((option, _)) = winner {
                answers.set(subject, question, spec.option_label(*option));
            }
        }
    }

    answers
}

/// A bubble contour with the fraction of its interior covered by ink.
#[derive(Debug, Clone)]
pub struct ScoredBubble {
    pub stats: ContourStats,
    pub fill_ratio: f64,
}

/// Filters contours down to bubble-like shapes within the (loosened)
/// dynamic area bounds and scores each by ink coverage.
pub fn bubble_fill_ratios(
    ink: &GrayImage,
    contours: &[Contour<i32>],
    bounds: &AreaBounds,
    params: &MarkParams,
) -> Vec<ScoredBubble> {
    let min_area = bounds.min * (1.0 - params.bounds_slack);
    let max_area = bounds.max * (1.0 + params.bounds_slack);

    contours
        .iter()
        .filter_map(|contour| {
            let stats = contour_stats(contour)?;
            if stats.area < min_area || stats.area > max_area {
                return None;
            }
            let aspect = stats.aspect_ratio();
            if aspect < params.bubble_min_aspect || aspect > params.bubble_max_aspect {
                return None;
            }
            if stats.circularity() < params.bubble_min_circularity {
                return None;
            }
            let fill_ratio = contour_fill_ratio(ink, contour, &stats)?;
            Some(ScoredBubble { stats, fill_ratio })
        })
        .collect()
}

/// Fraction of the contour's interior pixels that are ink. The interior
/// is rasterized into a bounding-box-local mask.
fn contour_fill_ratio(ink: &GrayImage, contour: &Contour<i32>, stats: &ContourStats) -> Option<f64> {
    let bounds = stats.bounds;
    let mut local = GrayImage::new(bounds.width(), bounds.height());
    let mut polygon = contour
        .points
        .iter()
        .map(|p| Point::new(p.x - bounds.left(), p.y - bounds.top()))
        .collect::<Vec<Point<i32>>>();
    if polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() < 3 {
        return None;
    }
    draw_polygon_mut(&mut local, &polygon, WHITE);

    let mut interior = 0u32;
    let mut filled = 0u32;
    for (x, y, pixel) in local.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        interior += 1;
        let ink_x = (bounds.left() + x as i32) as u32;
        let ink_y = (bounds.top() + y as i32) as u32;
        if ink_x < ink.width() && ink_y < ink.height() && ink.get_pixel(ink_x, ink_y).0[0] != 0 {
            filled += 1;
        }
    }
    if interior == 0 {
        return None;
    }
    Some(f64::from(filled) / f64::from(interior))
}

/// Geometric path: every sufficiently filled bubble is assigned to the
/// grid cell containing its centroid; the highest fill ratio per
/// (subject, question) wins, strict greater-than.
pub fn detect_marks_by_fill(
    bubbles: &[ScoredBubble],
    layout: &GridLayout,
    spec: &GridSpec,
    params: &MarkParams,
) -> AnswerMatrix {
    let mut answers = AnswerMatrix::empty(spec);
    let mut best: Vec<Vec<Option<(usize, f64)>>> =
        vec![vec![None; spec.questions]; spec.subjects];

    for bubble in bubbles {
        if bubble.fill_ratio <= params.fill_threshold {
            continue;
        }
        let cx = bubble.stats.centroid.x.round();
        let cy = bubble.stats.centroid.y.round();
        if cx < 0.0 || cy < 0.0 {
            continue;
        }
        let Some((subject, option, question)) = layout.cell_at(cx as u32, cy as u32) else {
            continue;
        };
        let slot = &mut best[subject][question];
        if slot.map_or(true, |(_, top)| bubble.fill_ratio > top) {
            *slot = Some((option, bubble.fill_ratio));
        }
    }

    for (subject, questions) in best.iter().enumerate() {
        for (question, winner) in questions.iter().enumerate() {
            if let Some((option, _)) = winner {
                answers.set(subject, question, spec.option_label(*option));
            }
        }
    }

    answers
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
    use imageproc::rect::Rect;

    use crate::grid::compute_layout;

    fn stats_with_area(area: f64) -> ContourStats {
        let side = area.sqrt().round() as u32;
        ContourStats {
            area,
            perimeter: 4.0 * area.sqrt(),
            bounds: Rect::at(0, 0).of_size(side.max(1), side.max(1)),
            centroid: Point::new(0.0, 0.0),
        }
    }

    #[test]
    fn dynamic_bounds_bracket_the_median() {
        let stats = [480.0, 490.0, 500.0, 510.0, 520.0]
            .iter()
            .map(|&a| stats_with_area(a))
            .collect::<Vec<_>>();
        let bounds = dynamic_area_bounds(&stats, &MarkParams::default());
        assert!(bounds.min < 500.0);
        assert!(bounds.max > 500.0);
        assert!(bounds.min >= 100.0);
        assert!(bounds.max <= 2000.0);
    }

    #[test]
    fn dynamic_bounds_fall_back_without_contours() {
        let bounds = dynamic_area_bounds(&[], &MarkParams::default());
        assert_eq!(bounds.min, 250.0);
        assert_eq!(bounds.max, 800.0);
    }

    #[test]
    fn dynamic_bounds_ignore_elongated_contours() {
        let mut elongated = stats_with_area(500.0);
        elongated.bounds = Rect::at(0, 0).of_size(100, 5);
        let bounds = dynamic_area_bounds(&[elongated], &MarkParams::default());
        assert_eq!(bounds.min, 250.0);
        assert_eq!(bounds.max, 800.0);
    }

    #[test]
    fn highlight_mask_handles_hue_wraparound() {
        let mut img = RgbImage::from_pixel(4, 1, Rgb([255, 255, 255]));
        img.put_pixel(0, 0, Rgb([255, 0, 0])); // hue 0
        img.put_pixel(1, 0, Rgb([255, 0, 20])); // hue wraps past 170
        img.put_pixel(2, 0, Rgb([0, 0, 255])); // blue, not a highlight
        let mask = highlight_mask(&img, &MarkParams::default().highlight_ranges);
        assert_ne!(mask.get_pixel(0, 0).0[0], 0);
        assert_ne!(mask.get_pixel(1, 0).0[0], 0);
        assert_eq!(mask.get_pixel(2, 0).0[0], 0);
        assert_eq!(mask.get_pixel(3, 0).0[0], 0);
    }

    fn fill_cell(img: &mut RgbImage, layout: &GridLayout, col: usize, question: usize, color: Rgb<u8>) {
        let (x1, x2) = layout.column_bounds(col).expect("column exists");
        let (y1, y2) = layout.question_row_bounds(question).expect("row exists");
        for y in y1..y2 {
            for x in x1..x2 {
                img.put_pixel(x, y, color);
            }
        }
    }

    #[test]
    fn single_highlighted_cell_yields_one_answer() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 840, 780);
        let mut canvas = RgbImage::from_pixel(840, 780, Rgb([255, 255, 255]));
        let col = layout.column_of(0, 1).expect("option B column");
        fill_cell(&mut canvas, &layout, col, 0, Rgb([230, 20, 20]));

        let params = MarkParams::default();
        let statistics = compute_ink_statistics(&canvas, &params);
        let detection = detect_marks(&canvas, &statistics, &layout, &spec, &params);
        assert_eq!(detection.path, MarkPath::ColorHighlight);
        assert_eq!(detection.answers.get(0, 0), Some('B'));
        for subject in 0..spec.subjects {
            for question in 0..spec.questions {
                if (subject, question) != (0, 0) {
                    assert_eq!(detection.answers.get(subject, question), None);
                }
            }
        }
    }

    #[test]
    fn equal_highlight_counts_keep_the_first_option() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 840, 780);
        let mut mask = GrayImage::new(840, 780);
        // identical pixel counts in options A and C of subject 1,
        // question 3
        for option in [0, 2] {
            let col = layout.column_of(1, option).expect("column exists");
            let (x1, _) = layout.column_bounds(col).expect("bounds exist");
            let (y1, _) = layout.question_row_bounds(3).expect("row exists");
            for i in 0..5 {
                mask.put_pixel(x1 + i, y1 + 1, WHITE);
            }
        }
        let answers = detect_marks_by_highlight(&mask, &layout, &spec);
        assert_eq!(answers.get(1, 3), Some('A'));
    }

    #[test]
    fn pencil_filled_bubble_is_read_by_the_fill_path() {
        let spec = GridSpec::default();
        let layout = compute_layout(&spec, 840, 780);
        let mut canvas = RgbImage::from_pixel(840, 780, Rgb([245, 245, 245]));

        // empty bubbles: hollow outlines in subject 0's A column
        let outline_col = layout.column_of(0, 0).expect("column exists");
        let (ox1, ox2) = layout.column_bounds(outline_col).expect("bounds exist");
        for question in 0..spec.questions {
            let (y1, y2) = layout.question_row_bounds(question).expect("row exists");
            let center = (((ox1 + ox2) / 2) as i32, ((y1 + y2) / 2) as i32);
            draw_hollow_circle_mut(&mut canvas, center, 10, Rgb([40, 40, 40]));
        }

        // one pencil-filled bubble at subject 2, question 10, option D
        let marked_col = layout.column_of(2, 3).expect("column exists");
        let (mx1, mx2) = layout.column_bounds(marked_col).expect("bounds exist");
        let (my1, my2) = layout.question_row_bounds(10).expect("row exists");
        let center = (((mx1 + mx2) / 2) as i32, ((my1 + my2) / 2) as i32);
        draw_filled_circle_mut(&mut canvas, center, 10, Rgb([40, 40, 40]));

        // a light blur keeps the synthetic outlines thin, so empty rings
        // score well below the fill threshold
        let params = MarkParams {
            blur_sigma: 0.6,
            ..MarkParams::default()
        };
        let statistics = compute_ink_statistics(&canvas, &params);
        let detection = detect_marks(&canvas, &statistics, &layout, &spec, &params);
        assert_eq!(detection.path, MarkPath::FillRatio);
        assert_eq!(detection.answers.get(2, 10), Some('D'));
        for question in 0..spec.questions {
            assert_eq!(detection.answers.get(0, question), None);
        }
    }

    #[test]
    fn answer_matrix_serializes_options_and_gaps() {
        let spec = GridSpec {
            subjects: 1,
            questions: 3,
            ..GridSpec::default()
        };
        let mut answers = AnswerMatrix::empty(&spec);
        answers.set(0, 0, 'A');
        answers.set(0, 2, 'D');
        let json = serde_json::to_string(&answers).expect("serializes");
        assert_eq!(json, r#"[["A",null,"D"]]"#);
    }
}
