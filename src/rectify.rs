use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use log::debug;
use logging_timer::time;

use crate::config::RectifyParams;
use crate::corners::SheetCorners;
use crate::geometry::distance_between_points;

/// Warps the original image so the sheet fills a flat, padded canvas.
///
/// The target size is the maximum of each pair of opposing edge lengths,
/// with symmetric padding added on all sides. The corners must already be
/// in original-image coordinates. The error payload is the computed
/// content size of the failed rectification (zero-sized target or a
/// singular mapping).
#[time]
pub fn rectify_sheet(
    original: &RgbImage,
    corners: &SheetCorners,
    params: &RectifyParams,
) -> Result<RgbImage, (u32, u32)> {
    let width_bottom = distance_between_points(&corners.bottom_right, &corners.bottom_left);
    let width_top = distance_between_points(&corners.top_right, &corners.top_left);
    let height_right = distance_between_points(&corners.top_right, &corners.bottom_right);
    let height_left = distance_between_points(&corners.top_left, &corners.bottom_left);

    let content_width = width_bottom.max(width_top) as u32;
    let content_height = height_right.max(height_left) as u32;
    if content_width == 0 || content_height == 0 {
        return Err((content_width, content_height));
    }

    let padding_x = (content_width as f32 * params.padding_ratio) as u32;
    let padding_y = (content_height as f32 * params.padding_ratio) as u32;
    let final_width = content_width + 2 * padding_x;
    let final_height = content_height + 2 * padding_y;

    let src = corners.to_array().map(|p| (p.x, p.y));
    let dst = [
        (padding_x as f32, padding_y as f32),
        ((padding_x + content_width - 1) as f32, padding_y as f32),
        (
            (padding_x + content_width - 1) as f32,
            (padding_y + content_height - 1) as f32,
        ),
        (padding_x as f32, (padding_y + content_height - 1) as f32),
    ];

    let projection = Projection::from_control_points(src, dst)
        .ok_or((content_width, content_height))?;
    debug!(
        "rectifying to {}x{} ({}x{} content plus padding)",
        final_width, final_height, content_width, content_height
    );

    let mut rectified = RgbImage::new(final_width, final_height);
    warp_into(
        original,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut rectified,
    );
    Ok(rectified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::point::Point;

    fn corners(tl: (f32, f32), tr: (f32, f32), br: (f32, f32), bl: (f32, f32)) -> SheetCorners {
        SheetCorners {
            top_left: Point::new(tl.0, tl.1),
            top_right: Point::new(tr.0, tr.1),
            bottom_right: Point::new(br.0, br.1),
            bottom_left: Point::new(bl.0, bl.1),
        }
    }

    #[test]
    fn output_dimensions_include_symmetric_padding() {
        let img = RgbImage::new(600, 400);
        let c = corners((0.0, 0.0), (499.0, 0.0), (499.0, 299.0), (0.0, 299.0));
        let rectified =
            rectify_sheet(&img, &c, &RectifyParams { padding_ratio: 0.02 }).expect("rectifies");
        // content 499x299, padding floor(499*0.02)=9 and floor(299*0.02)=5
        assert_eq!(rectified.dimensions(), (499 + 18, 299 + 10));
    }

    #[test]
    fn extracts_the_region_inside_the_corners() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        for y in 10..50 {
            for x in 10..50 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let c = corners((10.0, 10.0), (49.0, 10.0), (49.0, 49.0), (10.0, 49.0));
        let rectified =
            rectify_sheet(&img, &c, &RectifyParams { padding_ratio: 0.0 }).expect("rectifies");
        let (w, h) = rectified.dimensions();
        let center = rectified.get_pixel(w / 2, h / 2);
        assert_eq!(*center, Rgb([255, 255, 255]));
    }

    #[test]
    fn coincident_corners_are_a_rectification_failure() {
        let img = RgbImage::new(100, 100);
        let c = corners((5.0, 5.0), (5.0, 5.0), (5.0, 5.0), (5.0, 5.0));
        let err = rectify_sheet(&img, &c, &RectifyParams::default())
            .expect_err("degenerate corners cannot rectify");
        assert_eq!(err, (0, 0));
    }
}
