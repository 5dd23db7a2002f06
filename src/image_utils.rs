use image::imageops::{resize, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::Contour;
use imageproc::filter::box_filter;
use imageproc::point::Point;
use imageproc::rect::Rect;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

/// Resizes an image to the given height, preserving aspect ratio. Returns
/// the resized image and the factor that maps resized coordinates back to
/// the original resolution.
pub fn resize_to_height(img: &RgbImage, target_height: u32) -> (RgbImage, f32) {
    let scale = img.height() as f32 / target_height as f32;
    let target_width = (img.width() as f32 / scale).round().max(1.0) as u32;
    (
        resize(img, target_width, target_height, FilterType::Triangle),
        scale,
    )
}

/// Binarizes a grayscale image against its local mean so that ink (dark on
/// light paper) becomes foreground. A pixel is ink when it is at least
/// `offset` levels darker than the mean of the surrounding
/// `(2 * block_radius + 1)` square block, which keeps the mask stable
/// under uneven lighting.
pub fn binarize_ink(gray: &GrayImage, block_radius: u32, offset: u8) -> GrayImage {
    let local_mean = box_filter(gray, block_radius, block_radius);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        let mean = local_mean.get_pixel(x, y).0[0];
        if pixel.0[0].saturating_add(offset) <= mean {
            out.put_pixel(x, y, WHITE);
        }
    }
    out
}

/// Determines the number of foreground pixels in a binary image.
pub fn count_nonzero(img: &GrayImage) -> u32 {
    img.pixels().filter(|p| p.0[0] != 0).count() as u32
}

/// Counts foreground pixels within a window of a binary image. The window
/// is clamped to the image bounds.
pub fn count_nonzero_in_window(img: &GrayImage, x1: u32, y1: u32, x2: u32, y2: u32) -> u32 {
    let x2 = x2.min(img.width());
    let y2 = y2.min(img.height());
    let mut count = 0;
    for y in y1..y2 {
        for x in x1..x2 {
            if img.get_pixel(x, y).0[0] != 0 {
                count += 1;
            }
        }
    }
    count
}

/// Shape statistics for a single contour.
#[derive(Debug, Clone, Copy)]
pub struct ContourStats {
    pub area: f64,
    pub perimeter: f64,
    pub bounds: Rect,
    pub centroid: Point<f32>,
}

impl ContourStats {
    /// 4π·area/perimeter²; 1.0 for a perfect circle.
    pub fn circularity(&self) -> f64 {
        if self.perimeter <= 0.0 {
            return 0.0;
        }
        4.0 * std::f64::consts::PI * self.area / (self.perimeter * self.perimeter)
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.bounds.width() as f64 / self.bounds.height() as f64
    }
}

/// Computes area (shoelace), perimeter, bounding rect, and centroid of a
/// contour. Returns `None` for contours with fewer than three points,
/// which have no interior.
pub fn contour_stats(contour: &Contour<i32>) -> Option<ContourStats> {
    let points = &contour.points;
    if points.len() < 3 {
        return None;
    }

    let mut min_x = i32::MAX;
    let mut min_y = i32::MAX;
    let mut max_x = i32::MIN;
    let mut max_y = i32::MIN;
    let mut signed_area = 0.0_f64;
    let mut perimeter = 0.0_f64;
    let mut cx = 0.0_f64;
    let mut cy = 0.0_f64;

    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        let cross = p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
        signed_area += cross;
        cx += (p.x + q.x) as f64 * cross;
        cy += (p.y + q.y) as f64 * cross;
        let dx = (q.x - p.x) as f64;
        let dy = (q.y - p.y) as f64;
        perimeter += (dx * dx + dy * dy).sqrt();
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    signed_area /= 2.0;

    let centroid = if signed_area.abs() > 1e-9 {
        Point::new(
            (cx / (6.0 * signed_area)) as f32,
            (cy / (6.0 * signed_area)) as f32,
        )
    } else {
        let n = points.len() as f32;
        Point::new(
            points.iter().map(|p| p.x as f32).sum::<f32>() / n,
            points.iter().map(|p| p.y as f32).sum::<f32>() / n,
        )
    };

    Some(ContourStats {
        area: signed_area.abs(),
        perimeter,
        bounds: Rect::at(min_x, min_y)
            .of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32),
        centroid,
    })
}

/// Converts an RGB pixel to HSV with hue on the half-degree scale
/// (0..=180) and saturation/value in 0..=255.
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> (u8, u8, u8) {
    let r = pixel.0[0] as f32;
    let g = pixel.0[1] as f32;
    let b = pixel.0[2] as f32;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    ((h / 2.0).round() as u8, s.round() as u8, v.round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::contours::BorderType;

    #[test]
    fn ink_binarization_marks_dark_pixels_only() {
        let mut gray = GrayImage::from_pixel(41, 41, Luma([200u8]));
        for y in 18..23 {
            for x in 18..23 {
                gray.put_pixel(x, y, Luma([30u8]));
            }
        }
        let mask = binarize_ink(&gray, 10, 10);
        assert!(mask.get_pixel(20, 20).0[0] != 0);
        assert_eq!(mask.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn nonzero_window_counts_clamp_to_bounds() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(9, 9, WHITE);
        assert_eq!(count_nonzero(&mask), 1);
        assert_eq!(count_nonzero_in_window(&mask, 5, 5, 50, 50), 1);
        assert_eq!(count_nonzero_in_window(&mask, 0, 0, 5, 5), 0);
    }

    #[test]
    fn square_contour_stats() {
        // 10x10 axis-aligned square outline
        let mut points = Vec::new();
        for i in 0..10 {
            points.push(Point::new(i, 0));
        }
        for i in 0..10 {
            points.push(Point::new(10, i));
        }
        for i in 0..10 {
            points.push(Point::new(10 - i, 10));
        }
        for i in 0..10 {
            points.push(Point::new(0, 10 - i));
        }
        let contour = Contour {
            points,
            border_type: BorderType::Outer,
            parent: None,
        };
        let stats = contour_stats(&contour).expect("stats are defined");
        assert!((stats.area - 100.0).abs() < 1e-6);
        assert!((stats.perimeter - 40.0).abs() < 1e-6);
        assert!((stats.centroid.x - 5.0).abs() < 1e-4);
        assert!((stats.centroid.y - 5.0).abs() < 1e-4);
        assert_eq!(stats.bounds.width(), 11);
        // squares sit well below circular, circles near 1.0
        assert!(stats.circularity() < 0.8);
    }

    #[test]
    fn hsv_of_pure_red_wraps_to_zero() {
        let (h, s, v) = rgb_to_hsv(&Rgb([255, 0, 0]));
        assert_eq!(h, 0);
        assert_eq!(s, 255);
        assert_eq!(v, 255);
    }

    #[test]
    fn hsv_of_gray_has_no_saturation() {
        let (_, s, v) = rgb_to_hsv(&Rgb([128, 128, 128]));
        assert_eq!(s, 0);
        assert_eq!(v, 128);
    }
}
