use imageproc::point::Point;

/// An infinite line described by a point on it and a unit direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub origin: Point<f32>,
    pub direction: Point<f32>,
}

pub fn distance_between_points(p1: &Point<f32>, p2: &Point<f32>) -> f32 {
    ((p1.x - p2.x).powi(2) + (p1.y - p2.y).powi(2)).sqrt()
}

/// Fits a line through a set of points by total least squares: the line
/// passes through the centroid along the principal axis of the point
/// spread. Returns `None` for fewer than two points, since a single point
/// does not determine a direction.
pub fn fit_line_through_points(points: &[Point<f32>]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f32;
    let cx = points.iter().map(|p| p.x).sum::<f32>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f32>() / n;

    let mut xx = 0.0;
    let mut xy = 0.0;
    let mut yy = 0.0;
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        xx += dx * dx;
        xy += dx * dy;
        yy += dy * dy;
    }

    if xx == 0.0 && xy == 0.0 && yy == 0.0 {
        // all points coincide
        return None;
    }

    // principal axis of the 2x2 covariance matrix [xx xy; xy yy]
    let theta = 0.5 * (2.0 * xy).atan2(xx - yy);
    Some(Line {
        origin: Point::new(cx, cy),
        direction: Point::new(theta.cos(), theta.sin()),
    })
}

/// Intersects two infinite lines. Returns `None` when the lines are
/// parallel (zero determinant).
pub fn intersection_of_lines(line1: &Line, line2: &Line) -> Option<Point<f32>> {
    let d1 = line1.direction;
    let d2 = line2.direction;
    let det = d1.x * d2.y - d1.y * d2.x;
    if det.abs() < 1e-6 {
        return None;
    }
    let dx = line2.origin.x - line1.origin.x;
    let dy = line2.origin.y - line1.origin.y;
    let t = (dx * d2.y - dy * d2.x) / det;
    Some(Point::new(
        line1.origin.x + t * d1.x,
        line1.origin.y + t * d1.y,
    ))
}
