//! Convex hull and polygon vertex ordering.

use std::cmp::Ordering;
use std::f64::consts::TAU;

use crate::anonymize::points::Point;
use crate::anonymize::RegionError;

/// Convex hull vertices (Andrew's monotone chain). Duplicate and collinear
/// boundary points are dropped, so every returned vertex is a true corner.
///
/// Fails with `DegenerateRegion` for fewer than three distinct points or when
/// all points are collinear.
pub fn convex_hull(points: &[Point]) -> Result<Vec<Point>, RegionError> {
    let mut pts = points.to_vec();
    pts.sort_unstable();
    pts.dedup();
    if pts.len() < 3 {
        return Err(RegionError::DegenerateRegion("fewer than 3 distinct points"));
    }

    let mut lower: Vec<Point> = Vec::with_capacity(pts.len());
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<Point> = Vec::with_capacity(pts.len());
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0 {
            upper.pop();
        }
        upper.push(p);
    }

    // Last point of each chain is the first point of the other.
    lower.pop();
    upper.pop();
    lower.extend(upper);

    if lower.len() < 3 {
        return Err(RegionError::DegenerateRegion("points are collinear"));
    }
    Ok(lower)
}

/// Sort vertices by ascending angle around their centroid, ties by distance.
///
/// With image coordinates (y down) ascending angle runs clockwise on screen.
/// For the vertices of a convex hull the result is a simple polygon no matter
/// what order they arrived in.
pub fn order_by_angle(points: &mut [Point]) {
    if points.is_empty() {
        return;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;

    let key = |p: &Point| {
        let dx = p.x as f64 - cx;
        let dy = p.y as f64 - cy;
        (dy.atan2(dx).rem_euclid(TAU), dx.hypot(dy))
    };
    points.sort_by(|a, b| {
        let (angle_a, radius_a) = key(a);
        let (angle_b, radius_b) = key(b);
        angle_a
            .total_cmp(&angle_b)
            .then_with(|| radius_a.partial_cmp(&radius_b).unwrap_or(Ordering::Equal))
    });
}

/// Z component of `(a - o) x (b - o)`. Positive for a counter-clockwise turn
/// in y-up coordinates.
fn cross(o: Point, a: Point, b: Point) -> i64 {
    let (ox, oy) = (o.x as i64, o.y as i64);
    (a.x as i64 - ox) * (b.y as i64 - oy) - (a.y as i64 - oy) * (b.x as i64 - ox)
}
