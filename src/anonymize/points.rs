use crate::anonymize::RegionError;
use crate::frame::Rect;
use crate::landmarks::LandmarkSet;

/// Integer pixel coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Landmarks of one region in pixel space. Never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointCloud {
    points: Vec<Point>,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> Option<Self> {
        if points.is_empty() {
            None
        } else {
            Some(Self { points })
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Tightest rect containing every point (inclusive of the extreme pixels).
    /// Points are assumed non-negative, which `build_points` guarantees.
    pub fn bounding_rect(&self) -> Rect {
        let (mut min_x, mut min_y) = (i32::MAX, i32::MAX);
        let (mut max_x, mut max_y) = (i32::MIN, i32::MIN);
        for p in &self.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Rect::new(
            min_x.max(0) as u32,
            min_y.max(0) as u32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        )
    }
}

/// Scale the landmarks at `indices` to a `width` x `height` frame.
///
/// Coordinates are truncated toward zero and clamped into the frame, since
/// models report points slightly past the edge when a subject is cut off.
pub fn build_points(
    landmarks: &LandmarkSet,
    indices: &[usize],
    (width, height): (u32, u32),
) -> Result<PointCloud, RegionError> {
    if width == 0 || height == 0 {
        return Err(RegionError::DegenerateRegion("empty frame"));
    }
    let max_x = (width - 1) as i64;
    let max_y = (height - 1) as i64;

    let mut points = Vec::with_capacity(indices.len());
    for &index in indices {
        let lm = landmarks.get(index).ok_or(RegionError::MissingLandmark {
            index,
            len: landmarks.len(),
        })?;
        let x = (lm.x as f64 * width as f64) as i64;
        let y = (lm.y as f64 * height as f64) as i64;
        points.push(Point::new(
            x.clamp(0, max_x) as i32,
            y.clamp(0, max_y) as i32,
        ));
    }
    PointCloud::new(points).ok_or(RegionError::DegenerateRegion("no landmark indices"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Landmark;

    fn set(coords: &[(f32, f32)]) -> LandmarkSet {
        coords.iter().map(|&(x, y)| Landmark::new(x, y)).collect()
    }

    #[test]
    fn scales_and_truncates() {
        let lms = set(&[(0.0, 0.0), (0.25, 0.5), (0.999, 0.999)]);
        let cloud = build_points(&lms, &[1, 2], (200, 100)).unwrap();
        assert_eq!(cloud.points(), &[Point::new(50, 50), Point::new(199, 99)]);
    }

    #[test]
    fn out_of_range_index_is_missing_landmark() {
        let lms = set(&[(0.1, 0.1)]);
        assert_eq!(
            build_points(&lms, &[0, 5], (10, 10)),
            Err(RegionError::MissingLandmark { index: 5, len: 1 })
        );
    }

    #[test]
    fn points_past_the_edge_are_clamped() {
        let lms = set(&[(-0.2, 1.4), (1.0, 1.0)]);
        let cloud = build_points(&lms, &[0, 1], (50, 40)).unwrap();
        assert_eq!(cloud.points(), &[Point::new(0, 39), Point::new(49, 39)]);
    }

    #[test]
    fn bounding_rect_contains_every_point() {
        let lms = set(&[(0.21, 0.33), (0.77, 0.12), (0.5, 0.91), (0.05, 0.6)]);
        let cloud = build_points(&lms, &[0, 1, 2, 3], (640, 480)).unwrap();
        let rect = cloud.bounding_rect();
        for p in cloud.points() {
            assert!(rect.contains(p.x as u32, p.y as u32), "{p:?} outside {rect:?}");
        }
        assert_eq!(rect, Rect::new(32, 57, 461, 380));
    }
}
