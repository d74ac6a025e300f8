//! Region anonymization engine.
//!
//! One region of one frame flows through:
//!
//! 1. `points`: landmark subset → pixel-space point cloud
//! 2. `mask`: point cloud → bounding rect + filled convex-hull mask (via `hull`)
//! 3. `pixelate`: block-mean pixelation of the cropped bounding rect
//! 4. `composite`: masked pixels written back into the frame
//!
//! Pixels outside the mask are never modified.

pub mod composite;
pub mod hull;
pub mod mask;
pub mod pixelate;
pub mod points;

use thiserror::Error;

use crate::frame::{Frame, Rect};
use crate::landmarks::{LandmarkKind, LandmarkSet, FACE_LANDMARK_COUNT};

pub use composite::composite;
pub use hull::{convex_hull, order_by_angle};
pub use mask::{mask, Mask};
pub use pixelate::pixelate;
pub use points::{build_points, Point, PointCloud};

/// Pose landmarks outlining the torso: left/right shoulder, right/left hip.
pub const SHIRT_LANDMARKS: [usize; 4] = [11, 12, 24, 23];
pub const DEFAULT_SHIRT_BLOCKS: u32 = 20;
pub const DEFAULT_FACE_BLOCKS: u32 = 10;

/// Region-local failures. All of them mean "leave this region alone for this
/// frame"; none of them end the stream.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("landmark {index} not present (set has {len} landmarks)")]
    MissingLandmark { index: usize, len: usize },
    #[error("degenerate region: {0}")]
    DegenerateRegion(&'static str),
    #[error("pixelation block count must be greater than zero")]
    InvalidBlocks,
}

/// Which landmarks outline a region and how coarse its pixelation is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionSpec {
    pub name: &'static str,
    pub source: LandmarkKind,
    pub indices: Vec<usize>,
    pub blocks: u32,
}

impl RegionSpec {
    /// Torso quadrilateral from the pose model, hides shirt logos.
    pub fn shirt(blocks: u32) -> Self {
        Self {
            name: "shirt",
            source: LandmarkKind::Pose,
            indices: SHIRT_LANDMARKS.to_vec(),
            blocks,
        }
    }

    /// Every face mesh landmark; the hull is the face outline.
    pub fn face(blocks: u32) -> Self {
        Self {
            name: "face",
            source: LandmarkKind::Face,
            indices: (0..FACE_LANDMARK_COUNT).collect(),
            blocks,
        }
    }
}

/// Pixelate the hull of `spec`'s landmarks in place. Returns the bounding rect
/// that was touched.
pub fn anonymize_region(
    frame: &mut Frame,
    landmarks: &LandmarkSet,
    spec: &RegionSpec,
) -> Result<Rect, RegionError> {
    if spec.blocks == 0 {
        return Err(RegionError::InvalidBlocks);
    }
    let cloud = build_points(landmarks, &spec.indices, frame.dimensions())?;
    let (rect, region_mask) = mask(&cloud)?;
    let mut patch = frame
        .crop(rect)
        .ok_or(RegionError::DegenerateRegion("bounding rect outside frame"))?;
    pixelate(&mut patch, spec.blocks)?;
    composite(frame, rect, &patch, &region_mask);
    Ok(rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Landmark;

    fn square_landmarks() -> LandmarkSet {
        // (20,20) (80,20) (80,80) (20,80) on a 100x100 frame.
        LandmarkSet::new(vec![
            Landmark::new(0.2, 0.2),
            Landmark::new(0.8, 0.2),
            Landmark::new(0.8, 0.8),
            Landmark::new(0.2, 0.8),
        ])
    }

    fn square_spec(blocks: u32) -> RegionSpec {
        RegionSpec {
            name: "square",
            source: LandmarkKind::Pose,
            indices: vec![0, 1, 2, 3],
            blocks,
        }
    }

    #[test]
    fn shirt_and_face_specs() {
        let shirt = RegionSpec::shirt(DEFAULT_SHIRT_BLOCKS);
        assert_eq!(shirt.indices, vec![11, 12, 24, 23]);
        assert_eq!(shirt.blocks, 20);
        let face = RegionSpec::face(DEFAULT_FACE_BLOCKS);
        assert_eq!(face.indices.len(), 468);
        assert_eq!(face.source, LandmarkKind::Face);
    }

    #[test]
    fn square_region_pixelates_inside_only() {
        // Uniform square on a gradient background.
        let original = Frame::from_fn(100, 100, |x, y| {
            if (20..=80).contains(&x) && (20..=80).contains(&y) {
                [200, 100, 50]
            } else {
                [x as u8, y as u8, 7]
            }
        });
        let mut frame = Frame::new(original.as_bytes().to_vec(), 100, 100).unwrap();

        let rect = anonymize_region(&mut frame, &square_landmarks(), &square_spec(4)).unwrap();
        assert_eq!(rect, Rect::new(20, 20, 61, 61));

        for y in 0..100 {
            for x in 0..100 {
                if rect.contains(x, y) {
                    assert_eq!(frame.pixel(x, y), [200, 100, 50], "inside ({x}, {y})");
                } else {
                    assert_eq!(frame.pixel(x, y), original.pixel(x, y), "outside ({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn square_region_uses_block_means() {
        let original = Frame::from_fn(100, 100, |x, y| [x as u8, y as u8, 0]);
        let mut frame = Frame::new(original.as_bytes().to_vec(), 100, 100).unwrap();
        anonymize_region(&mut frame, &square_landmarks(), &square_spec(4)).unwrap();

        // 61 px split into 4: boundaries 0, 15, 30, 45, 61 (local). First cell spans
        // x 20..35, mean x = 27, mean y = 27.
        assert_eq!(frame.pixel(20, 20), [27, 27, 0]);
        assert_eq!(frame.pixel(34, 34), [27, 27, 0]);
        // Last cell spans local 45..61 => x 65..81, mean = 72.5 → 73.
        assert_eq!(frame.pixel(80, 80), [73, 73, 0]);
        assert_eq!(frame.pixel(81, 81), original.pixel(81, 81));
    }

    #[test]
    fn missing_landmark_leaves_frame_untouched() {
        let mut frame = Frame::from_fn(10, 10, |x, y| [x as u8, y as u8, 1]);
        let empty = LandmarkSet::default();
        let err = anonymize_region(&mut frame, &empty, &RegionSpec::shirt(20)).unwrap_err();
        assert_eq!(err, RegionError::MissingLandmark { index: 11, len: 0 });
        assert_eq!(frame.pixel(5, 5), [5, 5, 1]);
    }

    #[test]
    fn zero_blocks_rejected() {
        let mut frame = Frame::filled(100, 100, [0, 0, 0]);
        assert_eq!(
            anonymize_region(&mut frame, &square_landmarks(), &square_spec(0)),
            Err(RegionError::InvalidBlocks)
        );
    }
}
