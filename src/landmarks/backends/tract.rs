#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::frame::{Frame, Rect};
use crate::landmarks::backend::LandmarkBackend;
use crate::landmarks::result::{
    Landmark, LandmarkKind, LandmarkResult, LandmarkSet, FACE_LANDMARK_COUNT, POSE_LANDMARK_COUNT,
};

/// Input tensor layout expected by a landmark model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, H, W, 3]` (models converted from TFLite).
    Nhwc,
    /// `[1, 3, H, W]`.
    Nchw,
}

/// Describes one landmark regression model.
///
/// Output 0 must hold `count * stride` floats where each landmark starts with
/// `x, y` in model input pixels. Output 1, when present, is a presence logit.
#[derive(Clone, Debug)]
pub struct TractModelConfig {
    pub path: PathBuf,
    pub input_size: u32,
    pub layout: TensorLayout,
    pub count: usize,
    pub stride: usize,
}

impl TractModelConfig {
    /// Face mesh: 192x192 input, 468 landmarks of (x, y, z).
    pub fn face_mesh<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            input_size: 192,
            layout: TensorLayout::Nhwc,
            count: FACE_LANDMARK_COUNT,
            stride: 3,
        }
    }

    /// Full-body pose landmarks: 256x256 input, 39 rows of 5 values, the first 33 are body points.
    pub fn pose_landmarks<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            input_size: 256,
            layout: TensorLayout::Nhwc,
            count: POSE_LANDMARK_COUNT,
            stride: 5,
        }
    }
}

struct LoadedModel {
    config: TractModelConfig,
    plan: TypedRunnableModel<TypedModel>,
}

impl LoadedModel {
    fn load(config: TractModelConfig) -> Result<Self> {
        let size = config.input_size as usize;
        let shape = match config.layout {
            TensorLayout::Nhwc => tvec!(1, size, size, 3),
            TensorLayout::Nchw => tvec!(1, 3, size, size),
        };
        let plan = tract_onnx::onnx()
            .model_for_path(&config.path)
            .with_context(|| {
                format!("failed to load ONNX model from {}", config.path.display())
            })?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Self { config, plan })
    }

    fn build_input(&self, image: &RgbImage) -> Result<Tensor> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let size = size as usize;
        let tensor = match self.config.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
                    resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
                })
                .into_tensor()
            }
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
                    resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
                })
                .into_tensor()
            }
        };
        Ok(tensor)
    }

    /// Landmarks normalized to `image`. Returns `None` when the presence
    /// score is below `min_confidence`.
    fn run(&self, image: &RgbImage, min_confidence: f32) -> Result<Option<LandmarkSet>> {
        let input = self.build_input(image)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        if let Some(presence) = outputs.get(1) {
            let logits = presence
                .to_array_view::<f32>()
                .context("presence tensor was not f32")?;
            let score = logits.iter().next().map_or(0.0, |v| sigmoid(*v));
            if score < min_confidence {
                return Ok(None);
            }
        }

        let coords = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?
            .to_array_view::<f32>()
            .context("landmark tensor was not f32")?;
        let flat: Vec<f32> = coords.iter().copied().collect();
        let needed = self.config.count * self.config.stride;
        if flat.len() < needed {
            return Err(anyhow!(
                "expected at least {} landmark values, model produced {}",
                needed,
                flat.len()
            ));
        }

        let scale = self.config.input_size as f32;
        Ok(Some(
            flat.chunks(self.config.stride)
                .take(self.config.count)
                .map(|row| Landmark::new(row[0] / scale, row[1] / scale))
                .collect(),
        ))
    }
}

/// Tract-based backend for ONNX landmark models.
///
/// The pose model sees the whole frame. When both models are loaded the face
/// mesh runs on a square crop around the pose head keypoints, and its
/// landmarks are mapped back to frame coordinates. With no pose model the face
/// mesh falls back to the whole frame, which only works for close-up footage.
pub struct TractBackend {
    pose: Option<LoadedModel>,
    face: Option<LoadedModel>,
    min_confidence: f32,
}

impl TractBackend {
    pub fn new() -> Self {
        Self {
            pose: None,
            face: None,
            min_confidence: 0.2,
        }
    }

    pub fn with_pose_model(mut self, config: TractModelConfig) -> Result<Self> {
        self.pose = Some(LoadedModel::load(config)?);
        Ok(self)
    }

    pub fn with_face_model(mut self, config: TractModelConfig) -> Result<Self> {
        self.face = Some(LoadedModel::load(config)?);
        Ok(self)
    }

    /// Override the default presence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.min_confidence = threshold;
        self
    }
}

impl Default for TractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, kind: LandmarkKind) -> bool {
        match kind {
            LandmarkKind::Pose => self.pose.is_some(),
            LandmarkKind::Face => self.face.is_some(),
        }
    }

    fn detect(&mut self, frame: &Frame) -> Result<LandmarkResult> {
        let rgb = RgbImage::from_raw(frame.width, frame.height, frame.as_bytes().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let pose = match &self.pose {
            Some(model) => model.run(&rgb, self.min_confidence)?,
            None => None,
        };
        let face = match (&self.face, &self.pose, &pose) {
            (None, _, _) => None,
            (Some(model), None, _) => model.run(&rgb, self.min_confidence)?,
            (Some(model), Some(_), Some(pose)) => {
                match face_roi(pose, frame.width, frame.height) {
                    Some(roi) => {
                        let crop = image::imageops::crop_imm(&rgb, roi.x, roi.y, roi.w, roi.h)
                            .to_image();
                        model
                            .run(&crop, self.min_confidence)?
                            .map(|set| to_frame_coords(&set, roi, frame.width, frame.height))
                    }
                    None => None,
                }
            }
            // Nobody in frame.
            (Some(_), Some(_), None) => None,
        };
        Ok(LandmarkResult { pose, face })
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(64, 64, [0, 0, 0]);
        self.detect(&blank).map(|_| ())
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Pose keypoints 0..=10: nose, eyes, ears and mouth corners.
const POSE_HEAD_POINTS: std::ops::RangeInclusive<usize> = 0..=10;
/// Crop side as a multiple of the head keypoint extent.
const FACE_ROI_SCALE: f32 = 2.0;
const MIN_FACE_ROI_PX: f32 = 16.0;

/// Square crop (clipped to the frame) centred on the pose head keypoints.
fn face_roi(pose: &LandmarkSet, width: u32, height: u32) -> Option<Rect> {
    let (w, h) = (width as f32, height as f32);
    let mut head = POSE_HEAD_POINTS
        .filter_map(|i| pose.get(i))
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .map(|p| (p.x * w, p.y * h))
        .peekable();
    head.peek()?;

    let (mut min_x, mut min_y, mut max_x, mut max_y) =
        (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY);
    for (x, y) in head {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let side = ((max_x - min_x).max(max_y - min_y) * FACE_ROI_SCALE).max(MIN_FACE_ROI_PX);
    let (cx, cy) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);

    let x0 = (cx - side / 2.0).floor().clamp(0.0, w);
    let y0 = (cy - side / 2.0).floor().clamp(0.0, h);
    let x1 = (cx + side / 2.0).ceil().clamp(0.0, w);
    let y1 = (cy + side / 2.0).ceil().clamp(0.0, h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    ))
}

/// Map landmarks normalized to `roi` back to frame-normalized coordinates.
fn to_frame_coords(set: &LandmarkSet, roi: Rect, width: u32, height: u32) -> LandmarkSet {
    set.iter()
        .map(|p| {
            Landmark::new(
                (roi.x as f32 + p.x * roi.w as f32) / width as f32,
                (roi.y as f32 + p.y * roi.h as f32) / height as f32,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pose whose head keypoints cycle through `head`; body points sit low.
    fn pose_with_head(head: &[(f32, f32)]) -> LandmarkSet {
        (0..POSE_LANDMARK_COUNT)
            .map(|i| {
                if POSE_HEAD_POINTS.contains(&i) {
                    let (x, y) = head[i % head.len()];
                    Landmark::new(x, y)
                } else {
                    Landmark::new(0.5, 0.9)
                }
            })
            .collect()
    }

    #[test]
    fn face_roi_is_square_around_head() {
        // Head spans 64x32 px centred on (128, 80).
        let pose = pose_with_head(&[(0.375, 0.25), (0.625, 0.375)]);
        assert_eq!(face_roi(&pose, 256, 256), Some(Rect::new(64, 16, 128, 128)));
    }

    #[test]
    fn face_roi_is_clipped_at_frame_edge() {
        let pose = pose_with_head(&[(0.0, 0.0), (0.0625, 0.0625)]);
        assert_eq!(face_roi(&pose, 256, 256), Some(Rect::new(0, 0, 24, 24)));
        assert!(face_roi(&LandmarkSet::default(), 256, 256).is_none());
    }

    #[test]
    fn crop_landmarks_map_back_to_frame() {
        let roi = Rect::new(100, 50, 80, 40);
        let set = LandmarkSet::new(vec![Landmark::new(0.0, 0.0), Landmark::new(0.5, 1.0)]);
        let mapped = to_frame_coords(&set, roi, 200, 100);
        assert_eq!(mapped.get(0), Some(Landmark::new(0.5, 0.5)));
        assert_eq!(mapped.get(1), Some(Landmark::new(0.7, 0.9)));
    }
}
