use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::landmarks::backend::LandmarkBackend;
use crate::landmarks::result::{
    Landmark, LandmarkKind, LandmarkResult, LandmarkSet, FACE_LANDMARK_COUNT, POSE_LANDMARK_COUNT,
};

/// Stub backend for tests and the demo binary.
///
/// Returns scripted results in order; once the script is exhausted the
/// fallback result is returned for every further frame. A `None` script entry
/// makes that call fail, which exercises the streamer's inference-error path.
pub struct StubBackend {
    script: VecDeque<Option<LandmarkResult>>,
    fallback: LandmarkResult,
    calls: u64,
}

impl StubBackend {
    /// Always return `result`.
    pub fn new(result: LandmarkResult) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: result,
            calls: 0,
        }
    }

    /// Return each scripted entry once, then `LandmarkResult::default()` (nothing detected).
    pub fn scripted(script: Vec<Option<LandmarkResult>>) -> Self {
        Self {
            script: script.into(),
            fallback: LandmarkResult::default(),
            calls: 0,
        }
    }

    /// A single subject centred in the frame: shoulders/hips for the pose
    /// model and an elliptical face outline for the face mesh.
    pub fn centered_subject() -> Self {
        Self::new(centered_subject_landmarks())
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(LandmarkResult::default())
    }
}

impl LandmarkBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, kind: LandmarkKind) -> bool {
        matches!(kind, LandmarkKind::Pose | LandmarkKind::Face)
    }

    fn detect(&mut self, _frame: &Frame) -> Result<LandmarkResult> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Some(result)) => Ok(result),
            Some(None) => Err(anyhow!("stub inference failure on call {}", self.calls)),
            None => Ok(self.fallback.clone()),
        }
    }
}

fn centered_subject_landmarks() -> LandmarkResult {
    let mut pose = vec![Landmark::new(0.5, 0.5); POSE_LANDMARK_COUNT];
    pose[11] = Landmark::new(0.62, 0.45);
    pose[12] = Landmark::new(0.38, 0.45);
    pose[23] = Landmark::new(0.58, 0.85);
    pose[24] = Landmark::new(0.42, 0.85);

    let face = (0..FACE_LANDMARK_COUNT)
        .map(|i| {
            let theta = i as f32 / FACE_LANDMARK_COUNT as f32 * std::f32::consts::TAU;
            Landmark::new(0.5 + 0.08 * theta.cos(), 0.25 + 0.11 * theta.sin())
        })
        .collect::<LandmarkSet>();

    LandmarkResult {
        pose: Some(LandmarkSet::new(pose)),
        face: Some(face),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_results_then_empty() {
        let frame = Frame::filled(4, 4, [0, 0, 0]);
        let detected = centered_subject_landmarks();
        let mut backend = StubBackend::scripted(vec![Some(detected.clone()), None]);

        assert_eq!(backend.detect(&frame).unwrap(), detected);
        assert!(backend.detect(&frame).is_err());
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn centered_subject_has_full_landmark_sets() {
        let frame = Frame::filled(4, 4, [0, 0, 0]);
        let mut backend = StubBackend::centered_subject();
        let result = backend.detect(&frame).unwrap();
        assert_eq!(result.pose.unwrap().len(), POSE_LANDMARK_COUNT);
        assert_eq!(result.face.unwrap().len(), FACE_LANDMARK_COUNT);
    }
}
