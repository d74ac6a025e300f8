/// Pose model landmark count (shoulders are 11/12, hips 23/24).
pub const POSE_LANDMARK_COUNT: usize = 33;

/// Face mesh landmark count.
pub const FACE_LANDMARK_COUNT: usize = 468;

/// Normalized keypoint. `x`/`y` are fractions of frame width/height and are
/// nominally in `0..=1`, though models may extrapolate past the frame edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Ordered landmark sequence for one subject. May be empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.points.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.points.iter()
    }
}

impl FromIterator<Landmark> for LandmarkSet {
    fn from_iter<I: IntoIterator<Item = Landmark>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LandmarkKind {
    Pose,
    Face,
}

/// Per-frame backend output. `None` means the subject part was not detected.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkResult {
    pub pose: Option<LandmarkSet>,
    pub face: Option<LandmarkSet>,
}

impl LandmarkResult {
    pub fn get(&self, kind: LandmarkKind) -> Option<&LandmarkSet> {
        match kind {
            LandmarkKind::Pose => self.pose.as_ref(),
            LandmarkKind::Face => self.face.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pose.as_ref().map_or(true, LandmarkSet::is_empty)
            && self.face.as_ref().map_or(true, LandmarkSet::is_empty)
    }
}
