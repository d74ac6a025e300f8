//! Landmark capability.
//!
//! The landmark model is an external collaborator: the streamer only sees the
//! `LandmarkBackend` trait. A backend is constructed once (model load) and
//! injected into the streamer, which calls it once per frame.

mod backend;
mod backends;
mod result;

pub use backend::LandmarkBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TensorLayout, TractBackend, TractModelConfig};
pub use result::{
    Landmark, LandmarkKind, LandmarkResult, LandmarkSet, FACE_LANDMARK_COUNT,
    POSE_LANDMARK_COUNT,
};
