use anyhow::Result;

use crate::frame::Frame;
use crate::landmarks::result::{LandmarkKind, LandmarkResult};

/// Landmark backend trait.
///
/// Implementations receive one RGB frame per call and return normalized
/// landmarks. From the streamer's point of view a call is a pure function of
/// the frame; any model state is loaded up front in the constructor.
///
/// An `Err` is treated by the streamer as "no subject detected" for that frame.
pub trait LandmarkBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can produce landmarks of `kind`.
    fn supports(&self, kind: LandmarkKind) -> bool;

    /// Run landmark estimation on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<LandmarkResult>;

    /// Optional warm-up hook, called once before streaming starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: LandmarkBackend + ?Sized> LandmarkBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, kind: LandmarkKind) -> bool {
        (**self).supports(kind)
    }

    fn detect(&mut self, frame: &Frame) -> Result<LandmarkResult> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
