//! Producers of [`CameraFrame`]s for the replay loop.

use depthfuse::CameraFrame;
use glam::{Mat3, Mat4};

mod recorded;
mod synthetic;

pub use recorded::RecordedSource;
pub use synthetic::{SyntheticOptions, SyntheticSource};

/// A stream of camera frames. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<CameraFrame>>;

    /// Frames left, when known up front.
    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// Perspective projection matching a pinhole camera of `width` x `height`.
pub(crate) fn projection_from_intrinsics(intrinsics: Mat3, width: f32, height: f32) -> Mat4 {
    let fy = intrinsics.y_axis.y;
    let fovy = 2.0 * (0.5 * height / fy).atan();
    Mat4::perspective_rh(fovy, width / height, 0.001, 1000.0)
}
