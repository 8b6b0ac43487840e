//! depthfuse: streaming point-cloud accumulation from depth cameras.
//!
//! - Each frame, a staggered grid of camera pixels is back-projected into
//!   world space using the frame's inverse intrinsics, device transform and
//!   inverse view matrix.
//! - Samples under a confidence threshold are dropped; samples with invalid
//!   depth or coordinates are skipped.
//! - Admitted particles land in a fixed-capacity ring whose write cursor wraps,
//!   so the newest `capacity` points are kept.
//! - After a frame, ring metadata and transforms are exported together as the
//!   renderer's uniforms.

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod grid;
pub mod motion;
pub mod particle;
pub mod ring;
pub mod transform;
pub mod uniforms;
pub mod unproject;

// Re-export commonly used types for convenience.
pub use self::config::FusionConfig;
pub use self::engine::{
    FrameBudget, FrameOutcome, FrameReport, FusionEngine, FusionStats, SkipReason,
};
pub use self::error::{FusionError, Result};
pub use self::frame::{CameraFrame, ColorImage, ConfidenceMap, DepthMap};
pub use self::particle::Particle;
pub use self::ring::{PointRingBuffer, RingSnapshot, RingWriter};
pub use self::transform::{CameraTransforms, DeviceOrientation, TransformContext};
pub use self::uniforms::{PointCloudUniformsStd140, RenderUniforms};
pub use self::unproject::{Admission, Sample, Unprojector};
