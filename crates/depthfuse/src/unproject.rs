//! Per-pixel back-projection into world space and confidence admission.

use crate::error::{FusionError, Result, SampleFault};
use crate::frame::CameraFrame;
use crate::particle::Particle;
use crate::transform::CameraTransforms;
use glam::{Vec2, Vec3};

/// One pixel's worth of sensor readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Camera image coordinates in pixels.
    pub pixel: Vec2,
    /// Meters along the optical axis.
    pub depth: f32,
    pub color: Vec3,
    /// Normalized confidence in [0, 1].
    pub confidence: f32,
}

impl Sample {
    /// Reads depth, color and confidence under `pixel` from a frame.
    ///
    /// Out-of-image pixels sample the nearest edge texel; the unprojector
    /// rejects them afterwards.
    #[inline]
    pub fn from_frame(frame: &CameraFrame, pixel: Vec2) -> Self {
        let uv = pixel / frame.resolution;
        Self {
            pixel,
            depth: frame.depth.sample(uv),
            color: frame.color.sample(uv),
            confidence: frame.confidence.sample(uv),
        }
    }
}

/// Result of running a sample through admission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Accepted(Particle),
    /// Geometrically valid but under the confidence threshold.
    BelowThreshold,
}

/// Back-projects a pixel at `depth` into world space.
///
/// `world = local_to_world · (K⁻¹ · (x, y, 1) · depth, 1)`, divided by w.
pub fn unproject_point(pixel: Vec2, depth: f32, transforms: &CameraTransforms) -> Result<Vec3> {
    // Written so that NaN fails too.
    if !(depth > 0.0) {
        return Err(SampleFault::NonPositiveDepth(depth).into());
    }

    let res = transforms.resolution();
    let in_image = pixel.x >= 0.0 && pixel.y >= 0.0 && pixel.x < res.x && pixel.y < res.y;
    if !in_image {
        return Err(SampleFault::PixelOutOfRange {
            x: pixel.x,
            y: pixel.y,
        }
        .into());
    }

    let local = transforms.intrinsics_inverse() * pixel.extend(1.0) * depth;
    let world = transforms.local_to_world() * local.extend(1.0);
    let position = world.truncate() / world.w;
    if !position.is_finite() {
        return Err(SampleFault::NonFinitePosition.into());
    }

    Ok(position)
}

/// Turns samples into particles, dropping those below a confidence threshold.
#[derive(Debug, Clone, Copy)]
pub struct Unprojector {
    threshold: f32,
}

impl Unprojector {
    pub fn new(threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FusionError::InvalidConfig(format!(
                "confidence threshold {threshold} outside [0, 1]"
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Validates and back-projects `sample`, then applies the threshold.
    ///
    /// Invalid geometry is an error even when confidence is low.
    pub fn unproject(&self, sample: &Sample, transforms: &CameraTransforms) -> Result<Admission> {
        let position = unproject_point(sample.pixel, sample.depth, transforms)?;

        if sample.confidence < self.threshold {
            return Ok(Admission::BelowThreshold);
        }

        Ok(Admission::Accepted(Particle::new(
            position,
            sample.color,
            sample.confidence,
        )))
    }
}
