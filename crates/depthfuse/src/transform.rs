//! Per-frame camera state shared by unprojection and rendering.
//!
//! Frame convention used throughout the crate:
//!
//! ```text
//! sensor  = K⁻¹ · (x, y, 1) · depth              (+x right, +y down, +z forward)
//! world   = V⁻¹ · D · (sensor, 1),  then ÷ w
//! ```
//!
//! `D` (`device_transform`) maps the sensor frame into the display-oriented
//! camera frame the view matrix `V` was built for. `V⁻¹` maps camera to world.

use crate::error::{FusionError, MatrixKind, Result};
use glam::{Mat3, Mat4, Vec2, Vec3};

/// Matrices with an absolute determinant below this are treated as singular.
pub const MIN_DETERMINANT: f32 = 1e-6;

/// Screen orientation the view matrix was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceOrientation {
    /// Sensor-native orientation; no rotation.
    LandscapeRight,
    #[default]
    Portrait,
    LandscapeLeft,
    PortraitUpsideDown,
}

impl DeviceOrientation {
    /// Rotation from the sensor's native landscape frame to this orientation.
    pub fn angle_rad(self) -> f32 {
        let deg: f32 = match self {
            DeviceOrientation::LandscapeRight => 0.0,
            DeviceOrientation::Portrait => 90.0,
            DeviceOrientation::LandscapeLeft => 180.0,
            DeviceOrientation::PortraitUpsideDown => 270.0,
        };
        deg.to_radians()
    }

    /// Builds `flipYZ · Rz(angle)`.
    ///
    /// The flip converts the image-style sensor frame (y down, z forward) to
    /// the right-handed camera frame (y up, z backward) the view matrix uses.
    pub fn device_transform(self) -> Mat4 {
        let flip_yz = Mat4::from_scale(Vec3::new(1.0, -1.0, -1.0));
        flip_yz * Mat4::from_rotation_z(self.angle_rad())
    }
}

/// Builds a pinhole intrinsics matrix (column-major, as the sensor reports it).
#[inline]
pub fn intrinsics_matrix(fx: f32, fy: f32, cx: f32, cy: f32) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(fx, 0.0, 0.0),
        Vec3::new(0.0, fy, 0.0),
        Vec3::new(cx, cy, 1.0),
    )
}

/// A consistent set of per-frame matrices.
///
/// Only [`TransformContext::update`] constructs one, so `view_inverse` is
/// always the inverse of `view` from the same frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTransforms {
    projection: Mat4,
    view: Mat4,
    view_inverse: Mat4,
    device_transform: Mat4,
    intrinsics_inverse: Mat3,
    resolution: Vec2,
    local_to_world: Mat4,
}

impl CameraTransforms {
    #[inline]
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        self.view
    }

    #[inline]
    pub fn view_inverse(&self) -> Mat4 {
        self.view_inverse
    }

    #[inline]
    pub fn device_transform(&self) -> Mat4 {
        self.device_transform
    }

    #[inline]
    pub fn intrinsics_inverse(&self) -> Mat3 {
        self.intrinsics_inverse
    }

    /// Camera image size in pixels.
    #[inline]
    pub fn resolution(&self) -> Vec2 {
        self.resolution
    }

    /// `view_inverse * device_transform`, precomputed once per frame.
    #[inline]
    pub fn local_to_world(&self) -> Mat4 {
        self.local_to_world
    }

    /// Camera-to-world pose.
    #[inline]
    pub fn camera_pose(&self) -> Mat4 {
        self.view_inverse
    }
}

/// Holds the transforms of the most recent successfully updated frame.
#[derive(Debug, Default)]
pub struct TransformContext {
    current: Option<CameraTransforms>,
    updates: u64,
}

impl TransformContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored transforms with those of a new frame.
    ///
    /// Both inverses are computed before anything is stored; on failure the
    /// previous frame's state is left exactly as it was and the caller must not
    /// unproject this frame.
    pub fn update(
        &mut self,
        projection: Mat4,
        view: Mat4,
        device_transform: Mat4,
        intrinsics: Mat3,
        resolution: Vec2,
    ) -> Result<&CameraTransforms> {
        let view_det = view.determinant();
        if !view_det.is_finite() || view_det.abs() < MIN_DETERMINANT {
            return Err(FusionError::DegenerateTransform {
                matrix: MatrixKind::View,
                determinant: view_det,
            });
        }

        let intrinsics_det = intrinsics.determinant();
        if !intrinsics_det.is_finite() || intrinsics_det.abs() < MIN_DETERMINANT {
            return Err(FusionError::DegenerateTransform {
                matrix: MatrixKind::Intrinsics,
                determinant: intrinsics_det,
            });
        }

        let view_inverse = view.inverse();

        self.updates += 1;
        Ok(self.current.insert(CameraTransforms {
            projection,
            view,
            view_inverse,
            device_transform,
            intrinsics_inverse: intrinsics.inverse(),
            resolution,
            local_to_world: view_inverse * device_transform,
        }))
    }

    /// The latest valid transforms, or `NotInitialized` before the first one.
    pub fn current(&self) -> Result<&CameraTransforms> {
        self.current.as_ref().ok_or(FusionError::NotInitialized)
    }

    /// Number of successful updates this session.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}
