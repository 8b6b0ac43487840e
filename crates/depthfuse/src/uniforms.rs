//! Per-frame uniform export for the render stage.

use crate::error::Result;
use crate::ring::PointRingBuffer;
use crate::transform::{CameraTransforms, TransformContext};
use glam::Mat4;

/// Number of frames the renderer may have in flight at once.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Size of a uniform slot rounded to the 256-byte constant-buffer alignment.
#[inline]
pub const fn aligned_size(size: usize) -> usize {
    (size & !0xFF) + 0x100
}

/// Everything the renderer needs for one frame, captured together so the
/// cursor is never paired with another frame's transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderUniforms {
    pub capacity: usize,
    pub cursor: usize,
    pub live_count: usize,
    /// Count of successful transform updates. Changes only when the
    /// transforms do.
    pub frame: u64,
    pub transforms: CameraTransforms,
}

impl RenderUniforms {
    /// Packs the uniforms into their std140 GPU image.
    pub fn to_std140(&self) -> PointCloudUniformsStd140 {
        let t = &self.transforms;
        let k = t.intrinsics_inverse();
        PointCloudUniformsStd140 {
            max_point_count: self.capacity as u32,
            current_index: self.cursor as u32,
            live_count: self.live_count as u32,
            frame: self.frame as u32,
            projection: t.projection().to_cols_array_2d(),
            view: t.view().to_cols_array_2d(),
            view_inverse: t.view_inverse().to_cols_array_2d(),
            device_transform: t.device_transform().to_cols_array_2d(),
            intrinsics_inverse: [
                k.x_axis.extend(0.0).to_array(),
                k.y_axis.extend(0.0).to_array(),
                k.z_axis.extend(0.0).to_array(),
            ],
            camera_resolution: t.resolution().to_array(),
            _pad: [0.0; 2],
        }
    }

    /// `projection * view`, for the point pass.
    pub fn view_proj(&self) -> Mat4 {
        self.transforms.projection() * self.transforms.view()
    }
}

/// Bundles ring metadata with the current transforms.
///
/// Call once per frame after the frame's appends. Fails with a degenerate
/// transform error if no frame has produced valid transforms yet.
pub fn export(ring: &PointRingBuffer, ctx: &TransformContext) -> Result<RenderUniforms> {
    let transforms = *ctx.current()?;
    let snapshot = ring.snapshot();
    Ok(RenderUniforms {
        capacity: snapshot.capacity(),
        cursor: snapshot.cursor(),
        live_count: snapshot.live_count(),
        frame: ctx.updates(),
        transforms,
    })
}

/// std140 image of [`RenderUniforms`].
/// Must match the layout of `PointCloudUniforms` in the point shaders.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct PointCloudUniformsStd140 {
    pub max_point_count: u32,
    pub current_index: u32,
    pub live_count: u32,
    pub frame: u32,
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub view_inverse: [[f32; 4]; 4],
    pub device_transform: [[f32; 4]; 4],
    /// mat3x3 columns, each padded to 16 bytes.
    pub intrinsics_inverse: [[f32; 4]; 3],
    pub camera_resolution: [f32; 2],
    pub _pad: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<PointCloudUniformsStd140>() == 336);

/// Rotates through `MAX_FRAMES_IN_FLIGHT` uniform slots in one buffer so the
/// CPU never overwrites a slot the GPU may still be reading.
#[derive(Debug, Clone, Default)]
pub struct UniformSlots {
    index: usize,
}

impl UniformSlots {
    /// Byte stride between slots.
    pub const STRIDE: usize = aligned_size(std::mem::size_of::<PointCloudUniformsStd140>());
    /// Total buffer size for all slots.
    pub const BUFFER_SIZE: usize = Self::STRIDE * MAX_FRAMES_IN_FLIGHT;

    pub fn new() -> Self {
        Self::default()
    }

    /// Moves to the next slot and returns its byte offset.
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % MAX_FRAMES_IN_FLIGHT;
        self.offset()
    }

    pub fn offset(&self) -> usize {
        self.index * Self::STRIDE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FusionError;
    use crate::particle::Particle;
    use crate::transform::intrinsics_matrix;
    use glam::{Vec2, Vec3};

    fn ready_context() -> TransformContext {
        let mut ctx = TransformContext::new();
        ctx.update(
            Mat4::perspective_rh(1.0, 0.75, 0.001, 100.0),
            Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0)),
            Mat4::IDENTITY,
            intrinsics_matrix(400.0, 400.0, 320.0, 240.0),
            Vec2::new(640.0, 480.0),
        )
        .unwrap();
        ctx
    }

    #[test]
    fn export_before_first_update_is_degenerate() {
        let ring = PointRingBuffer::new(4).unwrap();
        let err = export(&ring, &TransformContext::new()).unwrap_err();
        assert!(matches!(err, FusionError::NotInitialized));
        assert!(err.is_degenerate());
    }

    #[test]
    fn export_pairs_cursor_with_current_transforms() {
        let mut ring = PointRingBuffer::new(4).unwrap();
        ring.extend(std::iter::repeat(Particle::default()).take(6));
        let ctx = ready_context();

        let u = export(&ring, &ctx).unwrap();
        assert_eq!(u.capacity, 4);
        assert_eq!(u.cursor, 2);
        assert_eq!(u.live_count, 4);
        assert_eq!(u.frame, 1);
        assert_eq!(u.transforms, *ctx.current().unwrap());
    }

    #[test]
    fn std140_image_carries_all_fields() {
        let mut ring = PointRingBuffer::new(10).unwrap();
        ring.append(Particle::default());
        let u = export(&ring, &ready_context()).unwrap();
        let gpu = u.to_std140();

        assert_eq!(gpu.max_point_count, 10);
        assert_eq!(gpu.current_index, 1);
        assert_eq!(gpu.live_count, 1);
        assert_eq!(gpu.camera_resolution, [640.0, 480.0]);
        assert!((gpu.view_inverse[3][2] - 1.0).abs() < 1e-6);
        assert_eq!(gpu.intrinsics_inverse[0][3], 0.0);
        assert!((gpu.intrinsics_inverse[0][0] - 1.0 / 400.0).abs() < 1e-7);

        let bytes = bytemuck::bytes_of(&gpu);
        assert_eq!(bytes.len(), 336);
    }

    #[test]
    fn slots_are_256_aligned_and_cycle() {
        assert_eq!(aligned_size(336), 512);
        assert_eq!(UniformSlots::STRIDE % 256, 0);

        let mut slots = UniformSlots::new();
        let offsets: Vec<_> = (0..4).map(|_| slots.advance()).collect();
        assert_eq!(offsets, vec![512, 1024, 0, 512]);
        assert_eq!(UniformSlots::BUFFER_SIZE, 1536);
    }
}
