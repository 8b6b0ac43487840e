//! The accumulated point record, laid out for direct GPU upload.

use glam::Vec3;

/// One fused point in world space.
///
/// Must match the layout of `Particle` in the point shaders:
/// `{ position: vec3<f32>, color: vec3<f32>, confidence: f32 }`. A WGSL
/// `vec3<f32>` is 16-byte aligned, so `confidence` sits in the tail padding
/// of `color` and the record is 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default, PartialEq)]
pub struct Particle {
    /// World-space position, meters.
    pub position: [f32; 3],
    pub _pad0: f32,
    /// Linear RGB in [0, 1].
    pub color: [f32; 3],
    /// Normalized sensor confidence in [0, 1].
    pub confidence: f32,
}

const _: () = assert!(std::mem::size_of::<Particle>() == 32);

impl Particle {
    #[inline]
    pub fn new(position: Vec3, color: Vec3, confidence: f32) -> Self {
        Self {
            position: position.to_array(),
            _pad0: 0.0,
            color: color.to_array(),
            confidence,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    pub fn color(&self) -> Vec3 {
        Vec3::from_array(self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_packs_into_color_padding() {
        assert_eq!(std::mem::offset_of!(Particle, position), 0);
        assert_eq!(std::mem::offset_of!(Particle, color), 16);
        assert_eq!(std::mem::offset_of!(Particle, confidence), 28);
    }

    #[test]
    fn casts_to_gpu_bytes() {
        let p = Particle::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, 0.5);
        let bytes = bytemuck::bytes_of(&p);
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[28..32], &0.5f32.to_ne_bytes());
    }
}
