//! Raw per-frame inputs handed over by the frame source.
//!
//! Maps may have different resolutions; they are co-registered with the camera
//! image and sampled by normalized texture coordinate `uv = pixel / resolution`
//! using nearest-neighbour lookup.

use crate::error::{FusionError, Result};
use glam::{Mat3, Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Sensor confidence levels as reported by the depth camera.
pub mod confidence {
    pub const LOW: u8 = 0;
    pub const MEDIUM: u8 = 1;
    pub const HIGH: u8 = 2;

    /// Maps a discrete level to [0, 1]. Levels above `HIGH` saturate.
    #[inline]
    pub fn normalize(level: u8) -> f32 {
        level.min(HIGH) as f32 / HIGH as f32
    }
}

#[inline(always)]
fn texel(uv: Vec2, width: u32, height: u32) -> usize {
    let ix = ((uv.x * width as f32) as usize).min(width.saturating_sub(1) as usize);
    let iy = ((uv.y * height as f32) as usize).min(height.saturating_sub(1) as usize);
    iy * width as usize + ix
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual || expected == 0 {
        return Err(FusionError::MalformedFrame {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Row-major depth in meters.
///
/// Deserialization goes through [`DepthMap::new`], so a decoded map always
/// holds `width * height` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDepthMap")]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct RawDepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl TryFrom<RawDepthMap> for DepthMap {
    type Error = FusionError;

    fn try_from(raw: RawDepthMap) -> Result<Self> {
        Self::new(raw.width, raw.height, raw.values)
    }
}

impl DepthMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        check_len("depth map", width as usize * height as usize, values.len())?;
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn sample(&self, uv: Vec2) -> f32 {
        self.values[texel(uv, self.width, self.height)]
    }
}

/// Row-major discrete confidence levels (see [`confidence`]).
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceMap {
    width: u32,
    height: u32,
    levels: Vec<u8>,
}

impl ConfidenceMap {
    pub fn new(width: u32, height: u32, levels: Vec<u8>) -> Result<Self> {
        check_len("confidence map", width as usize * height as usize, levels.len())?;
        Ok(Self {
            width,
            height,
            levels,
        })
    }

    /// A 1x1 map reporting `level` everywhere.
    pub fn uniform(level: u8) -> Self {
        Self {
            width: 1,
            height: 1,
            levels: vec![level],
        }
    }

    /// Normalized confidence at `uv`.
    #[inline]
    pub fn sample(&self, uv: Vec2) -> f32 {
        confidence::normalize(self.levels[texel(uv, self.width, self.height)])
    }
}

/// Packed 8-bit RGB, row-major. Built by [`ColorImage::rgb8`].
#[derive(Debug, Clone, PartialEq)]
pub struct Rgb8Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Bi-planar full-range YCbCr 4:2:0: a full-resolution luma plane plus a
/// half-resolution plane of interleaved (Cb, Cr) pairs. Built by
/// [`ColorImage::ycbcr`].
#[derive(Debug, Clone, PartialEq)]
pub struct YCbCrImage {
    width: u32,
    height: u32,
    luma: Vec<u8>,
    chroma: Vec<u8>,
}

/// Camera color image.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorImage {
    Rgb8(Rgb8Image),
    YCbCr(YCbCrImage),
    /// One color everywhere; used when the source has no camera image.
    Solid(Vec3),
}

impl ColorImage {
    pub fn rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        check_len("rgb image", width as usize * height as usize * 3, data.len())?;
        Ok(ColorImage::Rgb8(Rgb8Image {
            width,
            height,
            data,
        }))
    }

    pub fn ycbcr(width: u32, height: u32, luma: Vec<u8>, chroma: Vec<u8>) -> Result<Self> {
        check_len("luma plane", width as usize * height as usize, luma.len())?;
        let (cw, ch) = Self::chroma_dims(width, height);
        check_len("chroma plane", cw as usize * ch as usize * 2, chroma.len())?;
        Ok(ColorImage::YCbCr(YCbCrImage {
            width,
            height,
            luma,
            chroma,
        }))
    }

    /// Size of the subsampled chroma plane for a `width` x `height` image.
    #[inline]
    pub fn chroma_dims(width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(2), height.div_ceil(2))
    }

    /// Linear RGB in [0, 1] at `uv`.
    pub fn sample(&self, uv: Vec2) -> Vec3 {
        match self {
            ColorImage::Rgb8(Rgb8Image {
                width,
                height,
                data,
            }) => {
                let i = texel(uv, *width, *height) * 3;
                Vec3::new(data[i] as f32, data[i + 1] as f32, data[i + 2] as f32) / 255.0
            }
            ColorImage::YCbCr(YCbCrImage {
                width,
                height,
                luma,
                chroma,
            }) => {
                let y = luma[texel(uv, *width, *height)] as f32 / 255.0;
                let (cw, ch) = Self::chroma_dims(*width, *height);
                let c = texel(uv, cw, ch) * 2;
                let cb = chroma[c] as f32 / 255.0;
                let cr = chroma[c + 1] as f32 / 255.0;
                ycbcr_to_rgb(y, cb, cr)
            }
            ColorImage::Solid(c) => *c,
        }
    }
}

/// Full-range BT.601 conversion on [0, 1] components.
#[inline]
pub fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> Vec3 {
    Vec3::new(
        y + 1.402 * cr - 0.701,
        y - 0.3441 * cb - 0.7141 * cr + 0.5291,
        y + 1.772 * cb - 0.886,
    )
    .clamp(Vec3::ZERO, Vec3::ONE)
}

/// Inverse of [`ycbcr_to_rgb`], for producing test and synthetic imagery.
#[inline]
pub fn rgb_to_ycbcr(rgb: Vec3) -> Vec3 {
    let y = 0.299 * rgb.x + 0.587 * rgb.y + 0.114 * rgb.z;
    let cb = (rgb.z - y) / 1.772 + 0.5;
    let cr = (rgb.x - y) / 1.402 + 0.5;
    Vec3::new(y, cb, cr).clamp(Vec3::ZERO, Vec3::ONE)
}

/// Everything the fusion step consumes for one frame.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub depth: DepthMap,
    pub confidence: ConfidenceMap,
    pub color: ColorImage,
    pub projection: Mat4,
    /// World-to-camera.
    pub view: Mat4,
    /// Sensor-to-camera, see [`crate::transform`].
    pub device_transform: Mat4,
    pub intrinsics: Mat3,
    /// Camera image size in pixels; intrinsics are expressed at this size.
    pub resolution: Vec2,
}
