//! Procedural scene: a checkered ground plane and a sphere, seen by a camera
//! orbiting the origin.

use super::{projection_from_intrinsics, FrameSource};
use anyhow::Result;
use depthfuse::frame::{confidence, rgb_to_ycbcr};
use depthfuse::transform::intrinsics_matrix;
use depthfuse::{CameraFrame, ColorImage, ConfidenceMap, DepthMap, DeviceOrientation};
use glam::{Mat3, Mat4, Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

const CAMERA_WIDTH: u32 = 640;
const CAMERA_HEIGHT: u32 = 480;
const DEPTH_WIDTH: u32 = 64;
const DEPTH_HEIGHT: u32 = 48;
const COLOR_WIDTH: u32 = 160;
const COLOR_HEIGHT: u32 = 120;

const SPHERE_CENTER: Vec3 = Vec3::new(0.0, 0.5, 0.0);
const SPHERE_RADIUS: f32 = 0.5;
const MAX_RANGE: f32 = 5.0;

/// Neighbouring depths further apart than this mark an edge.
const EDGE_STEP: f32 = 0.1;
/// Surfaces seen at a shallower angle than this (cosine) are less reliable.
const GRAZING_COS: f32 = 0.3;

const SKY: Vec3 = Vec3::new(0.55, 0.7, 0.9);

#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    pub frames: usize,
    pub orientation: DeviceOrientation,
    pub seed: u64,
    /// Every n-th frame gets a singular view matrix.
    pub degenerate_every: Option<usize>,
    pub orbit_radius: f32,
    pub orbit_height: f32,
    /// Depth noise as a fraction of range.
    pub noise: f32,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            frames: 120,
            orientation: DeviceOrientation::Portrait,
            seed: 7,
            degenerate_every: None,
            orbit_radius: 3.0,
            orbit_height: 1.2,
            noise: 0.002,
        }
    }
}

#[derive(Clone, Copy)]
struct Hit {
    t: f32,
    normal: Vec3,
    point: Vec3,
    sphere: bool,
}

fn intersect(origin: Vec3, dir: Vec3) -> Option<Hit> {
    let mut best: Option<Hit> = None;

    if dir.y < 0.0 {
        let t = -origin.y / dir.y;
        if t > 0.0 {
            best = Some(Hit {
                t,
                normal: Vec3::Y,
                point: origin + dir * t,
                sphere: false,
            });
        }
    }

    let oc = origin - SPHERE_CENTER;
    let a = dir.length_squared();
    let b = 2.0 * dir.dot(oc);
    let c = oc.length_squared() - SPHERE_RADIUS * SPHERE_RADIUS;
    let disc = b * b - 4.0 * a * c;
    if disc >= 0.0 {
        let t = (-b - disc.sqrt()) / (2.0 * a);
        if t > 0.0 && best.map_or(true, |h| t < h.t) {
            let point = origin + dir * t;
            best = Some(Hit {
                t,
                normal: (point - SPHERE_CENTER) / SPHERE_RADIUS,
                point,
                sphere: true,
            });
        }
    }

    best.filter(|h| h.t <= MAX_RANGE)
}

fn shade(hit: Option<Hit>) -> Vec3 {
    match hit {
        None => SKY,
        Some(h) if h.sphere => h.normal * 0.5 + Vec3::splat(0.5),
        Some(h) => {
            let cell = (h.point.x * 2.0).floor() as i32 + (h.point.z * 2.0).floor() as i32;
            if cell.rem_euclid(2) == 0 {
                Vec3::new(0.85, 0.85, 0.8)
            } else {
                Vec3::new(0.25, 0.3, 0.25)
            }
        }
    }
}

/// Casts one ray per texel of a `width` x `height` map spanning the camera image.
///
/// The ray direction is not normalized: its sensor-space z is 1, so the hit
/// parameter is the depth along the optical axis.
fn cast(
    width: u32,
    height: u32,
    eye: Vec3,
    sensor_to_world: Mat3,
    intrinsics_inv: Mat3,
) -> Vec<Option<Hit>> {
    let sx = CAMERA_WIDTH as f32 / width as f32;
    let sy = CAMERA_HEIGHT as f32 / height as f32;
    (0..width * height)
        .into_par_iter()
        .map(|i| {
            let pixel = Vec2::new(
                ((i % width) as f32 + 0.5) * sx,
                ((i / width) as f32 + 0.5) * sy,
            );
            let dir = sensor_to_world * (intrinsics_inv * pixel.extend(1.0));
            intersect(eye, dir)
        })
        .collect()
}

/// Camera orbiting the scene at a fixed radius, one full turn over the run.
pub struct SyntheticSource {
    opts: SyntheticOptions,
    index: usize,
    rng: StdRng,
    intrinsics: Mat3,
    device_transform: Mat4,
}

impl SyntheticSource {
    pub fn new(opts: SyntheticOptions) -> Self {
        Self {
            rng: StdRng::seed_from_u64(opts.seed),
            intrinsics: intrinsics_matrix(
                500.0,
                500.0,
                CAMERA_WIDTH as f32 / 2.0,
                CAMERA_HEIGHT as f32 / 2.0,
            ),
            device_transform: opts.orientation.device_transform(),
            index: 0,
            opts,
        }
    }

    fn view_at(&self, index: usize) -> Mat4 {
        let turn = index as f32 / self.opts.frames.max(1) as f32;
        let angle = turn * std::f32::consts::TAU;
        let eye = Vec3::new(
            self.opts.orbit_radius * angle.cos(),
            self.opts.orbit_height + 0.2 * (2.0 * angle).sin(),
            self.opts.orbit_radius * angle.sin(),
        );
        Mat4::look_at_rh(eye, Vec3::new(0.0, 0.4, 0.0), Vec3::Y)
    }

    fn render(&mut self, view: Mat4) -> Result<CameraFrame> {
        let camera_to_world = view.inverse() * self.device_transform;
        let eye = camera_to_world.w_axis.truncate();
        let sensor_to_world = Mat3::from_mat4(camera_to_world);
        let intrinsics_inv = self.intrinsics.inverse();

        let hits = cast(DEPTH_WIDTH, DEPTH_HEIGHT, eye, sensor_to_world, intrinsics_inv);

        // Noise is drawn sequentially so a seed always yields the same frames.
        let noise = self.opts.noise;
        let depth: Vec<f32> = hits
            .iter()
            .map(|hit| match hit {
                Some(h) => h.t * (1.0 + noise * self.rng.gen_range(-1.0f32..=1.0)),
                None => 0.0,
            })
            .collect();

        let levels = (0..DEPTH_WIDTH * DEPTH_HEIGHT)
            .map(|i| {
                let (x, y) = (i % DEPTH_WIDTH, i / DEPTH_WIDTH);
                let Some(hit) = hits[i as usize] else {
                    return confidence::LOW;
                };
                let d = depth[i as usize];
                let edge = [(-1i32, 0i32), (1, 0), (0, -1), (0, 1)].iter().any(|&(dx, dy)| {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= DEPTH_WIDTH as i32 || ny >= DEPTH_HEIGHT as i32 {
                        return false;
                    }
                    let n = depth[(ny as u32 * DEPTH_WIDTH + nx as u32) as usize];
                    n <= 0.0 || (n - d).abs() > EDGE_STEP
                });
                let view_dir = (hit.point - eye).normalize_or_zero();
                if edge {
                    confidence::LOW
                } else if hit.normal.dot(-view_dir) < GRAZING_COS {
                    confidence::MEDIUM
                } else {
                    confidence::HIGH
                }
            })
            .collect();

        let shaded = cast(COLOR_WIDTH, COLOR_HEIGHT, eye, sensor_to_world, intrinsics_inv);
        let (cw, ch) = ColorImage::chroma_dims(COLOR_WIDTH, COLOR_HEIGHT);
        let mut luma = Vec::with_capacity(shaded.len());
        let mut chroma = vec![0u8; (cw * ch * 2) as usize];
        for (i, hit) in shaded.iter().enumerate() {
            let ycc = rgb_to_ycbcr(shade(*hit)) * 255.0;
            luma.push(ycc.x as u8);
            let (x, y) = (i as u32 % COLOR_WIDTH, i as u32 / COLOR_WIDTH);
            if x % 2 == 0 && y % 2 == 0 {
                let c = ((y / 2 * cw + x / 2) * 2) as usize;
                chroma[c] = ycc.y as u8;
                chroma[c + 1] = ycc.z as u8;
            }
        }

        Ok(CameraFrame {
            depth: DepthMap::new(DEPTH_WIDTH, DEPTH_HEIGHT, depth)?,
            confidence: ConfidenceMap::new(DEPTH_WIDTH, DEPTH_HEIGHT, levels)?,
            color: ColorImage::ycbcr(COLOR_WIDTH, COLOR_HEIGHT, luma, chroma)?,
            projection: projection_from_intrinsics(
                self.intrinsics,
                CAMERA_WIDTH as f32,
                CAMERA_HEIGHT as f32,
            ),
            view,
            device_transform: self.device_transform,
            intrinsics: self.intrinsics,
            resolution: Vec2::new(CAMERA_WIDTH as f32, CAMERA_HEIGHT as f32),
        })
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        if self.index >= self.opts.frames {
            return Ok(None);
        }
        let index = self.index;
        self.index += 1;

        let view = self.view_at(index);
        let mut frame = self.render(view)?;

        if let Some(n) = self.opts.degenerate_every.filter(|&n| n > 0) {
            if (index + 1) % n == 0 {
                tracing::debug!(frame = index, "injecting singular view matrix");
                frame.view = Mat4::ZERO;
            }
        }

        Ok(Some(frame))
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.opts.frames - self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthfuse::{FrameOutcome, FusionConfig, FusionEngine, SkipReason};

    fn source(frames: usize) -> SyntheticSource {
        SyntheticSource::new(SyntheticOptions {
            frames,
            ..Default::default()
        })
    }

    #[test]
    fn stream_ends_after_requested_frames() {
        let mut src = source(3);
        assert_eq!(src.remaining(), Some(3));
        for _ in 0..3 {
            assert!(src.next_frame().unwrap().is_some());
        }
        assert!(src.next_frame().unwrap().is_none());
        assert_eq!(src.remaining(), Some(0));
    }

    #[test]
    fn centre_of_view_sees_the_scene() {
        let frame = source(1).next_frame().unwrap().unwrap();
        let centre = frame.depth.sample(Vec2::splat(0.5));
        // The camera aims at the sphere from three meters out.
        assert!(centre > 1.5 && centre < MAX_RANGE, "depth {centre}");
    }

    #[test]
    fn same_seed_same_frames() {
        let a = source(2).next_frame().unwrap().unwrap();
        let b = source(2).next_frame().unwrap().unwrap();
        assert_eq!(a.depth, b.depth);
    }

    #[test]
    fn degenerate_frames_are_injected_and_skipped() {
        let mut src = SyntheticSource::new(SyntheticOptions {
            frames: 4,
            degenerate_every: Some(2),
            ..Default::default()
        });
        let mut engine = FusionEngine::new(FusionConfig {
            capacity: 50_000,
            grid_points: 500,
            ..Default::default()
        })
        .unwrap();

        let mut skipped = 0;
        while let Some(frame) = src.next_frame().unwrap() {
            if engine.process_frame(&frame) == FrameOutcome::Skipped(SkipReason::DegenerateTransform)
            {
                skipped += 1;
            }
        }
        assert_eq!(skipped, 2);
    }

    #[test]
    fn fused_points_lie_on_the_scene() {
        let mut src = source(8);
        let mut engine = FusionEngine::new(FusionConfig {
            capacity: 50_000,
            grid_points: 800,
            ..Default::default()
        })
        .unwrap();
        while let Some(frame) = src.next_frame().unwrap() {
            engine.process_frame(&frame);
        }

        let live = engine.snapshot().live();
        assert!(!live.is_empty());
        for p in live {
            let pos = p.position();
            // Nearest-texel depth lookup shifts points by a few centimetres.
            assert!(pos.y > -0.25, "below ground: {pos}");
            assert!(pos.length() < 8.5, "out of range: {pos}");
        }
    }
}
