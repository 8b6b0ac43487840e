//! Staggered sampling grid over the camera image.

use glam::Vec2;

/// Largest per-frame sample count a grid will be built for.
pub const MAX_GRID_POINTS: usize = 1 << 22;

/// Pixel positions sampled every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingGrid {
    resolution: Vec2,
    spacing: f32,
    points: Vec<Vec2>,
}

impl SamplingGrid {
    /// Lays roughly `target_points` samples over a `resolution` image.
    ///
    /// Odd rows are shifted right by half a cell, so the last sample of an odd
    /// row can land past the right edge. Targets above [`MAX_GRID_POINTS`]
    /// are clamped to it.
    pub fn new(resolution: Vec2, target_points: usize) -> Self {
        let target_points = target_points.min(MAX_GRID_POINTS);
        let area = resolution.x * resolution.y;
        if target_points == 0 || !(area > 0.0) {
            return Self {
                resolution,
                spacing: 0.0,
                points: Vec::new(),
            };
        }

        let spacing = (area / target_points as f32).sqrt();
        let cols = (resolution.x / spacing).round() as usize;
        let rows = (resolution.y / spacing).round() as usize;

        let mut points = Vec::with_capacity(cols * rows);
        for gy in 0..rows {
            let stagger = (gy % 2) as f32 * spacing / 2.0;
            for gx in 0..cols {
                points.push(Vec2::new(
                    stagger + (gx as f32 + 0.5) * spacing,
                    (gy as f32 + 0.5) * spacing,
                ));
            }
        }

        Self {
            resolution,
            spacing,
            points,
        }
    }

    pub fn resolution(&self) -> Vec2 {
        self.resolution
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
