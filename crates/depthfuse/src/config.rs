use crate::error::{FusionError, Result};
use crate::grid::MAX_GRID_POINTS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of points kept in the ring.
pub const DEFAULT_CAPACITY: usize = 10_000_000;
/// Admit medium- and high-confidence samples.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Samples taken from each frame.
pub const DEFAULT_GRID_POINTS: usize = 10_000;
pub const DEFAULT_ROTATION_THRESHOLD_DEG: f32 = 2.0;
pub const DEFAULT_TRANSLATION_THRESHOLD_M: f32 = 0.02;

/// Session-wide settings, fixed when the engine is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Ring capacity in particles.
    pub capacity: usize,
    /// Minimum normalized confidence for a sample to be admitted.
    pub confidence_threshold: f32,
    /// Approximate number of grid samples per frame.
    pub grid_points: usize,
    /// Minimum camera rotation between accumulated frames, degrees.
    pub rotation_threshold_deg: f32,
    /// Minimum camera translation between accumulated frames, meters.
    pub translation_threshold_m: f32,
    /// Abandon the rest of a frame's samples after this many milliseconds.
    pub frame_budget_ms: Option<u64>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            grid_points: DEFAULT_GRID_POINTS,
            rotation_threshold_deg: DEFAULT_ROTATION_THRESHOLD_DEG,
            translation_threshold_m: DEFAULT_TRANSLATION_THRESHOLD_M,
            frame_budget_ms: None,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(FusionError::InvalidCapacity);
        }
        // Cursor and capacity travel to the GPU as u32.
        if self.capacity > u32::MAX as usize {
            return Err(FusionError::InvalidConfig(format!(
                "capacity {} exceeds the GPU index range",
                self.capacity
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(FusionError::InvalidConfig(format!(
                "confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.grid_points == 0 || self.grid_points > MAX_GRID_POINTS {
            return Err(FusionError::InvalidConfig(format!(
                "grid points {} outside [1, {MAX_GRID_POINTS}]",
                self.grid_points
            )));
        }
        if !(self.rotation_threshold_deg >= 0.0) || !(self.translation_threshold_m >= 0.0) {
            return Err(FusionError::InvalidConfig(
                "motion thresholds must be non-negative".into(),
            ));
        }
        Ok(())
    }

    pub fn frame_budget(&self) -> Option<Duration> {
        self.frame_budget_ms.map(Duration::from_millis)
    }
}
