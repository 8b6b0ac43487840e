//! Skips accumulation while the camera is (nearly) still.

use glam::Mat4;

#[derive(Debug, Clone)]
pub struct MotionGate {
    /// Cosine of the minimum rotation between accumulated frames.
    rotation_cos: f32,
    /// Squared minimum translation, meters².
    translation_sq: f32,
    last_pose: Option<Mat4>,
}

impl MotionGate {
    pub fn new(rotation_threshold_deg: f32, translation_threshold_m: f32) -> Self {
        Self {
            rotation_cos: rotation_threshold_deg.to_radians().cos(),
            translation_sq: translation_threshold_m * translation_threshold_m,
            last_pose: None,
        }
    }

    /// Whether a frame with camera-to-world `pose` moved enough since the last
    /// accumulated frame. An empty point buffer always accumulates.
    pub fn should_accumulate(&self, pose: &Mat4, buffer_empty: bool) -> bool {
        let Some(last) = self.last_pose.as_ref().filter(|_| !buffer_empty) else {
            return true;
        };

        let forward_dot = pose.z_axis.truncate().dot(last.z_axis.truncate());
        let moved_sq = pose
            .w_axis
            .truncate()
            .distance_squared(last.w_axis.truncate());

        forward_dot <= self.rotation_cos || moved_sq >= self.translation_sq
    }

    /// Remembers `pose` as the last accumulated frame.
    pub fn record(&mut self, pose: Mat4) {
        self.last_pose = Some(pose);
    }

    pub fn last_pose(&self) -> Option<&Mat4> {
        self.last_pose.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn gate_at_origin() -> MotionGate {
        let mut gate = MotionGate::new(2.0, 0.02);
        gate.record(Mat4::IDENTITY);
        gate
    }

    #[test]
    fn first_frame_and_empty_buffer_accumulate() {
        let gate = MotionGate::new(2.0, 0.02);
        assert!(gate.should_accumulate(&Mat4::IDENTITY, false));
        assert!(gate_at_origin().should_accumulate(&Mat4::IDENTITY, true));
    }

    #[test]
    fn still_camera_is_gated() {
        let gate = gate_at_origin();
        assert!(!gate.should_accumulate(&Mat4::IDENTITY, false));
        let jitter = Mat4::from_translation(Vec3::new(0.01, 0.0, 0.0));
        assert!(!gate.should_accumulate(&jitter, false));
    }

    #[test]
    fn translation_past_threshold_accumulates() {
        let gate = gate_at_origin();
        let step = Mat4::from_translation(Vec3::new(0.0, 0.03, 0.0));
        assert!(gate.should_accumulate(&step, false));
    }

    #[test]
    fn rotation_past_threshold_accumulates() {
        let gate = gate_at_origin();
        assert!(!gate.should_accumulate(&Mat4::from_rotation_y(1.0f32.to_radians()), false));
        assert!(gate.should_accumulate(&Mat4::from_rotation_y(3.0f32.to_radians()), false));
    }
}
