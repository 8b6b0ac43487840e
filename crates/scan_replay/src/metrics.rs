use depthfuse::{FrameOutcome, RenderUniforms, SkipReason};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

pub struct FusionMetrics {
    pub registry: Registry,
    pub frames_accumulated_total: IntCounter,
    pub frames_degenerate_total: IntCounter,
    pub frames_stationary_total: IntCounter,
    pub samples_admitted_total: IntCounter,
    pub samples_below_threshold_total: IntCounter,
    pub samples_invalid_total: IntCounter,
    pub samples_overflow_total: IntCounter,
    pub batches_abandoned_total: IntCounter,
    pub ring_cursor: IntGauge,
    pub ring_live_points: IntGauge,
}

impl FusionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("scan_replay".into()), None)?;

        macro_rules! reg {
            ($ty:ident, $name:expr, $help:expr) => {{
                let m = $ty::with_opts(Opts::new($name, $help))?;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        Ok(Self {
            frames_accumulated_total: reg!(
                IntCounter,
                "frames_accumulated_total",
                "Frames fused into the point ring"
            ),
            frames_degenerate_total: reg!(
                IntCounter,
                "frames_degenerate_total",
                "Frames skipped for a non-invertible camera"
            ),
            frames_stationary_total: reg!(
                IntCounter,
                "frames_stationary_total",
                "Frames skipped because the camera did not move"
            ),
            samples_admitted_total: reg!(
                IntCounter,
                "samples_admitted_total",
                "Samples written to the ring"
            ),
            samples_below_threshold_total: reg!(
                IntCounter,
                "samples_below_threshold_total",
                "Samples dropped for low confidence"
            ),
            samples_invalid_total: reg!(
                IntCounter,
                "samples_invalid_total",
                "Samples with unusable depth or coordinates"
            ),
            samples_overflow_total: reg!(
                IntCounter,
                "samples_overflow_total",
                "Admitted samples refused because the frame filled every ring slot"
            ),
            batches_abandoned_total: reg!(
                IntCounter,
                "batches_abandoned_total",
                "Frames cut short by the frame budget"
            ),
            ring_cursor: reg!(IntGauge, "ring_cursor", "Next ring slot to be written"),
            ring_live_points: reg!(IntGauge, "ring_live_points", "Points available to render"),
            registry,
        })
    }

    pub fn observe(&self, outcome: &FrameOutcome, uniforms: &RenderUniforms) {
        match outcome {
            FrameOutcome::Accumulated(report) => {
                self.frames_accumulated_total.inc();
                self.samples_admitted_total.inc_by(report.admitted as u64);
                self.samples_below_threshold_total
                    .inc_by(report.below_threshold as u64);
                self.samples_invalid_total.inc_by(report.invalid as u64);
                self.samples_overflow_total.inc_by(report.overflow as u64);
                if report.abandoned {
                    self.batches_abandoned_total.inc();
                }
            }
            FrameOutcome::Skipped(SkipReason::DegenerateTransform) => {
                self.frames_degenerate_total.inc()
            }
            FrameOutcome::Skipped(SkipReason::Stationary) => self.frames_stationary_total.inc(),
        }

        self.ring_cursor.set(uniforms.cursor as i64);
        self.ring_live_points.set(uniforms.live_count as i64);
    }

    /// Counts a frame that produced no uniforms at all.
    pub fn observe_unexported(&self) {
        self.frames_degenerate_total.inc();
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthfuse::transform::intrinsics_matrix;
    use depthfuse::{FrameReport, PointRingBuffer, TransformContext};
    use glam::{Mat4, Vec2};

    fn uniforms() -> RenderUniforms {
        let mut ctx = TransformContext::new();
        ctx.update(
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            intrinsics_matrix(100.0, 100.0, 50.0, 50.0),
            Vec2::splat(100.0),
        )
        .unwrap();
        let mut ring = PointRingBuffer::new(8).unwrap();
        ring.append(Default::default());
        depthfuse::uniforms::export(&ring, &ctx).unwrap()
    }

    #[test]
    fn accumulated_frames_feed_counters_and_gauges() {
        let metrics = FusionMetrics::new().unwrap();
        let report = FrameReport {
            admitted: 40,
            below_threshold: 5,
            invalid: 3,
            overflow: 12,
            abandoned: true,
            ..Default::default()
        };
        metrics.observe(&FrameOutcome::Accumulated(report), &uniforms());
        metrics.observe(
            &FrameOutcome::Skipped(SkipReason::Stationary),
            &uniforms(),
        );

        assert_eq!(metrics.samples_admitted_total.get(), 40);
        assert_eq!(metrics.samples_overflow_total.get(), 12);
        assert_eq!(metrics.batches_abandoned_total.get(), 1);
        assert_eq!(metrics.frames_stationary_total.get(), 1);
        assert_eq!(metrics.ring_cursor.get(), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("scan_replay_samples_admitted_total 40"));
        assert!(text.contains("scan_replay_samples_overflow_total 12"));
    }
}
