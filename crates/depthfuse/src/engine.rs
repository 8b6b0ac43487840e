//! Frame-level orchestration: transforms, gating, parallel unprojection into
//! the ring, and uniform export.

use crate::config::FusionConfig;
use crate::error::Result;
use crate::frame::CameraFrame;
use crate::grid::SamplingGrid;
use crate::motion::MotionGate;
use crate::ring::{PointRingBuffer, RingSnapshot};
use crate::transform::{CameraTransforms, TransformContext};
use crate::uniforms::{self, RenderUniforms};
use crate::unproject::{Admission, Sample, Unprojector};
use glam::Vec2;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

/// Grid samples unprojected between budget checks.
pub const SAMPLE_CHUNK: usize = 256;

/// How much of a frame's sampling grid may be unprojected.
///
/// The budget is checked before each chunk of [`SAMPLE_CHUNK`] samples. Once it
/// is exhausted the remaining chunks are skipped; particles already written
/// stay in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameBudget {
    #[default]
    Unlimited,
    /// Stop once this instant has passed.
    Deadline(Instant),
    /// Unproject at most this many chunks.
    Chunks(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// View or intrinsics could not be inverted.
    DegenerateTransform,
    /// The camera has not moved enough since the last accumulated frame.
    Stationary,
}

/// Counters for one accumulated frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Position of the frame in the input stream, skipped frames included.
    pub frame: u64,
    pub sampled: usize,
    pub admitted: usize,
    pub below_threshold: usize,
    pub invalid: usize,
    /// Admitted samples refused because the batch already filled every slot.
    pub overflow: usize,
    /// The frame deadline passed before every grid sample was visited.
    pub abandoned: bool,
    pub cursor: usize,
    pub live_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Accumulated(FrameReport),
    Skipped(SkipReason),
}

/// Session totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub frames_seen: u64,
    pub frames_accumulated: u64,
    pub frames_degenerate: u64,
    pub frames_stationary: u64,
    pub samples_admitted: u64,
    pub samples_below_threshold: u64,
    pub samples_invalid: u64,
    pub samples_overflow: u64,
    pub batches_abandoned: u64,
}

impl FusionStats {
    fn record(&mut self, report: &FrameReport) {
        self.frames_accumulated += 1;
        self.samples_admitted += report.admitted as u64;
        self.samples_below_threshold += report.below_threshold as u64;
        self.samples_invalid += report.invalid as u64;
        self.samples_overflow += report.overflow as u64;
        self.batches_abandoned += report.abandoned as u64;
    }
}

#[derive(Default)]
struct BatchCounters {
    admitted: AtomicUsize,
    below_threshold: AtomicUsize,
    invalid: AtomicUsize,
    overflow: AtomicUsize,
    abandoned: AtomicBool,
    chunks_started: AtomicUsize,
}

/// Owns the scanning session's transform context and point ring. Nothing
/// else mutates either.
pub struct FusionEngine {
    config: FusionConfig,
    transforms: TransformContext,
    ring: PointRingBuffer,
    unprojector: Unprojector,
    gate: MotionGate,
    grid: SamplingGrid,
    stats: FusionStats,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;

        let ring = PointRingBuffer::new(config.capacity)?;
        let unprojector = Unprojector::new(config.confidence_threshold)?;
        let gate = MotionGate::new(config.rotation_threshold_deg, config.translation_threshold_m);

        tracing::info!(
            capacity = config.capacity,
            threshold = config.confidence_threshold,
            grid_points = config.grid_points,
            "fusion engine ready"
        );

        Ok(Self {
            config,
            transforms: TransformContext::new(),
            ring,
            unprojector,
            gate,
            grid: SamplingGrid::new(Vec2::ZERO, 0),
            stats: FusionStats::default(),
        })
    }

    /// Fuses one frame into the ring.
    ///
    /// A degenerate camera or a stationary device skips the frame without
    /// touching the ring. Bad samples are counted and skipped.
    pub fn process_frame(&mut self, frame: &CameraFrame) -> FrameOutcome {
        let budget = match self.config.frame_budget() {
            Some(b) => FrameBudget::Deadline(Instant::now() + b),
            None => FrameBudget::Unlimited,
        };
        self.process_frame_with_budget(frame, budget)
    }

    /// [`process_frame`](Self::process_frame) with an explicit budget in place
    /// of the configured one.
    pub fn process_frame_with_budget(
        &mut self,
        frame: &CameraFrame,
        budget: FrameBudget,
    ) -> FrameOutcome {
        self.stats.frames_seen += 1;
        let frame_no = self.stats.frames_seen;

        let transforms = match self.transforms.update(
            frame.projection,
            frame.view,
            frame.device_transform,
            frame.intrinsics,
            frame.resolution,
        ) {
            Ok(t) => *t,
            Err(err) => {
                tracing::warn!(frame = frame_no, error = %err, "skipping frame");
                self.stats.frames_degenerate += 1;
                return FrameOutcome::Skipped(SkipReason::DegenerateTransform);
            }
        };

        let pose = transforms.camera_pose();
        if !self.gate.should_accumulate(&pose, self.ring.live_count() == 0) {
            self.stats.frames_stationary += 1;
            return FrameOutcome::Skipped(SkipReason::Stationary);
        }

        if self.grid.resolution() != frame.resolution {
            self.grid = SamplingGrid::new(frame.resolution, self.config.grid_points);
            tracing::debug!(
                points = self.grid.len(),
                spacing = self.grid.spacing(),
                "rebuilt sampling grid"
            );
        }

        let mut report = self.fuse_grid(frame, &transforms, budget);
        report.frame = frame_no;
        report.cursor = self.ring.cursor();
        report.live_count = self.ring.live_count();

        self.gate.record(pose);
        self.stats.record(&report);

        tracing::debug!(
            frame = report.frame,
            admitted = report.admitted,
            rejected = report.below_threshold + report.invalid,
            abandoned = report.abandoned,
            cursor = report.cursor,
            live = report.live_count,
            "frame fused"
        );

        FrameOutcome::Accumulated(report)
    }

    fn fuse_grid(
        &mut self,
        frame: &CameraFrame,
        transforms: &CameraTransforms,
        budget: FrameBudget,
    ) -> FrameReport {
        let unprojector = self.unprojector;
        let counters = BatchCounters::default();
        let writer = self.ring.writer();

        self.grid
            .points()
            .par_chunks(SAMPLE_CHUNK)
            .for_each(|chunk| {
                if counters.abandoned.load(Ordering::Relaxed) {
                    return;
                }
                let exhausted = match budget {
                    FrameBudget::Unlimited => false,
                    FrameBudget::Deadline(d) => Instant::now() >= d,
                    FrameBudget::Chunks(n) => {
                        counters.chunks_started.fetch_add(1, Ordering::Relaxed) >= n
                    }
                };
                if exhausted {
                    counters.abandoned.store(true, Ordering::Relaxed);
                    return;
                }

                let mut accepted = Vec::with_capacity(chunk.len());
                let (mut below, mut invalid) = (0, 0);
                for &pixel in chunk {
                    let sample = Sample::from_frame(frame, pixel);
                    match unprojector.unproject(&sample, transforms) {
                        Ok(Admission::Accepted(particle)) => accepted.push(particle),
                        Ok(Admission::BelowThreshold) => below += 1,
                        Err(_) => invalid += 1,
                    }
                }
                let admitted = writer.append_batch(&accepted);
                let overflow = accepted.len() - admitted;

                counters.admitted.fetch_add(admitted, Ordering::Relaxed);
                counters.below_threshold.fetch_add(below, Ordering::Relaxed);
                counters.invalid.fetch_add(invalid, Ordering::Relaxed);
                counters.overflow.fetch_add(overflow, Ordering::Relaxed);
            });

        let admitted = counters.admitted.into_inner();
        let below_threshold = counters.below_threshold.into_inner();
        let invalid = counters.invalid.into_inner();
        let overflow = counters.overflow.into_inner();
        FrameReport {
            sampled: admitted + below_threshold + invalid + overflow,
            admitted,
            below_threshold,
            invalid,
            overflow,
            abandoned: counters.abandoned.into_inner(),
            ..Default::default()
        }
    }

    /// Unprojects a single sample against the current transforms and appends
    /// it if admitted.
    pub fn ingest_sample(&mut self, sample: &Sample) -> Result<Admission> {
        let transforms = *self.transforms.current()?;
        let admission = self.unprojector.unproject(sample, &transforms)?;
        if let Admission::Accepted(particle) = admission {
            self.ring.append(particle);
        }
        Ok(admission)
    }

    /// Uniforms for the frame just processed. Call after `process_frame`.
    pub fn export(&self) -> Result<RenderUniforms> {
        uniforms::export(&self.ring, &self.transforms)
    }

    pub fn snapshot(&self) -> RingSnapshot<'_> {
        self.ring.snapshot()
    }

    pub fn ring(&self) -> &PointRingBuffer {
        &self.ring
    }

    pub fn transforms(&self) -> &TransformContext {
        &self.transforms
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }
}
