mod config;
mod metrics;
mod source;

use crate::config::{Config, SourceKind};
use crate::metrics::FusionMetrics;
use crate::source::{FrameSource, RecordedSource, SyntheticOptions, SyntheticSource};
use anyhow::{Context, Result};
use clap::Parser;
use depthfuse::{FrameOutcome, FusionEngine, Particle};
use glam::Vec3;
use rayon::prelude::*;
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

fn open_source(cfg: &Config) -> Result<Box<dyn FrameSource>> {
    Ok(match cfg.source {
        SourceKind::Synthetic => Box::new(SyntheticSource::new(SyntheticOptions {
            frames: cfg.frames,
            orientation: cfg.orientation.into(),
            seed: cfg.seed,
            degenerate_every: cfg.degenerate_every,
            ..Default::default()
        })),
        SourceKind::Recorded => {
            let dir = cfg
                .recorded_dir
                .as_deref()
                .context("--recorded-dir is required for recorded sources")?;
            Box::new(RecordedSource::open(
                dir,
                cfg.orientation.into(),
                cfg.camera_resolution,
            )?)
        }
    })
}

/// Axis-aligned bounds of the live points, for the summary log.
fn bounds(points: &[Particle]) -> (Vec3, Vec3) {
    points
        .par_iter()
        .map(|p| (p.position(), p.position()))
        .reduce(
            || (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(a_min, a_max), (b_min, b_max)| (a_min.min(b_min), a_max.max(b_max)),
        )
}

fn main() -> Result<()> {
    let cfg = Config::parse();
    init_logging(cfg.log_json);

    let fusion = cfg.fusion_config()?;
    tracing::info!(config = ?fusion, source = ?cfg.source, "starting replay");

    let metrics = FusionMetrics::new()?;
    let mut engine = FusionEngine::new(fusion)?;
    let mut source = open_source(&cfg)?;
    tracing::info!(frames = ?source.remaining(), "frame source ready");

    let started = Instant::now();
    let mut replayed = 0usize;
    while replayed < cfg.frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        replayed += 1;

        let outcome = engine.process_frame(&frame);
        match engine.export() {
            Ok(uniforms) => {
                metrics.observe(&outcome, &uniforms);
                if let FrameOutcome::Accumulated(report) = outcome {
                    tracing::debug!(
                        frame = report.frame,
                        admitted = report.admitted,
                        cursor = uniforms.cursor,
                        live = uniforms.live_count,
                        "uniforms exported"
                    );
                }
            }
            // Only possible before the first usable camera.
            Err(e) if e.is_degenerate() => {
                metrics.observe_unexported();
                tracing::warn!(error = %e, "no camera state to export yet");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let elapsed = started.elapsed();
    let stats = engine.stats();
    let snapshot = engine.snapshot();
    let (min, max) = bounds(snapshot.live());

    tracing::info!(
        frames = replayed,
        accumulated = stats.frames_accumulated,
        degenerate = stats.frames_degenerate,
        stationary = stats.frames_stationary,
        admitted = stats.samples_admitted,
        below_threshold = stats.samples_below_threshold,
        invalid = stats.samples_invalid,
        overflow = stats.samples_overflow,
        abandoned = stats.batches_abandoned,
        live_points = snapshot.live_count(),
        cursor = snapshot.cursor(),
        elapsed_ms = elapsed.as_millis() as u64,
        "replay finished"
    );
    if snapshot.live_count() > 0 {
        tracing::info!(min = ?min, max = ?max, "point cloud bounds");
    }
    tracing::info!("metrics:\n{}", metrics.render()?);

    Ok(())
}
