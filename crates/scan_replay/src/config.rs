use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use depthfuse::{DeviceOrientation, FusionConfig};
use glam::Vec2;
use std::path::PathBuf;

/// Where frames come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Procedural orbit around a ground plane and a sphere.
    Synthetic,
    /// Directory of `frame_<n>.json` dumps recorded on device.
    Recorded,
}

/// Screen orientation the recorded view matrices were produced for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Orientation {
    LandscapeRight,
    Portrait,
    LandscapeLeft,
    PortraitUpsideDown,
}

impl From<Orientation> for DeviceOrientation {
    fn from(o: Orientation) -> Self {
        match o {
            Orientation::LandscapeRight => DeviceOrientation::LandscapeRight,
            Orientation::Portrait => DeviceOrientation::Portrait,
            Orientation::LandscapeLeft => DeviceOrientation::LandscapeLeft,
            Orientation::PortraitUpsideDown => DeviceOrientation::PortraitUpsideDown,
        }
    }
}

/// `scan_replay` - feeds depth frames through the point-cloud fusion engine.
///
/// Every frame is unprojected into the point ring and the render uniforms
/// are exported, exactly as a live scanner would before drawing.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, value_enum, default_value_t = SourceKind::Synthetic, env = "SCAN_SOURCE")]
    pub source: SourceKind,

    /// Directory holding recorded `frame_<n>.json` files.
    #[arg(long, env = "SCAN_RECORDED_DIR", required_if_eq("source", "recorded"))]
    pub recorded_dir: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long, default_value_t = 120, env = "SCAN_FRAMES")]
    pub frames: usize,

    #[arg(long, value_enum, default_value_t = Orientation::Portrait, env = "SCAN_ORIENTATION")]
    pub orientation: Orientation,

    /// Camera image size of recorded frames, e.g. `1920x1440`. Defaults to
    /// twice the principal point.
    #[arg(long, value_parser = parse_resolution, env = "SCAN_CAMERA_RESOLUTION")]
    pub camera_resolution: Option<Vec2>,

    /// JSON file with a base fusion configuration; flags below override it.
    #[arg(long, env = "SCAN_FUSION_CONFIG")]
    pub fusion_config: Option<PathBuf>,

    /// Ring capacity in points.
    #[arg(long, env = "SCAN_CAPACITY")]
    pub capacity: Option<usize>,

    /// Minimum normalized confidence for a point to be kept.
    #[arg(long, env = "SCAN_CONFIDENCE_THRESHOLD")]
    pub confidence_threshold: Option<f32>,

    /// Approximate grid samples per frame.
    #[arg(long, env = "SCAN_GRID_POINTS")]
    pub grid_points: Option<usize>,

    /// Per-frame unprojection deadline in milliseconds.
    #[arg(long, env = "SCAN_FRAME_BUDGET_MS")]
    pub frame_budget_ms: Option<u64>,

    /// Seed for synthetic sensor noise.
    #[arg(long, default_value_t = 7, env = "SCAN_SEED")]
    pub seed: u64,

    /// Inject a singular view matrix every N synthetic frames.
    #[arg(long, env = "SCAN_DEGENERATE_EVERY")]
    pub degenerate_every: Option<usize>,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false, env = "SCAN_LOG_JSON")]
    pub log_json: bool,
}

fn parse_resolution(s: &str) -> Result<Vec2, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("width: {e}"))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("height: {e}"))?;
    if w == 0 || h == 0 {
        return Err("resolution must be non-zero".into());
    }
    Ok(Vec2::new(w as f32, h as f32))
}

impl Config {
    /// Builds the engine configuration: defaults, then the JSON file, then flags.
    pub fn fusion_config(&self) -> Result<FusionConfig> {
        let mut cfg = match &self.fusion_config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => FusionConfig {
                // Keep the default replay light; the library default targets devices.
                capacity: 1_000_000,
                ..Default::default()
            },
        };

        if let Some(capacity) = self.capacity {
            cfg.capacity = capacity;
        }
        if let Some(threshold) = self.confidence_threshold {
            cfg.confidence_threshold = threshold;
        }
        if let Some(points) = self.grid_points {
            cfg.grid_points = points;
        }
        if self.frame_budget_ms.is_some() {
            cfg.frame_budget_ms = self.frame_budget_ms;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn flags_override_the_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "capacity": 2048, "grid_points": 500 }}"#).unwrap();

        let config = Config::parse_from([
            "scan_replay",
            "--fusion-config",
            file.path().to_str().unwrap(),
            "--grid-points",
            "900",
        ]);
        let cfg = config.fusion_config().unwrap();
        assert_eq!(cfg.capacity, 2048);
        assert_eq!(cfg.grid_points, 900);
    }

    #[test]
    fn invalid_capacity_is_reported() {
        let config = Config::parse_from(["scan_replay", "--capacity", "0"]);
        assert!(config.fusion_config().is_err());
    }

    #[test]
    fn camera_resolution_is_parsed() {
        let config = Config::parse_from(["scan_replay", "--camera-resolution", "1920x1440"]);
        assert_eq!(config.camera_resolution, Some(Vec2::new(1920.0, 1440.0)));

        for bad in ["1920", "0x1440", "wide x tall"] {
            assert!(
                Config::try_parse_from(["scan_replay", "--camera-resolution", bad]).is_err(),
                "{bad}"
            );
        }
    }

    #[test]
    fn recorded_source_requires_a_directory() {
        assert!(Config::try_parse_from(["scan_replay", "--source", "recorded"]).is_err());
    }
}
