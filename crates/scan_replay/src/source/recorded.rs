use super::{projection_from_intrinsics, FrameSource};
use anyhow::{bail, Context, Result};
use depthfuse::frame::confidence;
use depthfuse::{CameraFrame, ColorImage, ConfidenceMap, DepthMap, DeviceOrientation};
use glam::{Mat3, Mat4, Vec2, Vec3};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// On-disk layout of one recorded frame. Matrices are stored column by column.
#[derive(Debug, Deserialize)]
struct RecordedFrame {
    frame_number: u64,
    intrinsic: [[f32; 3]; 3],
    view_matrix: [[f32; 4]; 4],
    depth_map: RecordedDepth,
}

#[derive(Debug, Deserialize)]
struct RecordedDepth {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

/// Replays `frame_<n>.json` dumps from a directory in frame-number order.
///
/// The dumps carry no camera image or confidence, so every point is colored
/// mid-grey and treated as high confidence.
///
/// They do not record the camera image size either. Unless `resolution` is
/// given it is taken as twice the principal point, which is only exact for a
/// centred optical axis; an off-centre axis drops samples near one edge.
pub struct RecordedSource {
    files: std::vec::IntoIter<PathBuf>,
    device_transform: Mat4,
    resolution: Option<Vec2>,
}

impl RecordedSource {
    pub fn open(
        dir: &Path,
        orientation: DeviceOrientation,
        resolution: Option<Vec2>,
    ) -> Result<Self> {
        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            if let Some(n) = frame_number(&path) {
                frames.push((n, path));
            }
        }
        if frames.is_empty() {
            bail!("no frame_<n>.json files in {}", dir.display());
        }
        frames.sort_by_key(|(n, _)| *n);

        tracing::info!(dir = %dir.display(), frames = frames.len(), "opened recording");

        Ok(Self {
            files: frames
                .into_iter()
                .map(|(_, path)| path)
                .collect::<Vec<_>>()
                .into_iter(),
            device_transform: orientation.device_transform(),
            resolution,
        })
    }

    fn load(&self, path: &Path) -> Result<CameraFrame> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let rec: RecordedFrame =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

        let intrinsics = Mat3::from_cols_array_2d(&rec.intrinsic);
        let resolution = self
            .resolution
            .unwrap_or_else(|| 2.0 * Vec2::new(intrinsics.z_axis.x, intrinsics.z_axis.y));
        let depth = DepthMap::new(rec.depth_map.width, rec.depth_map.height, rec.depth_map.values)
            .with_context(|| format!("frame {}", rec.frame_number))?;

        tracing::debug!(
            frame = rec.frame_number,
            depth_w = depth.width(),
            depth_h = depth.height(),
            "loaded recorded frame"
        );

        Ok(CameraFrame {
            depth,
            confidence: ConfidenceMap::uniform(confidence::HIGH),
            color: ColorImage::Solid(Vec3::splat(0.5)),
            projection: projection_from_intrinsics(intrinsics, resolution.x, resolution.y),
            view: Mat4::from_cols_array_2d(&rec.view_matrix),
            device_transform: self.device_transform,
            intrinsics,
            resolution,
        })
    }
}

impl FrameSource for RecordedSource {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        match self.files.next() {
            Some(path) => self.load(&path).map(Some),
            None => Ok(None),
        }
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.files.len())
    }
}

fn frame_number(path: &Path) -> Option<u64> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("frame_")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_frame(dir: &Path, n: u64, depth: f32) {
        let values = vec![depth; 12];
        let tx = -(n as f32);
        let frame = json!({
            "frame_number": n,
            "intrinsic": [[500.0, 0.0, 0.0], [0.0, 500.0, 0.0], [320.0, 240.0, 1.0]],
            "view_matrix": [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [tx, 0.0, 0.0, 1.0]
            ],
            "depth_map": { "width": 4, "height": 3, "values": values }
        });
        std::fs::write(dir.join(format!("frame_{n}.json")), frame.to_string()).unwrap();
    }

    #[test]
    fn frames_replay_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), 10, 3.0);
        write_frame(dir.path(), 2, 1.0);
        std::fs::write(dir.path().join("rgb_2.jpeg"), b"not a frame").unwrap();

        let mut source = RecordedSource::open(dir.path(), DeviceOrientation::Portrait, None).unwrap();
        assert_eq!(source.remaining(), Some(2));

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.depth.values()[0], 1.0);
        assert_eq!(first.resolution, Vec2::new(640.0, 480.0));
        assert_eq!(first.view.w_axis.x, -2.0);
        assert_eq!(
            first.device_transform,
            DeviceOrientation::Portrait.device_transform()
        );

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.depth.values()[0], 3.0);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn explicit_resolution_overrides_principal_point() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), 0, 1.0);

        let size = Vec2::new(656.0, 480.0);
        let mut source =
            RecordedSource::open(dir.path(), DeviceOrientation::Portrait, Some(size)).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.resolution, size);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RecordedSource::open(dir.path(), DeviceOrientation::Portrait, None).is_err());
    }

    #[test]
    fn truncated_depth_map_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let frame = json!({
            "frame_number": 0,
            "intrinsic": [[500.0, 0.0, 0.0], [0.0, 500.0, 0.0], [320.0, 240.0, 1.0]],
            "view_matrix": [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0]
            ],
            "depth_map": { "width": 4, "height": 3, "values": [1.0, 2.0] }
        });
        std::fs::write(dir.path().join("frame_0.json"), frame.to_string()).unwrap();

        let mut source = RecordedSource::open(dir.path(), DeviceOrientation::Portrait, None).unwrap();
        assert!(source.next_frame().is_err());
    }
}
