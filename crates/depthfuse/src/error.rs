use thiserror::Error;

/// Which camera matrix failed to invert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    View,
    Intrinsics,
}

impl std::fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatrixKind::View => "view",
            MatrixKind::Intrinsics => "intrinsics",
        };

        f.write_str(s)
    }
}

/// Why a single pixel sample was refused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleFault {
    /// Depth was zero, negative or not a number.
    NonPositiveDepth(f32),
    /// Pixel lies outside `[0, resolution)`.
    PixelOutOfRange { x: f32, y: f32 },
    /// The back-projected point ended up at infinity.
    NonFinitePosition,
}

impl std::fmt::Display for SampleFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFault::NonPositiveDepth(d) => write!(f, "non-positive depth {d}"),
            SampleFault::PixelOutOfRange { x, y } => {
                write!(f, "pixel ({x:.1}, {y:.1}) outside camera image")
            }
            SampleFault::NonFinitePosition => f.write_str("non-finite world position"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FusionError {
    /// A per-frame matrix could not be inverted. The frame is skipped.
    #[error("degenerate {matrix} matrix (determinant {determinant:e})")]
    DegenerateTransform { matrix: MatrixKind, determinant: f32 },

    /// Uniforms were requested before any frame produced a valid transform.
    #[error("transform context was never updated with an invertible camera")]
    NotInitialized,

    /// A single depth sample was unusable. The sample is skipped.
    #[error("invalid sample: {reason}")]
    InvalidSample { reason: SampleFault },

    /// The ring buffer was asked for zero slots.
    #[error("point ring capacity must be greater than zero")]
    InvalidCapacity,

    /// A frame map's backing storage does not match its dimensions.
    #[error("malformed {what}: expected {expected} values, got {actual}")]
    MalformedFrame {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FusionError {
    /// True for both "cannot invert" and "never inverted" transform failures.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            FusionError::DegenerateTransform { .. } | FusionError::NotInitialized
        )
    }
}

impl From<SampleFault> for FusionError {
    fn from(reason: SampleFault) -> Self {
        FusionError::InvalidSample { reason }
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
