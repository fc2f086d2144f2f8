use strata_graphics::DeviceError;

use crate::TlasStage;

/// Geometry that cannot be described as a triangle acceleration structure.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("mesh '{mesh}' has no vertex data")]
    MissingVertexData { mesh: String },
    #[error("mesh '{mesh}' has no index data")]
    MissingIndexData { mesh: String },
    #[error("mesh '{mesh}' has no surfaces")]
    NoSurfaces { mesh: String },
    #[error("surface {surface} of mesh '{mesh}' has {count} indices, not a non-zero multiple of 3")]
    TriangleCount {
        mesh: String,
        surface: usize,
        count: u32,
    },
    #[error("surface {surface} of mesh '{mesh}' ends at index {end}, past {index_count}")]
    SurfaceOutOfRange {
        mesh: String,
        surface: usize,
        end: u64,
        index_count: u32,
    },
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::IntoStaticStr)]
pub enum ErrorKind {
    /// Malformed input, detected before any device work.
    Configuration,
    /// Backing, scratch or upload storage could not be created.
    Allocation,
    /// A fence was not signaled in time. The device is considered lost.
    DeviceTimeout,
    /// Any other device failure.
    Device,
    /// The operation is not legal in the current build stage.
    InvalidState,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("{count} instances do not fit into the 24-bit custom index")]
    TooManyInstances { count: usize },
    #[error("hit group offset {offset} does not fit into 24 bits")]
    HitGroupOffset { offset: u32 },
    #[error("expected {expected} instance transforms, got {actual}")]
    TransformCount { expected: usize, actual: usize },
    #[error("size query for the {what} failed")]
    SizeQuery {
        what: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error("unable to allocate the {what}")]
    Allocation {
        what: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error("{what} did not complete within {timeout_ms} ms")]
    DeviceTimeout { what: &'static str, timeout_ms: u32 },
    #[error("device failure in {what}")]
    Device {
        what: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error("expected {expected} bottom-level handles, got {actual}")]
    HandleCount { expected: usize, actual: usize },
    #[error("acceleration structure work submitted after teardown")]
    GateDestroyed,
    #[error("top-level structure is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: TlasStage,
        actual: TlasStage,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match *self {
            Self::Geometry(_)
            | Self::TooManyInstances { .. }
            | Self::HitGroupOffset { .. }
            | Self::TransformCount { .. }
            | Self::HandleCount { .. }
            | Self::SizeQuery { .. } => ErrorKind::Configuration,
            Self::Allocation { .. } => ErrorKind::Allocation,
            Self::DeviceTimeout { .. } => ErrorKind::DeviceTimeout,
            Self::Device { .. } => ErrorKind::Device,
            Self::InvalidState { .. } | Self::GateDestroyed => ErrorKind::InvalidState,
        }
    }
}
