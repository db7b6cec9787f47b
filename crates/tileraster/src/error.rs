use std::io;
use std::path::PathBuf;

use crate::layer::RasterLayer;

/// Failure while producing one raster layer for one tile.
///
/// Cancellation is deliberately absent: a cancelled build returns an empty
/// raster and the worker stops on its own cancellation check.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("raster file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("raster file {} is corrupt: {source}", path.display())]
    CorruptData {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to rasterize {}: {reason}", path.display())]
    Rasterization { path: PathBuf, reason: String },

    #[error("invalid tile name '{0}'")]
    InvalidTileName(String),

    #[error("builder is missing its {0}")]
    NotConfigured(&'static str),

    /// A builder panicked; the worker caught it and kept going.
    #[error("builder panicked: {0}")]
    Panicked(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Classifies an error coming out of the raster codec for `path`.
    pub(crate) fn from_read(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => BuildError::NotFound { path },
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                BuildError::CorruptData { path, source }
            }
            _ => BuildError::Io { path, source },
        }
    }
}

/// First failure recorded on a tile during a run.
#[derive(Debug, thiserror::Error)]
#[error("{layer} layer of tile {tile} failed: {error}")]
pub struct LayerFailure {
    pub tile: String,
    pub layer: RasterLayer,
    #[source]
    pub error: BuildError,
}

/// Errors from loading class/value tables.
#[derive(Debug, thiserror::Error)]
pub enum ClassTableError {
    #[error("cannot read class tables {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid class tables JSON: {0}")]
    Json(#[from] serde_json::Error),
}
