//! Error types for the export pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Why a page-range expression was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// The comic reports zero pages, so nothing can be selected.
    #[error("the comic has no pages")]
    NoPages,

    /// A comma produced an empty token (leading, trailing or doubled comma).
    #[error("empty page range at position {position}")]
    EmptyToken { position: usize },

    /// Not a number and not a `low-high` pair.
    #[error("'{token}' is not a page number or a page range")]
    Malformed { token: String },

    /// A page outside `1..=total`.
    #[error("'{token}' is outside the comic's pages (1-{total})")]
    OutOfBounds { token: String, total: u32 },

    /// A range whose low end is not below its high end.
    #[error("'{token}' is a reversed or empty range")]
    Reversed { token: String },
}

/// What was wrong with a page's tiles when it was composited.
#[derive(Debug, Clone, PartialEq)]
pub enum TileDefect {
    MissingContainer,
    Count { expected: usize, found: usize },
    NotLoaded { index: usize },
    BadOffset { index: usize, value: String },
    Misordered { index: usize },
}

impl std::fmt::Display for TileDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileDefect::MissingContainer => write!(f, "page container is not rendered"),
            TileDefect::Count { expected, found } => {
                write!(f, "expected {expected} tiles, found {found}")
            }
            TileDefect::NotLoaded { index } => write!(f, "tile {index} has not finished loading"),
            TileDefect::BadOffset { index, value } => {
                write!(f, "tile {index} has an unusable vertical offset '{value}'")
            }
            TileDefect::Misordered { index } => {
                write!(f, "tile {index} sits above the tile before it")
            }
        }
    }
}

/// Errors that abort an export job (or, for `InvalidRange`, prevent one).
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("invalid page range: {0}")]
    InvalidRange(#[from] RangeError),

    #[error("page {page} did not finish rendering within {waited:?}")]
    PageLoadTimeout { page: u32, waited: Duration },

    #[error("page {page} cannot be composited: {defect}")]
    IncompleteTile { page: u32, defect: TileDefect },

    #[error("host reader: {0}")]
    Host(String),

    #[error("failed to encode page {page}: {source}")]
    Encode {
        page: u32,
        #[source]
        source: image::ImageError,
    },

    #[error("archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to save {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export was cancelled")]
    Cancelled,
}

impl ExportError {
    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    /// Validation errors never start a job; everything else ends one.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, ExportError::InvalidRange(_))
    }
}
