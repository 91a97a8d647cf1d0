//! Error types for building and reading coastline archives.

use std::io;

use thiserror::Error;

use crate::cell::CellId;

/// Coordinate axis a range failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Lon,
    Lat,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Axis::Lon => "lon",
            Axis::Lat => "lat",
        })
    }
}

/// Errors that can occur while staging, encoding, assembling or reading.
///
/// Everything except `Io` and the reader-side variants describes a value the
/// format has no room for. Callers are expected to abort the run on any of
/// them; there is no partial-success mode.
#[derive(Error, Debug)]
pub enum CclError {
    /// A per-segment delta bias does not fit the 18-bit biased field.
    #[error("{axis} bias {bias} out of range (max +-{max})")]
    BiasOutOfRange { axis: Axis, bias: i64, max: i64 },

    /// A computed bit width cannot be stored in its 5-bit width field.
    #[error("{field} width {bits} is outside 1..=31")]
    WidthOverflow { field: &'static str, bits: u32 },

    /// A start coordinate does not fit its fixed-width field.
    #[error("start {axis} {value} does not fit in {bits} bits")]
    CoordinateOutOfRange { axis: Axis, value: i32, bits: u32 },

    /// Segments must hold at least two vertices to be encoded.
    #[error("segment has {len} vertices, need at least 2")]
    DegenerateSegment { len: usize },

    /// A bit field of the given width cannot be packed or unpacked.
    #[error("invalid bit field width {0}")]
    InvalidBitWidth(u32),

    /// A cell was written after a later cell.
    #[error("cell {cell} written out of order (last was {last})")]
    OutOfOrder { cell: CellId, last: CellId },

    /// Cell coordinates outside the 180 x 360 grid.
    #[error("cell lat={lat} lon={lon} is outside the 180x360 grid")]
    InvalidCell { lat: u32, lon: u32 },

    /// An archive offset does not fit the 32-bit header field.
    #[error("archive offset {0} exceeds 32 bits")]
    OffsetOverflow(u64),

    /// A cell's segment or vertex total does not fit its 32-bit header field.
    #[error("cell {0} count exceeds 32 bits")]
    CountOverflow(CellId),

    /// The version string leaves no room for the NUL terminator.
    #[error("version string is {0} bytes, at most 126 fit the preamble")]
    VersionTooLong(usize),

    /// The writer was used after `finish` or before the header was reserved.
    #[error("archive writer is in state {0}, cannot {1}")]
    InvalidState(&'static str, &'static str),

    /// Staged data for a cell could not be parsed back.
    #[error("malformed staged data for cell {cell}: {detail}")]
    MalformedStage { cell: CellId, detail: String },

    /// Archive or segment bytes ended early.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// Archive contents are inconsistent.
    #[error("invalid archive: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CclError>;
