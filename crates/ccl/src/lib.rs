//! CCL: compact coastline archive over a global grid of one-degree cells.
//!
//! - Coordinates are normalized to non-negative degrees (lon + 180, lat + 90)
//!   and stored as integers at 1e-5 degree resolution.
//! - Each cell holds coastline segments; vertices on a cell edge are dropped.
//! - Segments are delta coded with per-segment bit widths and biases and
//!   bit-packed MSB first, so files are identical on every architecture.
//!
//! File layout:
//!   0000   : [u8;128]        ASCII version string + "\n", NUL padded
//!   0080   : 64800 x 12      header entries, cell index = lat * 360 + lon
//!                            (south to north, west to east from -90/-180)
//!                            each: u32 offset, u32 segments, u32 vertices,
//!                            packed as 32-bit MSB-first fields
//!   BDE00  : cell blocks     concatenated segment buffers (see [`segment`]);
//!                            only the header entry locates a block
//!
//! An empty cell has an all-zero entry and no block. Offsets are absolute
//! file positions.

pub mod archive;
pub mod bits;
pub mod cell;
pub mod error;
pub mod extract;
pub mod segment;
pub mod stage;

pub use archive::{
    assemble, create_file, preamble_bytes, read_file, ArchiveSummary, ArchiveWriter, CellEntry,
    CoastlineArchive, DATA_OFFSET, HEADER_ENTRY_LEN, HEADER_OFFSET, VERSION_LEN,
};
pub use cell::{CellBounds, CellId, Segment, Vertex, CELL_COUNT, LAT_CELLS, LON_CELLS};
pub use error::{Axis, CclError, Result};
pub use extract::{extract_segments, SegmentExtractor, Segments, ShapeRecord};
pub use segment::{decode_segment, encode_segment, EncodedSegment, SegmentLayout, MAX_BIAS};
pub use stage::{MemoryStage, ScratchStage, SegmentStage};

/// Conventional archive file extension.
pub const CCL_EXTENSION: &str = "ccl";

/// Preamble text used when the caller does not supply one.
pub const DEFAULT_VERSION: &str = "CCL coastline archive V1.00";
