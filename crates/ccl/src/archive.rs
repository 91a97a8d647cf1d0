//! Archive assembly (preamble, header table, cell blocks) and reading.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::bits::{bit_pack, bit_unpack};
use crate::cell::{CellId, Segment, CELL_COUNT, LAT_CELLS, LON_CELLS};
use crate::error::{CclError, Result};
use crate::segment::{decode_segment, encode_segment};
use crate::stage::SegmentStage;

/// Size of the NUL-padded ASCII version preamble.
pub const VERSION_LEN: usize = 128;
/// Three 32-bit fields per cell.
pub const HEADER_ENTRY_LEN: usize = 12;
/// File offset of the first header entry.
pub const HEADER_OFFSET: u64 = VERSION_LEN as u64;
/// File offset of the first cell block.
pub const DATA_OFFSET: u64 = HEADER_OFFSET + (CELL_COUNT * HEADER_ENTRY_LEN) as u64;

/// One header-table record. `offset` is an absolute file offset, 0 for an
/// empty cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellEntry {
    pub offset: u32,
    pub segment_count: u32,
    pub vertex_count: u32,
}

impl CellEntry {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segment_count == 0
    }

    /// Three MSB-first 32-bit fields.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_ENTRY_LEN]> {
        let mut buf = [0u8; HEADER_ENTRY_LEN];
        bit_pack(&mut buf, 0, 32, self.offset)?;
        bit_pack(&mut buf, 32, 32, self.segment_count)?;
        bit_pack(&mut buf, 64, 32, self.vertex_count)?;
        Ok(buf)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_ENTRY_LEN {
            return Err(CclError::Truncated("header entry"));
        }

        Ok(Self {
            offset: bit_unpack(buf, 0, 32)?,
            segment_count: bit_unpack(buf, 32, 32)?,
            vertex_count: bit_unpack(buf, 64, 32)?,
        })
    }
}

/// Totals for a written or verified archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Cells with at least one segment.
    pub cells: usize,
    pub segments: u64,
    pub vertices: u64,
    /// Total file length.
    pub bytes: u64,
}

/// Version text plus a newline, NUL padded to [`VERSION_LEN`].
pub fn preamble_bytes(version: &str) -> Result<[u8; VERSION_LEN]> {
    if !version.is_ascii() {
        return Err(CclError::InvalidData("version string must be ASCII".into()));
    }

    // At least one NUL must follow the newline.
    if version.len() + 2 > VERSION_LEN {
        return Err(CclError::VersionTooLong(version.len()));
    }

    let mut buf = [0u8; VERSION_LEN];
    buf[..version.len()].copy_from_slice(version.as_bytes());
    buf[version.len()] = b'\n';
    Ok(buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Preamble,
    HeaderReserved,
    Streaming { last: CellId },
    Done,
}

impl WriterState {
    fn name(self) -> &'static str {
        match self {
            WriterState::Preamble => "Preamble",
            WriterState::HeaderReserved => "HeaderReserved",
            WriterState::Streaming { .. } => "Streaming",
            WriterState::Done => "Done",
        }
    }
}

/// Streams cell blocks into an archive and back-patches their header entries.
///
/// Cells must be written in row-major order. Each header entry is rewritten
/// only after the cell's last byte has gone out, and the stream is returned
/// to end-of-file before the next cell starts.
pub struct ArchiveWriter<W: Write + Seek> {
    inner: W,
    state: WriterState,
    end: u64,
    summary: ArchiveSummary,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Write the preamble and an all-zero header table to `inner`, which is
    /// expected to be empty and positioned at its start.
    pub fn create(inner: W, version: &str) -> Result<Self> {
        let mut writer = Self {
            inner,
            state: WriterState::Preamble,
            end: 0,
            summary: ArchiveSummary::default(),
        };

        writer.write_preamble(version)?;
        writer.reserve_header()?;

        Ok(writer)
    }

    fn write_preamble(&mut self, version: &str) -> Result<()> {
        if self.state != WriterState::Preamble {
            return Err(CclError::InvalidState(self.state.name(), "write preamble"));
        }

        let preamble = preamble_bytes(version)?;
        self.inner.write_all(&preamble)?;
        self.end = HEADER_OFFSET;

        Ok(())
    }

    fn reserve_header(&mut self) -> Result<()> {
        if self.state != WriterState::Preamble || self.end != HEADER_OFFSET {
            return Err(CclError::InvalidState(self.state.name(), "reserve header"));
        }

        let empty = CellEntry::default().to_bytes()?;
        let mut table = Vec::with_capacity(CELL_COUNT * HEADER_ENTRY_LEN);

        for _ in 0..CELL_COUNT {
            table.extend_from_slice(&empty);
        }

        self.inner.write_all(&table)?;
        self.end = DATA_OFFSET;
        self.state = WriterState::HeaderReserved;

        Ok(())
    }

    /// Current end of file, where the next cell block will start.
    pub fn position(&self) -> u64 {
        self.end
    }

    /// Encode `segments` as the block of `cell` and record its header entry.
    ///
    /// Segments with fewer than two vertices are skipped. A cell with no
    /// storable segments writes nothing and keeps its zero entry.
    pub fn write_cell<I>(&mut self, cell: CellId, segments: I) -> Result<CellEntry>
    where
        I: IntoIterator<Item = Segment>,
    {
        match self.state {
            WriterState::HeaderReserved => {}
            WriterState::Streaming { last } if cell > last => {}
            WriterState::Streaming { last } => return Err(CclError::OutOfOrder { cell, last }),
            state => return Err(CclError::InvalidState(state.name(), "write cell")),
        }

        self.state = WriterState::Streaming { last: cell };

        let start = self.end;
        let offset = u32::try_from(start).map_err(|_| CclError::OffsetOverflow(start))?;
        let mut entry = CellEntry::default();

        for segment in segments {
            if !segment.is_storable() {
                continue;
            }

            let encoded = encode_segment(&segment)?;
            self.inner.write_all(&encoded.bytes)?;
            self.end += encoded.bytes.len() as u64;

            entry.segment_count = entry
                .segment_count
                .checked_add(1)
                .ok_or(CclError::CountOverflow(cell))?;
            entry.vertex_count = entry
                .vertex_count
                .checked_add(encoded.vertex_count)
                .ok_or(CclError::CountOverflow(cell))?;
        }

        if entry.is_empty() {
            return Ok(entry);
        }

        entry.offset = offset;
        self.patch_entry(cell, &entry)?;

        self.summary.cells += 1;
        self.summary.segments += entry.segment_count as u64;
        self.summary.vertices += entry.vertex_count as u64;

        Ok(entry)
    }

    fn patch_entry(&mut self, cell: CellId, entry: &CellEntry) -> Result<()> {
        let at = HEADER_OFFSET + (cell.index() * HEADER_ENTRY_LEN) as u64;
        let bytes = entry.to_bytes()?;

        self.inner.flush()?;
        self.inner.seek(SeekFrom::Start(at))?;
        self.inner.write_all(&bytes)?;
        self.inner.seek(SeekFrom::Start(self.end))?;

        Ok(())
    }

    /// Flush and hand back the stream with the run totals.
    pub fn finish(mut self) -> Result<(W, ArchiveSummary)> {
        if matches!(self.state, WriterState::Preamble | WriterState::Done) {
            return Err(CclError::InvalidState(self.state.name(), "finish"));
        }

        self.inner.flush()?;
        self.state = WriterState::Done;
        self.summary.bytes = self.end;

        Ok((self.inner, self.summary))
    }
}

/// Drain every cell of `stage` in archive order into `writer`.
pub fn assemble<W, S>(mut writer: ArchiveWriter<W>, stage: &mut S) -> Result<(W, ArchiveSummary)>
where
    W: Write + Seek,
    S: SegmentStage + ?Sized,
{
    let mut last_percent = None;

    for cell in CellId::all() {
        let segments = stage.drain(cell)?;
        let entry = writer.write_cell(cell, segments)?;

        if !entry.is_empty() {
            debug!(
                "cell {}: {} segments, {} vertices at {}",
                cell, entry.segment_count, entry.vertex_count, entry.offset
            );
        }

        if cell.lon() == LON_CELLS - 1 {
            let percent = cell.lat() * 100 / LAT_CELLS;
            if last_percent != Some(percent) {
                debug!("{:03}% packed", percent);
                last_percent = Some(percent);
            }
        }
    }

    writer.finish()
}

/// Read-only view over archive bytes.
pub struct CoastlineArchive<B> {
    bytes: B,
    version: String,
    entries: Vec<CellEntry>,
}

impl<B: AsRef<[u8]>> CoastlineArchive<B> {
    /// Parse the preamble and header table; cell blocks are decoded lazily.
    pub fn new(bytes: B) -> Result<Self> {
        let data = bytes.as_ref();

        if (data.len() as u64) < DATA_OFFSET {
            return Err(CclError::Truncated("archive header"));
        }

        let preamble = &data[..VERSION_LEN];
        let text_len = preamble.iter().position(|&b| b == 0).unwrap_or(VERSION_LEN);
        let version = String::from_utf8_lossy(&preamble[..text_len])
            .trim_end_matches('\n')
            .to_owned();

        let mut entries = Vec::with_capacity(CELL_COUNT);

        for (index, raw) in data[VERSION_LEN..DATA_OFFSET as usize]
            .chunks_exact(HEADER_ENTRY_LEN)
            .enumerate()
        {
            let entry = CellEntry::from_bytes(raw)?;

            if !entry.is_empty()
                && ((entry.offset as u64) < DATA_OFFSET || entry.offset as usize >= data.len())
            {
                return Err(CclError::InvalidData(format!(
                    "cell {} offset {} outside data area",
                    CellId::from_index(index)?,
                    entry.offset
                )));
            }

            entries.push(entry);
        }

        Ok(Self {
            bytes,
            version,
            entries,
        })
    }

    /// Version text without the trailing newline and padding.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn entry(&self, cell: CellId) -> CellEntry {
        self.entries[cell.index()]
    }

    /// All entries in archive order.
    pub fn entries(&self) -> impl Iterator<Item = (CellId, CellEntry)> + '_ {
        CellId::all().zip(self.entries.iter().copied())
    }

    /// Entries of cells that hold data.
    pub fn populated(&self) -> impl Iterator<Item = (CellId, CellEntry)> + '_ {
        self.entries().filter(|(_, entry)| !entry.is_empty())
    }

    /// Decode every segment of `cell`.
    pub fn cell_segments(&self, cell: CellId) -> Result<Vec<Segment>> {
        Ok(self.walk_cell(cell)?.0)
    }

    /// Bytes occupied by the block of `cell`, found by walking its segments.
    pub fn cell_block_len(&self, cell: CellId) -> Result<usize> {
        Ok(self.walk_cell(cell)?.1)
    }

    fn walk_cell(&self, cell: CellId) -> Result<(Vec<Segment>, usize)> {
        let entry = self.entry(cell);

        if entry.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let data = self.bytes.as_ref();
        let mut p = &data[entry.offset as usize..];
        let mut used = 0usize;
        let mut vertices = 0u64;
        // The smallest encoded segment is 14 bytes.
        let capacity = (entry.segment_count as usize).min(p.len() / 14);
        let mut segments = Vec::with_capacity(capacity);

        for _ in 0..entry.segment_count {
            let (segment, len) = decode_segment(p)?;
            p = &p[len..];
            used += len;
            vertices += segment.len() as u64;
            segments.push(segment);
        }

        if vertices != entry.vertex_count as u64 {
            return Err(CclError::InvalidData(format!(
                "cell {} decodes {} vertices, header says {}",
                cell, vertices, entry.vertex_count
            )));
        }

        Ok((segments, used))
    }

    /// Walk every populated cell and check that blocks tile the data area
    /// exactly: each block ends where the next populated cell begins and the
    /// last one ends at end of file.
    pub fn verify(&self) -> Result<ArchiveSummary> {
        let data_len = self.bytes.as_ref().len() as u64;
        let mut expected = DATA_OFFSET;
        let mut summary = ArchiveSummary {
            bytes: data_len,
            ..ArchiveSummary::default()
        };

        for (cell, entry) in self.populated() {
            if entry.offset as u64 != expected {
                return Err(CclError::InvalidData(format!(
                    "cell {} starts at {}, previous block ended at {}",
                    cell, entry.offset, expected
                )));
            }

            expected += self.cell_block_len(cell)? as u64;

            summary.cells += 1;
            summary.segments += entry.segment_count as u64;
            summary.vertices += entry.vertex_count as u64;
        }

        if expected != data_len {
            return Err(CclError::InvalidData(format!(
                "data ends at {}, file is {} bytes",
                expected, data_len
            )));
        }

        Ok(summary)
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }
}

#[cfg(feature = "mmap")]
pub type FileBytes = memmap2::Mmap;

#[cfg(not(feature = "mmap"))]
pub type FileBytes = Vec<u8>;

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<CoastlineArchive<FileBytes>> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    CoastlineArchive::new(map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<CoastlineArchive<FileBytes>> {
    let bytes = std::fs::read(path)?;
    CoastlineArchive::new(bytes)
}

/// Create `path` and return a buffered archive writer over it.
pub fn create_file<P: AsRef<Path>>(
    path: P,
    version: &str,
) -> Result<ArchiveWriter<std::io::BufWriter<File>>> {
    let file = File::create(path)?;
    ArchiveWriter::create(std::io::BufWriter::new(file), version)
}
