//! Per-cell accumulation of extracted segments between the two passes.
//!
//! A cell can receive segments from several source datasets, so segments are
//! appended as they are extracted and drained once, in archive order, when the
//! cell is encoded. Draining discards the cell's accumulation.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::cell::{CellId, Segment, Vertex};
use crate::error::{CclError, Result};

/// Append-only, drain-once segment store keyed by cell.
pub trait SegmentStage {
    /// Add a segment to `cell`. Segments shorter than two vertices are ignored.
    fn append(&mut self, cell: CellId, segment: &Segment) -> Result<()>;

    /// Remove and return everything staged for `cell`, in append order.
    fn drain(&mut self, cell: CellId) -> Result<Vec<Segment>>;
}

/// Keeps every staged segment in memory.
#[derive(Debug, Default)]
pub struct MemoryStage {
    cells: HashMap<CellId, Vec<Segment>>,
}

impl MemoryStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells with staged segments.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

impl SegmentStage for MemoryStage {
    fn append(&mut self, cell: CellId, segment: &Segment) -> Result<()> {
        if segment.is_storable() {
            self.cells.entry(cell).or_default().push(segment.clone());
        }

        Ok(())
    }

    fn drain(&mut self, cell: CellId) -> Result<Vec<Segment>> {
        Ok(self.cells.remove(&cell).unwrap_or_default())
    }
}

/// Stages each cell in its own scratch file under a directory.
///
/// Record format: little-endian `i32` vertex count, then that many `i32`
/// (x, y) pairs.
#[derive(Debug)]
pub struct ScratchStage {
    dir: PathBuf,
}

impl ScratchStage {
    /// Use `dir` for scratch files, creating it if needed and removing any
    /// cell files an earlier, interrupted run left behind.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let stage = Self { dir };
        let mut stale = 0usize;

        for cell in CellId::all() {
            match fs::remove_file(stage.path(cell)) {
                Ok(()) => stale += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if stale > 0 {
            debug!("Removed {} stale cell files from {}", stale, stage.dir.display());
        }

        Ok(stage)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, cell: CellId) -> PathBuf {
        self.dir.join(format!("cell_{:03}_{:03}", cell.lon(), cell.lat()))
    }
}

impl SegmentStage for ScratchStage {
    fn append(&mut self, cell: CellId, segment: &Segment) -> Result<()> {
        if !segment.is_storable() {
            return Ok(());
        }

        let vertices = segment.vertices();
        let count = i32::try_from(vertices.len()).map_err(|_| CclError::MalformedStage {
            cell,
            detail: format!("segment of {} vertices", vertices.len()),
        })?;

        let mut record = Vec::with_capacity(4 + vertices.len() * 8);
        record.extend_from_slice(&count.to_le_bytes());

        for v in vertices {
            record.extend_from_slice(&v.x.to_le_bytes());
            record.extend_from_slice(&v.y.to_le_bytes());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(cell))?;

        file.write_all(&record)?;

        Ok(())
    }

    fn drain(&mut self, cell: CellId) -> Result<Vec<Segment>> {
        let path = self.path(cell);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let segments = parse_records(cell, &bytes)?;
        fs::remove_file(&path)?;

        Ok(segments)
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if buf.len() < n {
        return None;
    }

    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Some(head)
}

#[inline(always)]
fn le_i32(buf: &mut &[u8]) -> Option<i32> {
    let b = take(buf, 4)?;
    Some(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn parse_records(cell: CellId, mut p: &[u8]) -> Result<Vec<Segment>> {
    let malformed = |detail: String| CclError::MalformedStage { cell, detail };
    let mut segments = Vec::new();

    while !p.is_empty() {
        let count = le_i32(&mut p).ok_or_else(|| malformed("truncated vertex count".into()))?;

        if count < 0 {
            return Err(malformed(format!("negative vertex count {}", count)));
        }

        let mut vertices = Vec::with_capacity((count as usize).min(p.len() / 8));

        for k in 0..count {
            let (x, y) = match (le_i32(&mut p), le_i32(&mut p)) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(malformed(format!(
                        "record ends after {} of {} vertices",
                        k, count
                    )))
                }
            };

            vertices.push(Vertex::new(x, y));
        }

        if vertices.len() > 1 {
            segments.push(Segment::new(vertices));
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(points: &[(i32, i32)]) -> Segment {
        Segment::new(points.iter().map(|&(x, y)| Vertex::new(x, y)).collect())
    }

    fn exercise<S: SegmentStage>(stage: &mut S) {
        let a = CellId::new(10, 20).unwrap();
        let b = CellId::new(10, 21).unwrap();

        let first = seg(&[(1, 2), (3, 4)]);
        let second = seg(&[(5, 6), (7, 8), (9, 10)]);
        let other = seg(&[(11, 12), (13, 14)]);

        stage.append(a, &first).unwrap();
        stage.append(b, &other).unwrap();
        stage.append(a, &seg(&[(99, 99)])).unwrap();
        stage.append(a, &second).unwrap();

        assert_eq!(stage.drain(a).unwrap(), vec![first, second]);
        assert!(stage.drain(a).unwrap().is_empty());
        assert_eq!(stage.drain(b).unwrap(), vec![other]);
        assert!(stage.drain(CellId::new(0, 0).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_memory_stage_append_drain() {
        let mut stage = MemoryStage::new();
        exercise(&mut stage);
        assert_eq!(stage.cell_count(), 0);
    }

    #[test]
    fn test_scratch_stage_append_drain() {
        let dir = tempfile::tempdir().unwrap();
        let mut stage = ScratchStage::new(dir.path()).unwrap();

        exercise(&mut stage);

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_scratch_stage_clears_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("cell_020_010");
        fs::write(&stale, [0xFFu8; 3]).unwrap();

        let mut stage = ScratchStage::new(dir.path()).unwrap();

        assert!(!stale.exists());
        assert!(stage.drain(CellId::new(10, 20).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_scratch_stage_truncated_record() {
        let dir = tempfile::tempdir().unwrap();
        let cell = CellId::new(1, 2).unwrap();
        let mut stage = ScratchStage::new(dir.path()).unwrap();

        stage.append(cell, &seg(&[(1, 1), (2, 2), (3, 3)])).unwrap();

        let path = dir.path().join("cell_002_001");
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, bytes).unwrap();

        match stage.drain(cell) {
            Err(CclError::MalformedStage { cell: c, .. }) => assert_eq!(c, cell),
            other => panic!("expected malformed stage, got {:?}", other),
        }
    }
}
