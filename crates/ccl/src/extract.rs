//! Turning shape records into coastline segments for one cell.
//!
//! Vertices sitting on a cell edge are dropped and split the run they were
//! in, so the seam-closing edges of the water polygons never make it into the
//! archive. Runs shorter than two vertices are discarded.

use std::collections::VecDeque;

use crate::cell::{CellBounds, CellId, Segment, Vertex};

/// One record from a shape provider: ring start indices into `points`, and
/// the (lon, lat) vertices in degrees.
///
/// A record with no part starts (a multipoint, say) continues whatever run
/// the previous record left open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeRecord {
    pub part_starts: Vec<usize>,
    pub points: Vec<(f64, f64)>,
}

impl ShapeRecord {
    pub fn new(part_starts: Vec<usize>, points: Vec<(f64, f64)>) -> Self {
        Self {
            part_starts,
            points,
        }
    }

    /// Build a record from explicit rings.
    pub fn from_rings<R, I>(rings: R) -> Self
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut record = Self::default();

        for ring in rings {
            record.part_starts.push(record.points.len());
            record.points.extend(ring);
        }

        record
    }
}

/// Push-style extractor; state deliberately spans records of one dataset.
#[derive(Debug)]
pub struct SegmentExtractor {
    bounds: CellBounds,
    after_boundary: bool,
    current: Vec<Vertex>,
}

impl SegmentExtractor {
    pub fn new(cell: CellId) -> Self {
        Self::with_bounds(cell.bounds())
    }

    pub fn with_bounds(bounds: CellBounds) -> Self {
        Self {
            bounds,
            after_boundary: false,
            current: Vec::new(),
        }
    }

    /// Feed one record, appending every segment it closes to `out`.
    pub fn push_record(&mut self, record: &ShapeRecord, out: &mut Vec<Segment>) {
        if record.points.len() < 2 {
            return;
        }

        // The first part start is always index 0; later ones mark inner rings.
        let mut next_part = 1usize;

        for (j, &(lon, lat)) in record.points.iter().enumerate() {
            let mut start = j == 0 && !record.part_starts.is_empty();

            if self.after_boundary {
                start = true;
                self.after_boundary = false;
            }

            if next_part < record.part_starts.len() && record.part_starts[next_part] == j {
                start = true;
                next_part += 1;
            }

            if self.bounds.is_coincident(lon, lat) {
                self.after_boundary = true;
                continue;
            }

            if start {
                self.close(out);
            }

            self.current.push(Vertex::from_degrees(lon, lat));
        }
    }

    /// Close the open run, if it is long enough, at the end of a dataset.
    pub fn finish(mut self) -> Option<Segment> {
        let mut out = Vec::with_capacity(1);
        self.close(&mut out);
        out.pop()
    }

    fn close(&mut self, out: &mut Vec<Segment>) {
        if self.current.len() > 1 {
            out.push(Segment::new(std::mem::take(&mut self.current)));
        } else {
            self.current.clear();
        }
    }
}

/// Lazy segment stream over the records of one dataset.
pub struct Segments<I> {
    records: I,
    extractor: Option<SegmentExtractor>,
    ready: VecDeque<Segment>,
    scratch: Vec<Segment>,
}

/// Extract the segments of `cell` from a dataset's records.
pub fn extract_segments<I>(cell: CellId, records: I) -> Segments<I::IntoIter>
where
    I: IntoIterator<Item = ShapeRecord>,
{
    Segments {
        records: records.into_iter(),
        extractor: Some(SegmentExtractor::new(cell)),
        ready: VecDeque::new(),
        scratch: Vec::new(),
    }
}

impl<I> Iterator for Segments<I>
where
    I: Iterator<Item = ShapeRecord>,
{
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        loop {
            if let Some(segment) = self.ready.pop_front() {
                return Some(segment);
            }

            let extractor = self.extractor.as_mut()?;

            match self.records.next() {
                Some(record) => {
                    extractor.push_record(&record, &mut self.scratch);
                    self.ready.extend(self.scratch.drain(..));
                }
                None => return self.extractor.take().and_then(SegmentExtractor::finish),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> CellId {
        CellId::new(100, 0).unwrap()
    }

    fn scaled(points: &[(f64, f64)]) -> Vec<Vertex> {
        points.iter().map(|&(lon, lat)| Vertex::from_degrees(lon, lat)).collect()
    }

    #[test]
    fn test_boundary_vertex_dropped() {
        let record = ShapeRecord::from_rings([vec![
            (-179.999_999_5, 10.5),
            (-179.5, 10.25),
            (-179.25, 10.75),
        ]]);

        let segments: Vec<_> = extract_segments(cell(), [record]).collect();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].vertices(), scaled(&[(-179.5, 10.25), (-179.25, 10.75)]));
    }

    #[test]
    fn test_boundary_vertex_splits_run() {
        let record = ShapeRecord::from_rings([vec![
            (-179.9, 10.1),
            (-179.8, 10.2),
            (-179.7, 10.0), // on the southern edge
            (-179.6, 10.3),
            (-179.5, 10.4),
            (-179.4, 10.5),
        ]]);

        let segments: Vec<_> = extract_segments(cell(), [record]).collect();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[1].len(), 3);
        assert!(segments
            .iter()
            .flat_map(|s| s.vertices())
            .all(|v| v.y != Vertex::from_degrees(-179.7, 10.0).y));
    }

    #[test]
    fn test_single_vertex_runs_are_dropped() {
        let record = ShapeRecord::from_rings([vec![
            (-179.9, 10.1),
            (-179.0, 10.5), // east edge
            (-179.5, 10.5),
            (-179.5, 11.0), // north edge
            (-179.4, 10.6),
            (-179.3, 10.7),
        ]]);

        let segments: Vec<_> = extract_segments(cell(), [record]).collect();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].vertices(), scaled(&[(-179.4, 10.6), (-179.3, 10.7)]));
    }

    #[test]
    fn test_inner_ring_starts_new_segment() {
        let record = ShapeRecord::from_rings([
            vec![(-179.9, 10.1), (-179.8, 10.2), (-179.7, 10.3)],
            vec![(-179.5, 10.5), (-179.4, 10.6)],
        ]);

        let segments: Vec<_> = extract_segments(cell(), [record]).collect();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 3);
        assert_eq!(segments[1].len(), 2);
    }

    #[test]
    fn test_partless_record_continues_run() {
        let polygon = ShapeRecord::from_rings([vec![(-179.9, 10.1), (-179.8, 10.2)]]);
        let multipoint = ShapeRecord::new(vec![], vec![(-179.7, 10.3), (-179.6, 10.4)]);
        let next_polygon = ShapeRecord::from_rings([vec![(-179.5, 10.5), (-179.4, 10.6)]]);

        let segments: Vec<_> =
            extract_segments(cell(), [polygon, multipoint, next_polygon]).collect();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 4);
        assert_eq!(segments[1].len(), 2);
    }

    #[test]
    fn test_boundary_flag_carries_into_next_record() {
        let mut extractor = SegmentExtractor::new(cell());
        let mut out = Vec::new();

        let first = ShapeRecord::new(vec![], vec![(-179.9, 10.1), (-179.8, 10.2), (-179.0, 10.5)]);
        let second = ShapeRecord::new(vec![], vec![(-179.5, 10.5), (-179.4, 10.6)]);

        extractor.push_record(&first, &mut out);
        extractor.push_record(&second, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].vertices(), scaled(&[(-179.9, 10.1), (-179.8, 10.2)]));

        let last = extractor.finish().unwrap();
        assert_eq!(last.vertices(), scaled(&[(-179.5, 10.5), (-179.4, 10.6)]));
    }

    #[test]
    fn test_short_records_are_ignored() {
        let point = ShapeRecord::from_rings([vec![(-179.5, 10.5)]]);
        let empty = ShapeRecord::default();

        assert_eq!(extract_segments(cell(), [point, empty]).count(), 0);
    }
}
