//! Reading shapefile geometry into extractor records.

use std::path::Path;

use anyhow::{Context, Result};
use ccl::ShapeRecord;
use log::warn;
use shapefile::{Point, PointM, PointZ, Shape, ShapeReader};

trait LonLat {
    fn lon_lat(&self) -> (f64, f64);
}

impl LonLat for Point {
    fn lon_lat(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl LonLat for PointM {
    fn lon_lat(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl LonLat for PointZ {
    fn lon_lat(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

fn from_parts<'a, P, R>(parts: impl IntoIterator<Item = R>) -> ShapeRecord
where
    P: LonLat + 'a,
    R: IntoIterator<Item = &'a P>,
{
    ShapeRecord::from_rings(
        parts
            .into_iter()
            .map(|part| part.into_iter().map(LonLat::lon_lat)),
    )
}

fn from_points<'a, P: LonLat + 'a>(points: impl IntoIterator<Item = &'a P>) -> ShapeRecord {
    ShapeRecord::new(Vec::new(), points.into_iter().map(LonLat::lon_lat).collect())
}

/// Converts one shape. Polygon rings and polyline parts become record parts;
/// multipoints become a part-less record that continues the current run.
pub fn shape_record(shape: &Shape) -> Option<ShapeRecord> {
    let record = match shape {
        Shape::Polygon(p) => from_parts(p.rings().iter().map(|r| r.points())),
        Shape::PolygonM(p) => from_parts(p.rings().iter().map(|r| r.points())),
        Shape::PolygonZ(p) => from_parts(p.rings().iter().map(|r| r.points())),
        Shape::Polyline(l) => from_parts(l.parts().iter()),
        Shape::PolylineM(l) => from_parts(l.parts().iter()),
        Shape::PolylineZ(l) => from_parts(l.parts().iter()),
        Shape::Multipoint(m) => from_points(m.points()),
        Shape::MultipointM(m) => from_points(m.points()),
        Shape::MultipointZ(m) => from_points(m.points()),
        Shape::NullShape => return None,
        other => {
            warn!("Skipping unsupported {:?} shape", other.shapetype());
            return None;
        }
    };

    Some(record)
}

/// Every usable record of a shapefile, plus its total vertex count.
pub fn read_records(path: &Path) -> Result<(Vec<ShapeRecord>, usize)> {
    let reader = ShapeReader::from_path(path)
        .with_context(|| format!("Failed to open shapefile {}", path.display()))?;
    let shapes = reader
        .read()
        .with_context(|| format!("Failed to read shapes from {}", path.display()))?;

    let records: Vec<ShapeRecord> = shapes.iter().filter_map(shape_record).collect();
    let vertices = records.iter().map(|r| r.points.len()).sum();

    Ok((records, vertices))
}
