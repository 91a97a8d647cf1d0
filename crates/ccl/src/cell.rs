//! One-degree tiling, fixed-point vertices and segments.

use std::fmt;

use crate::error::{CclError, Result};

/// Number of one-degree latitude bands.
pub const LAT_CELLS: u32 = 180;
/// Number of one-degree longitude bands.
pub const LON_CELLS: u32 = 360;
/// Total cells in the archive header.
pub const CELL_COUNT: usize = (LAT_CELLS * LON_CELLS) as usize;

/// Fixed-point scale: 1e-5 degrees per unit (about 1 m at the equator).
pub const UNITS_PER_DEGREE: f64 = 100_000.0;

/// Arc-seconds per degree, the space boundary checks run in.
pub const ARCSEC_PER_DEGREE: f64 = 3600.0;

/// A normalized longitude of exactly 360 degrees is pulled back to this.
pub const LON_WRAP_CLAMP: f64 = 359.99999;

/// Longitude seam tolerance in arc-seconds. Slightly looser than latitude to
/// absorb the fuzz SWBD longitudes pick up away from the equator.
pub const LON_SEAM_TOLERANCE: f64 = 1.0 + f64::EPSILON;
/// Latitude seam tolerance in arc-seconds.
pub const LAT_SEAM_TOLERANCE: f64 = 1.0;

/// A one-degree cell. `lat` 0 is the band [-90, -89), `lon` 0 is [-180, -179).
///
/// Ordering is row-major (south to north, then west to east), the same order
/// cells are laid out in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId {
    lat: u16,
    lon: u16,
}

impl CellId {
    pub fn new(lat: u32, lon: u32) -> Result<Self> {
        if lat >= LAT_CELLS || lon >= LON_CELLS {
            return Err(CclError::InvalidCell { lat, lon });
        }

        Ok(Self {
            lat: lat as u16,
            lon: lon as u16,
        })
    }

    /// Cell containing the given geographic degrees, if any.
    pub fn containing(lon_deg: f64, lat_deg: f64) -> Option<Self> {
        let lon = (lon_deg + 180.0).floor();
        let lat = (lat_deg + 90.0).floor();

        if !(0.0..LON_CELLS as f64).contains(&lon) || !(0.0..LAT_CELLS as f64).contains(&lat) {
            return None;
        }

        Some(Self {
            lat: lat as u16,
            lon: lon as u16,
        })
    }

    pub fn from_index(index: usize) -> Result<Self> {
        if index >= CELL_COUNT {
            return Err(CclError::InvalidCell {
                lat: (index / LON_CELLS as usize) as u32,
                lon: (index % LON_CELLS as usize) as u32,
            });
        }

        Ok(Self {
            lat: (index / LON_CELLS as usize) as u16,
            lon: (index % LON_CELLS as usize) as u16,
        })
    }

    #[inline]
    pub fn lat(self) -> u32 {
        self.lat as u32
    }

    #[inline]
    pub fn lon(self) -> u32 {
        self.lon as u32
    }

    /// Row-major position in the header table.
    #[inline]
    pub fn index(self) -> usize {
        self.lat as usize * LON_CELLS as usize + self.lon as usize
    }

    /// Every cell in archive order.
    pub fn all() -> impl Iterator<Item = CellId> {
        (0..CELL_COUNT).map(|index| CellId {
            lat: (index / LON_CELLS as usize) as u16,
            lon: (index % LON_CELLS as usize) as u16,
        })
    }

    /// Cell edges in normalized arc-seconds.
    pub fn bounds(self) -> CellBounds {
        let x0 = self.lon as f64 * ARCSEC_PER_DEGREE;
        let y0 = self.lat as f64 * ARCSEC_PER_DEGREE;

        CellBounds {
            corner_x: [x0, x0 + ARCSEC_PER_DEGREE],
            corner_y: [y0, y0 + ARCSEC_PER_DEGREE],
        }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}/{:03}", self.lat, self.lon)
    }
}

/// Cell edges after adding 180/90 to lon/lat and converting to arc-seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub corner_x: [f64; 2],
    pub corner_y: [f64; 2],
}

impl CellBounds {
    /// True when the raw (lon, lat) degrees sit on one of the cell edges.
    ///
    /// SWBD water polygons are closed along the tile seams; those closure
    /// vertices are not coastline.
    pub fn is_coincident(&self, lon_deg: f64, lat_deg: f64) -> bool {
        let slon = (lon_deg + 180.0) * ARCSEC_PER_DEGREE;
        let slat = (lat_deg + 90.0) * ARCSEC_PER_DEGREE;

        (slon - self.corner_x[0]).abs() < LON_SEAM_TOLERANCE
            || (slon - self.corner_x[1]).abs() < LON_SEAM_TOLERANCE
            || (slat - self.corner_y[0]).abs() < LAT_SEAM_TOLERANCE
            || (slat - self.corner_y[1]).abs() < LAT_SEAM_TOLERANCE
    }
}

/// A vertex in normalized fixed-point units: x in [0, 36000000), y in
/// [0, 18000000].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
}

impl Vertex {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Normalize and quantize geographic degrees.
    #[inline]
    pub fn from_degrees(lon_deg: f64, lat_deg: f64) -> Self {
        let mut lon = lon_deg + 180.0;
        let lat = lat_deg + 90.0;

        if lon == 360.0 {
            lon = LON_WRAP_CLAMP;
        }

        Self {
            x: (lon * UNITS_PER_DEGREE).round() as i32,
            y: (lat * UNITS_PER_DEGREE).round() as i32,
        }
    }

    /// Back to geographic (lon, lat) degrees.
    #[inline]
    pub fn to_degrees(self) -> (f64, f64) {
        (
            self.x as f64 / UNITS_PER_DEGREE - 180.0,
            self.y as f64 / UNITS_PER_DEGREE - 90.0,
        )
    }
}

/// A run of coastline vertices inside one cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    vertices: Vec<Vertex>,
}

impl Segment {
    pub fn new(vertices: Vec<Vertex>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn into_vertices(self) -> Vec<Vertex> {
        self.vertices
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Only segments with at least two vertices are stored.
    #[inline]
    pub fn is_storable(&self) -> bool {
        self.vertices.len() > 1
    }
}

impl From<Vec<Vertex>> for Segment {
    fn from(vertices: Vec<Vertex>) -> Self {
        Self::new(vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_index_row_major() {
        let first = CellId::new(0, 0).unwrap();
        let next = CellId::new(0, 1).unwrap();
        let row = CellId::new(1, 0).unwrap();
        let last = CellId::new(179, 359).unwrap();

        assert_eq!(first.index(), 0);
        assert_eq!(next.index(), 1);
        assert_eq!(row.index(), 360);
        assert_eq!(last.index(), CELL_COUNT - 1);
        assert!(next < row);
        assert_eq!(CellId::from_index(360).unwrap(), row);
        assert_eq!(CellId::all().count(), CELL_COUNT);
        assert_eq!(CellId::all().nth(361).unwrap(), CellId::new(1, 1).unwrap());
    }

    #[test]
    fn test_cell_rejects_outside_grid() {
        assert!(CellId::new(180, 0).is_err());
        assert!(CellId::new(0, 360).is_err());
        assert!(CellId::from_index(CELL_COUNT).is_err());
    }

    #[test]
    fn test_containing_cell() {
        assert_eq!(CellId::containing(-180.0, -90.0), Some(CellId::new(0, 0).unwrap()));
        assert_eq!(CellId::containing(-178.5, 10.25), Some(CellId::new(100, 1).unwrap()));
        assert_eq!(CellId::containing(180.0, 0.0), None);
    }

    #[test]
    fn test_bounds_in_arcseconds() {
        let b = CellId::new(100, 0).unwrap().bounds();
        assert_eq!(b.corner_x, [0.0, 3600.0]);
        assert_eq!(b.corner_y, [360_000.0, 363_600.0]);
    }

    #[test]
    fn test_seam_tolerance() {
        let b = CellId::new(100, 0).unwrap().bounds();

        // 0.0018 arc-seconds east of the -180 seam.
        assert!(b.is_coincident(-179.999_999_5, 10.5));
        // Just under a second above the southern edge.
        assert!(b.is_coincident(-179.5, 10.0 + 0.99 / 3600.0));
        // Two seconds inside is kept.
        assert!(!b.is_coincident(-180.0 + 2.0 / 3600.0, 10.5));
        assert!(!b.is_coincident(-179.5, 10.5));
    }

    #[test]
    fn test_vertex_scaling() {
        let v = Vertex::from_degrees(-179.0, 10.0);
        assert_eq!(v, Vertex::new(100_000, 10_000_000));
        assert_eq!(v.to_degrees(), (-179.0, 10.0));

        // Rounds to nearest, not truncates.
        assert_eq!(Vertex::from_degrees(-180.0 + 0.000_006, -90.0).x, 1);

        // The date line wraps back inside the grid.
        assert_eq!(Vertex::from_degrees(180.0, 0.0).x, 35_999_999);
        assert_eq!(Vertex::from_degrees(0.0, 90.0).y, 18_000_000);
    }
}
