//! Locating the source shapefiles of each one-degree cell.
//!
//! SWBD files are named after the south-west corner of their cell, e.g.
//! `w180s90a.shp` for the cell at -180/-90 or `e010n45e.shp` for 10/45. The
//! trailing letter names the regional collection the file came from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ccl::CellId;
use log::warn;
use walkdir::WalkDir;

/// Collection suffixes, in lookup order.
pub const DATASET_SUFFIXES: [char; 6] = ['a', 'e', 'f', 'i', 'n', 's'];

/// File stem (without suffix letter) for a cell.
pub fn cell_stem(cell: CellId) -> String {
    let lon = cell.lon() as i32 - 180;
    let lat = cell.lat() as i32 - 90;

    let (lon_hem, lon_deg) = if lon < 0 { ('w', -lon) } else { ('e', lon) };
    let (lat_hem, lat_deg) = if lat < 0 { ('s', -lat) } else { ('n', lat) };

    format!("{}{:03}{}{:02}", lon_hem, lon_deg, lat_hem, lat_deg)
}

/// Shapefiles found under the input directory, keyed by lower-cased stem.
#[derive(Default)]
pub struct DatasetIndex {
    by_stem: HashMap<String, PathBuf>,
}

impl DatasetIndex {
    pub fn build(input_dir: &Path) -> Self {
        let mut index = DatasetIndex::default();

        // Walk the directory tree, following symlinks, and collect only regular files.
        for entry in WalkDir::new(input_dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.into_path();

            let is_shp = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("shp"))
                .unwrap_or(false);

            if !is_shp {
                continue;
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();

            if let Some(existing) = index.by_stem.get(&stem) {
                warn!(
                    "Ignoring {}: {} already provides {}",
                    path.display(),
                    existing.display(),
                    stem
                );
                continue;
            }

            index.by_stem.insert(stem, path);
        }

        index
    }

    pub fn len(&self) -> usize {
        self.by_stem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_stem.is_empty()
    }

    /// Every dataset covering `cell`, in suffix order. Empty when the cell has
    /// no source data.
    pub fn datasets_for(&self, cell: CellId) -> Vec<&Path> {
        let stem = cell_stem(cell);

        DATASET_SUFFIXES
            .iter()
            .filter_map(|suffix| self.by_stem.get(&format!("{}{}", stem, suffix)))
            .map(PathBuf::as_path)
            .collect()
    }
}
