mod datasets;
mod shapes;

use anyhow::{bail, ensure, Context, Result};
use ccl::{
    assemble, create_file, extract_segments, read_file, ArchiveSummary, CellId, MemoryStage,
    ScratchStage, SegmentStage, CCL_EXTENSION, DEFAULT_VERSION, LAT_CELLS, LON_CELLS,
};
use clap::Parser;
use log::{debug, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use datasets::DatasetIndex;

/// Convert SWBD water-body shapefiles into a single CCL coastline archive.
#[derive(Parser, Debug, Clone)]
#[command(name = "shp2ccl", version)]
struct Args {
    /// Directory searched recursively for `.shp` files
    input_dir: PathBuf,

    /// Output archive; `.ccl` is appended when missing
    output_file: PathBuf,

    /// Where per-cell scratch files go (default: a temporary directory)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Stage segments in memory instead of scratch files
    #[arg(long, default_value_t = false, conflicts_with = "scratch_dir")]
    in_memory: bool,

    /// Version text stored in the archive preamble (at most 126 bytes)
    #[arg(long, default_value = DEFAULT_VERSION)]
    file_version: String,

    /// Re-read the finished archive and check every cell decodes
    #[arg(long, default_value_t = false)]
    verify: bool,
}

/// `name` with `.ccl` appended unless it already ends that way.
fn output_path(name: &Path) -> PathBuf {
    let has_ext = name
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(CCL_EXTENSION))
        .unwrap_or(false);

    if has_ext {
        return name.to_path_buf();
    }

    let mut os = name.as_os_str().to_owned();
    os.push(".");
    os.push(CCL_EXTENSION);
    PathBuf::from(os)
}

#[derive(Debug, Default)]
struct StageStats {
    datasets: usize,
    input_vertices: usize,
    segments: u64,
}

/// Pass 1: extract every cell's datasets into the stage.
fn stage_datasets<S: SegmentStage>(index: &DatasetIndex, stage: &mut S) -> Result<StageStats> {
    let mut stats = StageStats::default();

    for cell in CellId::all() {
        for path in index.datasets_for(cell) {
            let (records, vertices) = shapes::read_records(path)?;

            let mut segments = 0u64;
            for segment in extract_segments(cell, records) {
                stage
                    .append(cell, &segment)
                    .with_context(|| format!("Failed to stage segment for cell {}", cell))?;
                segments += 1;
            }

            debug!(
                "{}: {} vertices, {} segments for cell {}",
                path.display(),
                vertices,
                segments,
                cell
            );

            stats.datasets += 1;
            stats.input_vertices += vertices;
            stats.segments += segments;
        }

        if cell.lon() == LON_CELLS - 1 {
            debug!("{:03}% staged", (cell.lat() + 1) * 100 / LAT_CELLS);
        }
    }

    Ok(stats)
}

/// Both passes against one stage, plus the optional verification.
fn convert<S: SegmentStage>(
    args: &Args,
    index: &DatasetIndex,
    out: &Path,
    stage: &mut S,
) -> Result<ArchiveSummary> {
    let start = Instant::now();
    let stats = stage_datasets(index, stage)?;
    info!(
        "Pass 1: {} datasets, {} input vertices, {} segments staged in {:.1?}",
        stats.datasets,
        stats.input_vertices,
        stats.segments,
        start.elapsed()
    );

    let start = Instant::now();
    let writer = create_file(out, &args.file_version)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    let (_, summary) =
        assemble(writer, stage).with_context(|| format!("Failed to assemble {}", out.display()))?;
    info!(
        "Pass 2: {} cells, {} segments, {} vertices, {} bytes in {:.1?}",
        summary.cells,
        summary.segments,
        summary.vertices,
        summary.bytes,
        start.elapsed()
    );

    if args.verify {
        let archive =
            read_file(out).with_context(|| format!("Failed to reopen {}", out.display()))?;
        let checked = archive
            .verify()
            .with_context(|| format!("Verification of {} failed", out.display()))?;
        ensure!(
            checked == summary,
            "Verification mismatch: wrote {:?}, read back {:?}",
            summary,
            checked
        );
        info!("Verified {}", out.display());
    }

    Ok(summary)
}

/// [`convert`], removing the partial archive when it fails.
fn run<S: SegmentStage>(
    args: &Args,
    index: &DatasetIndex,
    out: &Path,
    stage: &mut S,
) -> Result<ArchiveSummary> {
    let result = convert(args, index, out, stage);

    if result.is_err() && out.exists() {
        if let Err(err) = fs::remove_file(out) {
            warn!("Failed to remove partial archive {}: {}", out.display(), err);
        }
    }

    result
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    if !args.input_dir.is_dir() {
        bail!("Input directory {} does not exist", args.input_dir.display());
    }

    let out = output_path(&args.output_file);

    // Index all shapefiles in the input directory.
    let index = DatasetIndex::build(&args.input_dir);
    if index.is_empty() {
        warn!("No shapefiles found under {}", args.input_dir.display());
    }
    info!(
        "Indexed {} shapefiles under {}",
        index.len(),
        args.input_dir.display()
    );

    let result = if args.in_memory {
        run(&args, &index, &out, &mut MemoryStage::new())
    } else {
        // A temporary directory lives until the archive is written.
        let (scratch_dir, _temp) = match &args.scratch_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("shp2ccl-")
                    .tempdir()
                    .context("Failed to create scratch directory")?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let mut stage = ScratchStage::new(&scratch_dir).with_context(|| {
            format!("Failed to prepare scratch directory {}", scratch_dir.display())
        })?;
        run(&args, &index, &out, &mut stage)
    };

    let summary = result?;
    info!(
        "Wrote {} ({} of {} cells populated)",
        out.display(),
        summary.cells,
        ccl::CELL_COUNT
    );

    Ok(())
}
