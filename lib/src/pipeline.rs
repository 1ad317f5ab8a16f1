//! Capture directory to assembled cube
//!
//! A capture directory holds `config.json`, the scan log and the data/index
//! chunk files of the four front-ends. `repack` turns it into
//! `mmw_array.bin`; `load_or_repack` reuses that file while it still matches
//! the configuration.
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::capture::{chunk_frame_count, ChunkFileSource, ChunkLayout};
use crate::config::{MmwConfig, ValidatedConfig};
use crate::device::{discover_device_files, ChunkFiles, Device};
use crate::errors::{FormatError, RepackError};
use crate::index::{read_index, IndexRecord};
use crate::persist::{load_cached_cube, AssembledCube, CubeFile};
use crate::reconstruct::{cube_shape, ConcurrentReconstructor, RepackReport};
use crate::scan::{map_scan_trajectory, ScanLine};
use crate::stream::WindowedFrameStream;
use crate::timeline::{DeviceTimeline, TimelineStats};

/// Default configuration file name inside a capture directory
pub const CONFIG_FILE: &str = "config.json";

/// Load the configuration of a capture directory.
///
/// # Arguments
/// * `dir` - The capture directory
/// * `path` - Explicit configuration file, instead of `<dir>/config.json`
pub fn load_config(dir: &Path, path: Option<&Path>) -> Result<ValidatedConfig, RepackError> {
    let path = path.map_or_else(|| dir.join(CONFIG_FILE), Path::to_path_buf);
    log::debug!("Using configuration {}", path.display());
    MmwConfig::load(&path)
}

/// Find the chunk files of every device.
///
/// Fails on the first device without data or index files, before anything
/// is read.
pub fn discover_capture(dir: &Path) -> Result<Vec<(Device, Vec<ChunkFiles>)>, RepackError> {
    Device::ALL
        .iter()
        .map(|&device| Ok((device, discover_device_files(dir, device)?)))
        .collect()
}

/// A malformed index header or record area fails validation of the capture;
/// read errors stay I/O errors.
fn index_violation(err: FormatError) -> RepackError {
    match err {
        FormatError::Io(e) => RepackError::Io(e),
        other => RepackError::Validation(other.to_string()),
    }
}

/// Read the index files of one device and build its timeline.
///
/// Also checks that every data chunk holds as many frames as its index lists.
fn device_timeline(
    device: Device,
    files: &[ChunkFiles],
    layout: ChunkLayout,
    offset_s: f64,
    periodicity_ms: f64,
) -> Result<DeviceTimeline, RepackError> {
    let mut chunks: Vec<Vec<IndexRecord>> = Vec::with_capacity(files.len());
    for chunk in files {
        let (_, records) = read_index(&chunk.index).map_err(index_violation)?;
        let frames = chunk_frame_count(&chunk.data, layout)?;
        if frames != records.len() {
            return Err(RepackError::Validation(format!(
                "{}: {} holds {} frames but its index lists {}",
                device,
                chunk.data.display(),
                frames,
                records.len()
            )));
        }
        chunks.push(records);
    }
    DeviceTimeline::build(&chunks, offset_s, periodicity_ms)
}

/// Scan lines of a capture, checked against the configured raster.
///
/// Returns the lines, the total time offset (s) applied to the device
/// timelines and the number of configured rows missing from the log.
fn scan_geometry(
    dir: &Path,
    config: &ValidatedConfig,
) -> Result<(Vec<ScanLine>, f64, usize), RepackError> {
    let log_path = dir.join(&config.bracket.profile.timestamps);
    let (lines, log_offset) = map_scan_trajectory(&log_path, config.cols(), config.periodicity_ms())?;

    if lines.len() > config.rows() {
        return Err(RepackError::Validation(format!(
            "scan log has {} rows, configuration allows {}",
            lines.len(),
            config.rows()
        )));
    }
    let missing = config.rows() - lines.len();
    if missing > 0 {
        log::warn!(
            "Scan log covers {} of {} rows; the last {} row(s) stay empty",
            lines.len(),
            config.rows(),
            missing
        );
    }

    let manual = config.bracket.profile.offset_time;
    let offset_s = log_offset + manual;
    log::info!(
        "Time offset {:.3} s (scan log {:.3} s, configured {:.3} s)",
        offset_s,
        log_offset,
        manual
    );
    Ok((lines, offset_s, missing))
}

/// Assemble the cube of a capture directory into `<dir>/mmw_array.bin`.
///
/// Nothing is left behind on failure. A recording that ends before the last
/// scan row is not a failure; see `RepackReport::is_partial`.
pub fn repack(
    dir: &Path,
    config: &ValidatedConfig,
    running: &AtomicBool,
) -> Result<(PathBuf, RepackReport), RepackError> {
    let files = discover_capture(dir)?;
    let (lines, offset_s, missing_scan_rows) = scan_geometry(dir, config)?;
    let layout = ChunkLayout::new(config.samples_per_chirp(), config.chirps_per_frame());
    log::info!(
        "Repacking {} scan rows of {} columns from {} (time offset {:.3} s)",
        lines.len(),
        config.cols(),
        dir.display(),
        offset_s
    );

    let mut streams = Vec::with_capacity(files.len());
    for (device, chunks) in files {
        let timeline = device_timeline(device, &chunks, layout, offset_s, config.periodicity_ms())?;
        let source = ChunkFileSource::new(chunks.into_iter().map(|c| c.data), layout);
        streams.push((device, WindowedFrameStream::new(source, timeline, layout)));
    }

    let reconstructor = ConcurrentReconstructor::new(config, running)?;
    let mut cube = CubeFile::create(dir, cube_shape(config))?;
    let devices = reconstructor.reconstruct_into(streams, &lines, cube.view_mut()?)?;

    let report = RepackReport {
        devices,
        missing_scan_rows,
    };
    if report.is_partial() {
        log::warn!(
            "Cube is partial: {} device row(s) zero-filled, {} row(s) missing from the scan log",
            report.zero_filled_rows(),
            report.missing_scan_rows
        );
    }

    let path = cube.commit(config.raw(), report.zero_filled_rows())?;
    Ok((path, report))
}

/// A mapped cube and, if it was built in this call, its report
pub struct RepackOutcome {
    pub cube: AssembledCube,
    pub report: Option<RepackReport>,
}

/// Reuse the cached cube of `dir` if it matches `config`, else repack.
pub fn load_or_repack(
    dir: &Path,
    config: &ValidatedConfig,
    running: &AtomicBool,
    force: bool,
) -> Result<RepackOutcome, RepackError> {
    let shape = cube_shape(config);
    if !force {
        if let Some(cube) = load_cached_cube(dir, shape)? {
            log::info!("Using cached cube in {}", dir.display());
            return Ok(RepackOutcome { cube, report: None });
        }
    }

    let (path, report) = repack(dir, config, running)?;
    let cube = load_cached_cube(dir, shape)?.ok_or_else(|| {
        RepackError::Validation(format!("freshly written cube {} is unreadable", path.display()))
    })?;
    Ok(RepackOutcome {
        cube,
        report: Some(report),
    })
}

/// Timing overview of a capture, without assembling anything
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub devices: Vec<(Device, TimelineStats)>,
    pub lines: Vec<ScanLine>,
    /// Total time offset applied to the timelines, in s
    pub offset_s: f64,
    pub missing_scan_rows: usize,
}

pub fn inspect(dir: &Path, config: &ValidatedConfig) -> Result<CaptureSummary, RepackError> {
    let files = discover_capture(dir)?;
    let (lines, offset_s, missing_scan_rows) = scan_geometry(dir, config)?;
    let layout = ChunkLayout::new(config.samples_per_chirp(), config.chirps_per_frame());

    let devices = files
        .iter()
        .map(|(device, chunks)| {
            let timeline = device_timeline(*device, chunks, layout, offset_s, config.periodicity_ms())?;
            Ok((*device, timeline.stats()))
        })
        .collect::<Result<Vec<_>, RepackError>>()?;

    Ok(CaptureSummary {
        devices,
        lines,
        offset_s,
        missing_scan_rows,
    })
}
