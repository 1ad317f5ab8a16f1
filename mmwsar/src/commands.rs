use mmwsar_lib::{
    inspect, load_config, load_or_repack, peak, range_slice, rma, write_complex_image,
    ImagingError, RmaParams,
};

use std::error::Error;
use std::sync::atomic::AtomicBool;

use crate::cli::{ImageArgs, InspectArgs, RepackArgs};

/// Image file written by `image`, inside the capture directory
const IMAGE_FILE: &str = "rma_image.bin";

type CliResult = Result<(), Box<dyn Error>>;

pub fn run_repack(args: RepackArgs, running: &AtomicBool) -> CliResult {
    let config = load_config(&args.input, args.config.as_deref())?;
    let outcome = load_or_repack(&args.input, &config, running, args.force)?;

    match outcome.report {
        Some(report) => {
            for device in &report.devices {
                log::info!(
                    "{}: {} row(s), {} frame(s) written, {} row(s) zero-filled",
                    device.device,
                    device.assembly.rows_assembled,
                    device.assembly.frames_written,
                    device.assembly.zero_filled_rows
                );
            }
            if report.is_partial() {
                log::warn!("The assembled cube is incomplete");
            }
        }
        None => log::info!("Cube is up to date, use --force to rebuild"),
    }
    println!("{:?}", outcome.cube.shape());
    Ok(())
}

pub fn run_inspect(args: InspectArgs) -> CliResult {
    let config = load_config(&args.input, args.config.as_deref())?;
    let summary = inspect(&args.input, &config)?;

    println!("time offset: {:.3} s", summary.offset_s);
    println!(
        "{:<8} {:>8} {:>7} {:>10} {:>10} {:>10} {:>10} {:>6}",
        "device", "frames", "chunks", "min ms", "mean ms", "max ms", "collisions", "gaps"
    );
    for (device, stats) in &summary.devices {
        println!(
            "{:<8} {:>8} {:>7} {:>10.3} {:>10.3} {:>10.3} {:>10} {:>6}",
            device.name(),
            stats.frames,
            stats.chunks,
            stats.min_interval_ms,
            stats.mean_interval_ms,
            stats.max_interval_ms,
            stats.collisions,
            stats.gaps
        );
    }

    println!();
    println!("{:<5} {:>8} {:>8}", "row", "start", "end");
    for line in &summary.lines {
        println!("{:<5} {:>8} {:>8}", line.row, line.start, line.end);
    }
    if summary.missing_scan_rows > 0 {
        println!("({} configured row(s) not in the scan log)", summary.missing_scan_rows);
    }
    Ok(())
}

pub fn run_image(args: ImageArgs, running: &AtomicBool) -> CliResult {
    let config = load_config(&args.input, args.config.as_deref())?;
    let outcome = load_or_repack(&args.input, &config, running, false)?;
    let cube = outcome.cube.view()?;

    let bin = args.bin.checked_sub(1).ok_or(ImagingError::OutOfRange {
        name: "bin",
        index: 0,
        size: config.samples_per_chirp(),
    })?;
    let echo = range_slice(cube, args.rx, args.tx, bin)?;

    let profile = &config.mimo.profile;
    let bracket = &config.bracket.profile;
    let range_m = profile.range_of_bin(
        args.bin,
        config.samples_per_chirp(),
        args.antenna_offset_mm / 1000.0,
    );
    let params = RmaParams {
        fft_size: args.fft_size,
        ..RmaParams::new(bracket.dx, bracket.dy, range_m, profile.center_wavenumber())
    };
    log::info!(
        "Imaging rx {} tx {} bin {}: R = {:.4} m, k = {:.2} rad/m",
        args.rx,
        args.tx,
        args.bin,
        range_m,
        params.wavenumber
    );

    let image = rma(echo.view(), &params)?;
    let path = args.input.join(IMAGE_FILE);
    write_complex_image(&path, image.view())?;
    log::info!("Wrote {:?} image to {}", image.dim(), path.display());

    if let Some((row, col, magnitude)) = peak(image.view()) {
        log::info!("Peak at row {}, col {}: {:.4e}", row, col, magnitude);
    }
    Ok(())
}
