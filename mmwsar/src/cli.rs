use clap::{Parser, Subcommand};
use mmwsar_lib::DEFAULT_FFT_SIZE;
use simplelog::LevelFilter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Log level for output (error, warn, info, debug, trace)
    #[arg(global = true, long, default_value = "info")]
    pub loglevel: LevelFilter,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble the radar cube of a capture directory
    Repack(RepackArgs),

    /// Show per-device timing and the scan-line table
    Inspect(InspectArgs),

    /// Reconstruct an image from one range slice of the cube
    Image(ImageArgs),
}

#[derive(Parser)]
pub struct RepackArgs {
    /// Capture directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Configuration file (default: <input>/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Rebuild even if a matching cube exists
    #[arg(long, default_value = "false")]
    pub force: bool,
}

#[derive(Parser)]
pub struct InspectArgs {
    /// Capture directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Configuration file (default: <input>/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Parser)]
pub struct ImageArgs {
    /// Capture directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Configuration file (default: <input>/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// RX channel (0-15)
    #[arg(long, default_value = "1")]
    pub rx: usize,

    /// Virtual TX channel (0-11)
    #[arg(long, default_value = "1")]
    pub tx: usize,

    /// Range bin, 1-based
    #[arg(long, default_value = "21")]
    pub bin: usize,

    /// Distance between antenna plane and scan plane in mm
    #[arg(long, default_value = "183")]
    pub antenna_offset_mm: f64,

    /// Spatial FFT size
    #[arg(long, default_value_t = DEFAULT_FFT_SIZE)]
    pub fft_size: usize,
}
