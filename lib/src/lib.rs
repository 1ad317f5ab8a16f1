mod assemble;
mod capture;
mod config;
mod device;
mod errors;
mod index;
mod persist;
mod pipeline;
mod reconstruct;
mod rma;
mod scan;
mod stream;
mod timeline;

// Public re-export
pub use crate::assemble::{AssemblyReport, FrameAssembler};
pub use crate::capture::{
    chunk_frame_count, decode_chunk, encode_chunk, CaptureTensor, ChunkFileSource, ChunkLayout,
    IQ_WORDS, NUM_DEVICES, RX_PER_CHIP, TX_PER_CHIP, VIRTUAL_TX,
};
pub use crate::config::{
    BracketConfig, BracketProfile, ChannelConfig, FrameConfig, MimoConfig, MmwConfig,
    RadarProfile, ValidatedConfig, SPEED_OF_LIGHT,
};
pub use crate::device::{
    discover_device_files, validate_partition, ChunkFiles, Device, CHANNEL_PARTITION,
    NUM_RX_CHANNELS,
};
pub use crate::errors::{FormatError, ImagingError, PersistenceError, RepackError};
pub use crate::index::{read_index, write_index, IndexHeader, IndexRecord};
pub use crate::persist::{
    load_cached_cube, read_sidecar, AssembledCube, CubeFile, CubeSidecar, CUBE_FILE, SIDECAR_FILE,
};
pub use crate::pipeline::{
    discover_capture, inspect, load_config, load_or_repack, repack, CaptureSummary, RepackOutcome,
    CONFIG_FILE,
};
pub use crate::reconstruct::{cube_shape, ConcurrentReconstructor, DeviceReport, RepackReport};
pub use crate::rma::{
    fft_size_for, peak, range_slice, rma, write_complex_image, RmaParams, DEFAULT_FFT_SIZE,
};
pub use crate::scan::{map_scan_trajectory, ScanLine, ScanLog};
pub use crate::stream::{Advance, ChunkSource, FrameRange, WindowedFrameStream};
pub use crate::timeline::{DeviceTimeline, TimelineStats};
