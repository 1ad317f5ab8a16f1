//! Error types used by this lib.
use std::path::PathBuf;
use thiserror::Error;

/// Violations of the binary layout of index and data files.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Index file {path} is too short for its header: {available} bytes (required: {required})")]
    TruncatedHeader {
        path: PathBuf,
        required: usize,
        available: usize,
    },
    #[error("Record area of {path} is {available} bytes, not a multiple of the record size {record_size}")]
    MisalignedRecords {
        path: PathBuf,
        record_size: usize,
        available: usize,
    },
    #[error("Unsupported index file version {version} in {path}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("Chunk {path} holds {elements} samples, not a multiple of one frame ({frame_items} samples)")]
    MisalignedChunk {
        path: PathBuf,
        elements: usize,
        frame_items: usize,
    },
    #[error("Chunk {path} has an odd byte length {bytes}")]
    OddByteLength { path: PathBuf, bytes: usize },
    #[error("IO error while decoding capture file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors of the reconstruction pipeline.
///
/// Every variant is fatal; a stream running dry before all scan rows were
/// assembled is reported through `RepackReport` instead. The pipeline reports
/// malformed index headers, versions and record areas as `Validation`;
/// `Format` is left for data chunks that don't decode.
#[derive(Debug, Error)]
pub enum RepackError {
    #[error("No {kind} files found for device {device} in {dir}")]
    NotFound {
        device: String,
        kind: &'static str,
        dir: PathBuf,
    },
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Out-of-order frame access: requested [{start}, {end}) after a request starting at {previous}")]
    Sequence { start: i64, end: i64, previous: i64 },
    #[error("Malformed capture file: {0}")]
    Format(#[from] FormatError),
    #[error("IO error in reconstruction: {0}")]
    Io(#[from] std::io::Error),
    #[error("Couldn't parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Reconstruction was cancelled")]
    Cancelled,
    #[error("Assembly task for device {0} panicked")]
    DeviceTask(String),
    #[error("Couldn't persist assembled cube: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error in file persistence: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error in cube sidecar file: {0}")]
    Sidecar(#[from] serde_json::Error),
    #[error("Cube shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Cube mapping can't be viewed as int16 samples: {0}")]
    Layout(String),
}

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("Echo matrix is empty")]
    EmptyEcho,
    #[error("Invalid imaging parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("Selection {name}={index} is out of range (size {size})")]
    OutOfRange {
        name: &'static str,
        index: usize,
        size: usize,
    },
}
