//! Raw ADC chunk decoding
//!
//! A data chunk is a flat stream of little-endian `i16` words, row-major over
//! `(frame, chirp, tx x chip, sample, rx, IQ)`. Decoding turns it into a
//! `CaptureTensor` with the RX and sample axes swapped, which is the layout
//! the assembled cube uses.
//!
//! Considering the cascaded TI front-ends this library targets:
//!  - 4 chips per cascade
//!  - 3 TX and 4 RX antennas per chip
//!  - 2 words per ADC sample (I before Q)
use memmap2::Mmap;
use ndarray::{Array6, ArrayView6};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::{FormatError, RepackError};
use crate::stream::ChunkSource;

pub const NUM_DEVICES: usize = 4;
pub const TX_PER_CHIP: usize = 3;
pub const RX_PER_CHIP: usize = 4;
pub const IQ_WORDS: usize = 2;
/// Virtual TX antennas of the whole cascade
pub const VIRTUAL_TX: usize = TX_PER_CHIP * NUM_DEVICES;

/// Decoded chunk: `(frames, chirps, virtual tx, rx, samples, IQ)`
pub type CaptureTensor = Array6<i16>;

/// Per-frame geometry of a data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub samples_per_chirp: usize,
    pub chirps_per_frame: usize,
}

impl ChunkLayout {
    pub fn new(samples_per_chirp: usize, chirps_per_frame: usize) -> Self {
        Self {
            samples_per_chirp,
            chirps_per_frame,
        }
    }

    /// Number of `i16` words of a single frame
    pub fn frame_items(&self) -> usize {
        self.chirps_per_frame * VIRTUAL_TX * self.samples_per_chirp * RX_PER_CHIP * IQ_WORDS
    }

    /// Shape of a decoded tensor holding `frames` frames
    pub fn tensor_shape(&self, frames: usize) -> [usize; 6] {
        [
            frames,
            self.chirps_per_frame,
            VIRTUAL_TX,
            RX_PER_CHIP,
            self.samples_per_chirp,
            IQ_WORDS,
        ]
    }

    fn check_length(&self, path: &Path, bytes: usize) -> Result<usize, FormatError> {
        if bytes % 2 != 0 {
            return Err(FormatError::OddByteLength {
                path: path.to_path_buf(),
                bytes,
            });
        }
        let elements = bytes / 2;
        let frame_items = self.frame_items();
        if frame_items == 0 || elements % frame_items != 0 {
            return Err(FormatError::MisalignedChunk {
                path: path.to_path_buf(),
                elements,
                frame_items,
            });
        }
        Ok(elements / frame_items)
    }
}

/// Number of frames stored in a data chunk, from its size alone.
pub fn chunk_frame_count(path: &Path, layout: ChunkLayout) -> Result<usize, FormatError> {
    let bytes = std::fs::metadata(path)?.len() as usize;
    layout.check_length(path, bytes)
}

/// Decode a data chunk from disk.
///
/// The file is memory-mapped so only the decoded tensor is held on the heap.
pub fn decode_chunk(path: &Path, layout: ChunkLayout) -> Result<CaptureTensor, FormatError> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return decode_bytes(path, &[], layout);
    }
    // SAFETY: raw captures are immutable inputs; nothing truncates them while mapped.
    let mmap = unsafe { Mmap::map(&file)? };
    decode_bytes(path, &mmap, layout)
}

fn decode_bytes(path: &Path, bytes: &[u8], layout: ChunkLayout) -> Result<CaptureTensor, FormatError> {
    let frames = layout.check_length(path, bytes.len())?;
    log::trace!("Decoding {} frames from {}", frames, path.display());

    // On-disk order has samples before rx; read each word straight into
    // its transposed position
    let (chirps, samples) = (layout.chirps_per_frame, layout.samples_per_chirp);
    Ok(Array6::from_shape_fn(
        layout.tensor_shape(frames),
        |(f, c, t, r, s, q)| {
            let word = ((((f * chirps + c) * VIRTUAL_TX + t) * samples + s) * RX_PER_CHIP + r)
                * IQ_WORDS
                + q;
            i16::from_le_bytes([bytes[2 * word], bytes[2 * word + 1]])
        },
    ))
}

/// Write a decoded tensor back in the on-disk order read by `decode_chunk`.
pub fn encode_chunk(tensor: ArrayView6<i16>, path: &Path) -> Result<(), FormatError> {
    let on_disk = tensor.permuted_axes([0, 1, 2, 4, 3, 5]);
    let mut writer = BufWriter::new(File::create(path)?);
    for word in on_disk.iter() {
        writer.write_all(&word.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Decodes a device's data chunks one at a time, in file order.
pub struct ChunkFileSource {
    files: VecDeque<PathBuf>,
    layout: ChunkLayout,
}

impl ChunkFileSource {
    pub fn new(files: impl IntoIterator<Item = PathBuf>, layout: ChunkLayout) -> Self {
        Self {
            files: files.into_iter().collect(),
            layout,
        }
    }
}

impl ChunkSource for ChunkFileSource {
    fn next_chunk(&mut self) -> Result<Option<CaptureTensor>, RepackError> {
        match self.files.pop_front() {
            Some(path) => {
                log::debug!("Loading chunk {}", path.display());
                Ok(Some(decode_chunk(&path, self.layout)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use tempfile::TempDir;

    /// Builds a tensor whose every word encodes its own coordinates.
    fn coordinate_tensor(layout: ChunkLayout, frames: usize) -> CaptureTensor {
        let shape = layout.tensor_shape(frames);
        Array6::from_shape_fn(shape, |(f, c, t, r, s, q)| {
            (f * 10_000 + c * 5_000 + t * 300 + r * 70 + s * 2 + q) as i16
        })
    }

    #[test]
    fn test_decode_swaps_rx_and_sample_axes() {
        let layout = ChunkLayout::new(3, 2);
        let mut bytes = Vec::new();
        // Write the on-disk order by hand: (frame, chirp, tx, sample, rx, iq)
        for f in 0..2 {
            for c in 0..2 {
                for t in 0..VIRTUAL_TX {
                    for s in 0..3 {
                        for r in 0..RX_PER_CHIP {
                            for q in 0..IQ_WORDS {
                                let v = (f * 10_000 + c * 5_000 + t * 300 + r * 70 + s * 2 + q) as i16;
                                bytes.extend_from_slice(&v.to_le_bytes());
                            }
                        }
                    }
                }
            }
        }

        let tensor = decode_bytes(Path::new("chunk_data.bin"), &bytes, layout).unwrap();
        assert_eq!(tensor.shape(), &[2, 2, VIRTUAL_TX, RX_PER_CHIP, 3, 2]);
        assert!(tensor.is_standard_layout());
        assert_eq!(tensor, coordinate_tensor(layout, 2));
        assert_eq!(tensor[[1, 0, 11, 3, 2, 1]], 10_000 + 3300 + 210 + 4 + 1);
    }

    #[test]
    fn test_encode_then_decode_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master_0000_data.bin");
        let layout = ChunkLayout::new(4, 1);
        let tensor = coordinate_tensor(layout, 3);

        encode_chunk(tensor.view(), &path).unwrap();
        assert_eq!(chunk_frame_count(&path, layout).unwrap(), 3);

        let decoded = decode_chunk(&path, layout).unwrap();
        assert_eq!(decoded.slice(s![2, .., .., .., .., ..]), tensor.slice(s![2, .., .., .., .., ..]));
        assert_eq!(decoded, tensor);
    }

    #[test]
    fn test_rejects_partial_frame() {
        let layout = ChunkLayout::new(2, 1);
        let bytes = vec![0u8; (layout.frame_items() + 2) * 2];
        let err = decode_bytes(Path::new("bad_data.bin"), &bytes, layout).unwrap_err();
        assert!(matches!(err, FormatError::MisalignedChunk { .. }));
    }

    #[test]
    fn test_empty_chunk_has_no_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slave2_0001_data.bin");
        File::create(&path).unwrap();
        let decoded = decode_chunk(&path, ChunkLayout::new(4, 2)).unwrap();
        assert_eq!(decoded.shape()[0], 0);
    }

    #[test]
    fn test_file_source_yields_chunks_in_order() {
        let dir = TempDir::new().unwrap();
        let layout = ChunkLayout::new(2, 1);
        let first = dir.path().join("slave3_0000_data.bin");
        let second = dir.path().join("slave3_0001_data.bin");
        encode_chunk(coordinate_tensor(layout, 1).view(), &first).unwrap();
        encode_chunk(coordinate_tensor(layout, 2).view(), &second).unwrap();

        let mut source = ChunkFileSource::new(vec![first, second], layout);
        assert_eq!(source.next_chunk().unwrap().unwrap().shape()[0], 1);
        assert_eq!(source.next_chunk().unwrap().unwrap().shape()[0], 2);
        assert!(source.next_chunk().unwrap().is_none());
    }
}
