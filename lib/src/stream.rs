//! Windowed, forward-only access to a device's frames
//!
//! A device's capture is split over many multi-gigabyte chunk files. The
//! `WindowedFrameStream` keeps only a window of decoded frames in memory and
//! slides it forward as frame-grid ranges are requested: when a request runs
//! past the loaded frames, the next chunk is decoded and appended to the
//! still-needed tail of the current window. Everything before the start of
//! the latest request is dropped, so ranges must be requested in
//! non-decreasing order.
use ndarray::{concatenate, s, Array6, ArrayView5, ArrayView6, Axis};
use std::collections::VecDeque;

use crate::capture::{CaptureTensor, ChunkLayout};
use crate::errors::RepackError;
use crate::timeline::DeviceTimeline;

/// Supplier of a device's decoded chunks, in capture order.
pub trait ChunkSource {
    /// Next chunk, or `None` once every chunk was handed out.
    fn next_chunk(&mut self) -> Result<Option<CaptureTensor>, RepackError>;
}

impl ChunkSource for VecDeque<CaptureTensor> {
    fn next_chunk(&mut self) -> Result<Option<CaptureTensor>, RepackError> {
        Ok(self.pop_front())
    }
}

/// Outcome of loading the next chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    MoreData,
    Exhausted,
}

/// Frames found for a requested frame-grid range
#[derive(Debug)]
pub struct FrameRange<'a> {
    /// `(frames, chirps, virtual tx, rx, samples, IQ)`
    pub frames: ArrayView6<'a, i16>,
    /// Frame-grid position of every returned frame
    pub positions: &'a [i64],
    /// The request reached past the last recorded frame
    pub exhausted: bool,
}

pub struct WindowedFrameStream<S> {
    source: S,
    timeline: DeviceTimeline,
    layout: ChunkLayout,
    /// Decoded frames `[window_start, window_start + window.len())`
    window: CaptureTensor,
    window_start: usize,
    chunks_loaded: usize,
    exhausted: bool,
    last_start: Option<i64>,
}

impl<S: ChunkSource> WindowedFrameStream<S> {
    pub fn new(source: S, timeline: DeviceTimeline, layout: ChunkLayout) -> Self {
        Self {
            source,
            timeline,
            layout,
            window: Array6::zeros(layout.tensor_shape(0)),
            window_start: 0,
            chunks_loaded: 0,
            exhausted: false,
            last_start: None,
        }
    }

    pub fn timeline(&self) -> &DeviceTimeline {
        &self.timeline
    }

    /// Whether every chunk was consumed and a request ran past the recording.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Number of frames currently held in memory
    pub fn window_frames(&self) -> usize {
        self.window.len_of(Axis(0))
    }

    fn window_end(&self) -> usize {
        self.window_start + self.window_frames()
    }

    /// Frames whose grid position lies in `[start, end)`.
    ///
    /// Loads further chunks as needed. If the range extends past the
    /// recording, the stream is marked exhausted and only the frames
    /// available are returned.
    pub fn read_range(&mut self, start: i64, end: i64) -> Result<FrameRange<'_>, RepackError> {
        if let Some(previous) = self.last_start {
            if start < previous {
                return Err(RepackError::Sequence {
                    start,
                    end,
                    previous,
                });
            }
        }
        if end < start {
            return Err(RepackError::Sequence {
                start,
                end,
                previous: self.last_start.unwrap_or(start),
            });
        }
        self.last_start = Some(start);

        let (lo, hi) = self.timeline.frames_between(start, end);
        let past_recording = self
            .timeline
            .grid()
            .last()
            .map_or(true, |&last| end > last + 1);

        while !self.exhausted && (hi > self.window_end() || past_recording) {
            self.advance(lo)?;
        }

        let hi = hi.min(self.window_end());
        let lo = lo.max(self.window_start).min(hi);
        let offset = self.window_start;

        Ok(FrameRange {
            frames: self
                .window
                .slice(s![lo - offset..hi - offset, .., .., .., .., ..]),
            positions: &self.timeline.grid()[lo..hi],
            exhausted: self.exhausted,
        })
    }

    /// The frame at grid position `position`, if one was recorded. When
    /// several frames share the position the last one is returned.
    pub fn read_one(&mut self, position: i64) -> Result<Option<ArrayView5<'_, i16>>, RepackError> {
        let range = self.read_range(position, position + 1)?;
        let count = range.frames.len_of(Axis(0));
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(range.frames.index_axis_move(Axis(0), count - 1)))
    }

    /// Load the next chunk, dropping every frame before absolute frame index
    /// `keep_from`.
    pub fn advance(&mut self, keep_from: usize) -> Result<Advance, RepackError> {
        let Some(chunk) = self.source.next_chunk()? else {
            log::debug!(
                "No more chunks after {} loaded; stream exhausted",
                self.chunks_loaded
            );
            self.exhausted = true;
            return Ok(Advance::Exhausted);
        };

        let expected = self.timeline.chunk_frames().get(self.chunks_loaded).copied();
        let frames = chunk.len_of(Axis(0));
        if expected != Some(frames) {
            return Err(RepackError::Validation(format!(
                "chunk {} holds {} frames but its index lists {}",
                self.chunks_loaded,
                frames,
                expected.map_or("no chunk".to_string(), |n| format!("{n} frames"))
            )));
        }
        if chunk.shape()[1..] != self.layout.tensor_shape(0)[1..] {
            return Err(RepackError::Validation(format!(
                "chunk {} has frame shape {:?}, expected {:?}",
                self.chunks_loaded,
                &chunk.shape()[1..],
                &self.layout.tensor_shape(0)[1..]
            )));
        }
        self.chunks_loaded += 1;

        let keep_from = keep_from.clamp(self.window_start, self.window_end());
        let tail = self
            .window
            .slice(s![keep_from - self.window_start.., .., .., .., .., ..]);

        let window = if tail.len_of(Axis(0)) == 0 {
            chunk
        } else {
            concatenate(Axis(0), &[tail, chunk.view()])
                .map_err(|e| RepackError::Validation(format!("couldn't extend frame window: {e}")))?
        };

        log::trace!(
            "Advanced to chunk {}: window holds frames {}..{}",
            self.chunks_loaded,
            keep_from,
            keep_from + window.len_of(Axis(0))
        );
        self.window = window;
        self.window_start = keep_from;
        Ok(Advance::MoreData)
    }
}
