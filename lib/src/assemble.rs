//! Scan-row assembly for a single device
//!
//! Every scan row covers a frame-grid interval of `cols` positions. The
//! frames recorded inside that interval are scattered to their column, all
//! other columns stay zero: dropped frames, clock drift and sub-periodicity
//! jitter all show up as zero columns.
use ndarray::{s, Array5, ArrayViewMut6, Axis};

use crate::capture::{RX_PER_CHIP, VIRTUAL_TX};
use crate::config::{BracketProfile, ValidatedConfig};
use crate::errors::RepackError;
use crate::scan::ScanLine;
use crate::stream::{ChunkSource, WindowedFrameStream};

/// Outcome of assembling the rows of one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Rows read from the stream (including a partially covered last one)
    pub rows_assembled: usize,
    /// Rows left zero because the stream ran past the recording
    pub zero_filled_rows: usize,
    /// Row during which the stream reached the end of the recording
    pub exhausted_at_row: Option<usize>,
    /// Frames written into the cube
    pub frames_written: usize,
}

impl AssemblyReport {
    pub fn is_partial(&self) -> bool {
        self.zero_filled_rows > 0
    }
}

/// Writes one device's frames into its RX-channel slice of the cube.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    chirp: usize,
    cols: usize,
    samples: usize,
    bracket: BracketProfile,
}

impl FrameAssembler {
    pub fn new(config: &ValidatedConfig) -> Self {
        Self {
            chirp: config.representative_chirp(),
            cols: config.cols(),
            samples: config.samples_per_chirp(),
            bracket: config.bracket.profile.clone(),
        }
    }

    /// Assemble every scan line into `out`.
    ///
    /// # Arguments
    /// * `stream` - The device's frame stream
    /// * `lines` - Scan lines, in increasing frame-grid order
    /// * `out` - Channel slice of the cube: `(rx, virtual tx, rows, cols, samples, IQ)`
    /// * `stop` - Polled before every row; assembly is cancelled once it returns `true`
    /// * `on_row` - Called with the index of every finished row
    pub fn assemble<S: ChunkSource>(
        &self,
        stream: &mut WindowedFrameStream<S>,
        lines: &[ScanLine],
        mut out: ArrayViewMut6<i16>,
        stop: impl Fn() -> bool,
        mut on_row: impl FnMut(usize),
    ) -> Result<AssemblyReport, RepackError> {
        let rows = out.len_of(Axis(2));
        let expected = [RX_PER_CHIP, VIRTUAL_TX, rows, self.cols, self.samples, 2];
        if out.shape() != expected {
            return Err(RepackError::Validation(format!(
                "output slice has shape {:?}, expected {:?}",
                out.shape(),
                expected
            )));
        }

        let mut report = AssemblyReport::default();

        for (i, line) in lines.iter().enumerate() {
            if stop() {
                return Err(RepackError::Cancelled);
            }
            if line.row >= rows || line.width() != self.cols {
                return Err(RepackError::Validation(format!(
                    "scan line {:?} doesn't fit {} rows of {} columns",
                    line, rows, self.cols
                )));
            }

            let range = stream.read_range(line.start, line.end)?;
            if self.chirp >= range.frames.len_of(Axis(1)) {
                return Err(RepackError::Validation(format!(
                    "chirp {} out of range for {} chirps per frame",
                    self.chirp,
                    range.frames.len_of(Axis(1))
                )));
            }

            let reversed = self.bracket.is_reversed(line.row);
            let mut row_buf = Array5::<i16>::zeros((RX_PER_CHIP, VIRTUAL_TX, self.cols, self.samples, 2));

            for (k, &position) in range.positions.iter().enumerate() {
                let offset = (position - line.start) as usize;
                let col = if reversed { self.cols - 1 - offset } else { offset };
                // (tx, rx, samples, IQ) -> (rx, tx, samples, IQ)
                let frame = range
                    .frames
                    .slice(s![k, self.chirp, .., .., .., ..])
                    .permuted_axes([1, 0, 2, 3]);
                row_buf.slice_mut(s![.., .., col, .., ..]).assign(&frame);
            }

            out.slice_mut(s![.., .., line.row, .., .., ..]).assign(&row_buf);
            report.rows_assembled += 1;
            report.frames_written += range.positions.len();
            on_row(line.row);

            log::trace!(
                "Row {}: {} of {} columns filled{}",
                line.row,
                range.positions.len(),
                self.cols,
                if reversed { " (reversed)" } else { "" }
            );

            if range.exhausted {
                report.exhausted_at_row = Some(line.row);
                report.zero_filled_rows = lines.len() - i - 1;
                break;
            }
        }

        if report.is_partial() {
            log::warn!(
                "Recording ended during row {:?}; {} remaining row(s) left zero-filled",
                report.exhausted_at_row,
                report.zero_filled_rows
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureTensor, ChunkLayout};
    use crate::config::MmwConfig;
    use crate::index::IndexRecord;
    use crate::timeline::DeviceTimeline;
    use ndarray::{Array6, Axis};
    use std::collections::VecDeque;

    fn never() -> bool {
        false
    }

    fn config(rows: usize, cols: usize, chirps: usize, serpentine: bool) -> ValidatedConfig {
        let mut config = MmwConfig::default();
        config.mimo.profile.num_adc_samples = 2;
        config.mimo.frame.num_loops = chirps;
        config.mimo.frame.frame_periodicity = 25.0;
        config.bracket.profile.row = rows;
        config.bracket.profile.col = cols;
        config.bracket.profile.next_line_reverse = serpentine;
        config.validate().unwrap()
    }

    /// Frame `f` holds value `f + 1` everywhere in chirp 1 and `-1` in chirp 0.
    fn stream(
        timestamps_us: &[u64],
        chirps: usize,
    ) -> WindowedFrameStream<VecDeque<CaptureTensor>> {
        let layout = ChunkLayout::new(2, chirps);
        let records = timestamps_us
            .iter()
            .map(|&timestamp| IndexRecord {
                timestamp,
                ..IndexRecord::default()
            })
            .collect();
        let timeline = DeviceTimeline::build(&[records], 0.0, 25.0).unwrap();
        let tensor = Array6::from_shape_fn(layout.tensor_shape(timestamps_us.len()), |(f, c, ..)| {
            if c == 0 && chirps > 1 {
                -1
            } else {
                f as i16 + 1
            }
        });
        WindowedFrameStream::new(VecDeque::from(vec![tensor]), timeline, layout)
    }

    fn cube(rows: usize, cols: usize) -> Array6<i16> {
        Array6::zeros((RX_PER_CHIP, VIRTUAL_TX, rows, cols, 2, 2))
    }

    /// Value of (row, col) in the assembled slice, checked to be uniform.
    fn cell(cube: &Array6<i16>, row: usize, col: usize) -> i16 {
        let cell = cube.slice(s![.., .., row, col, .., ..]);
        let first = cell[[0, 0, 0, 0]];
        assert!(cell.iter().all(|&v| v == first));
        first
    }

    fn lines(starts: &[i64], cols: usize) -> Vec<ScanLine> {
        starts
            .iter()
            .enumerate()
            .map(|(row, &start)| ScanLine {
                row,
                start,
                end: start + cols as i64,
            })
            .collect()
    }

    #[test]
    fn test_gaps_are_zero_filled() {
        let config = config(2, 4, 1, false);
        // grid: 0, 1, 3, 4 (grid 2 dropped), nothing recorded for row 1 at 10..14
        let mut stream = stream(&[0, 25_000, 75_000, 100_000], 1);
        let mut out = cube(2, 4);

        let report = FrameAssembler::new(&config)
            .assemble(&mut stream, &lines(&[0, 10], 4), out.view_mut(), never, |_| {})
            .unwrap();

        assert_eq!(cell(&out, 0, 0), 1);
        assert_eq!(cell(&out, 0, 1), 2);
        assert_eq!(cell(&out, 0, 2), 0);
        assert_eq!(cell(&out, 0, 3), 3);
        assert!(out.slice(s![.., .., 1, .., .., ..]).iter().all(|&v| v == 0));
        assert_eq!(report.rows_assembled, 2);
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.exhausted_at_row, Some(1));
        assert_eq!(report.zero_filled_rows, 0);
    }

    #[test]
    fn test_serpentine_reversal() {
        let stamps: Vec<u64> = (0..8).map(|i| i * 25_000).collect();
        let starts = [0, 4];

        let mut plain = cube(2, 4);
        FrameAssembler::new(&config(2, 4, 1, false))
            .assemble(&mut stream(&stamps, 1), &lines(&starts, 4), plain.view_mut(), never, |_| {})
            .unwrap();

        let mut serpentine = cube(2, 4);
        FrameAssembler::new(&config(2, 4, 1, true))
            .assemble(&mut stream(&stamps, 1), &lines(&starts, 4), serpentine.view_mut(), never, |_| {})
            .unwrap();

        let row0: Vec<i16> = (0..4).map(|c| cell(&plain, 0, c)).collect();
        let row1_plain: Vec<i16> = (0..4).map(|c| cell(&plain, 1, c)).collect();
        let row1_serp: Vec<i16> = (0..4).map(|c| cell(&serpentine, 1, c)).collect();

        assert_eq!(row0, vec![1, 2, 3, 4]);
        assert_eq!(row1_plain, vec![5, 6, 7, 8]);
        assert_eq!(row1_serp, vec![8, 7, 6, 5]);
        assert_eq!(
            serpentine.slice(s![.., .., 0, .., .., ..]),
            plain.slice(s![.., .., 0, .., .., ..])
        );
    }

    #[test]
    fn test_uses_representative_chirp() {
        let config = config(1, 2, 4, false);
        let mut stream = stream(&[0, 25_000], 4);
        let mut out = cube(1, 2);
        FrameAssembler::new(&config)
            .assemble(&mut stream, &lines(&[0], 2), out.view_mut(), never, |_| {})
            .unwrap();
        assert_eq!(cell(&out, 0, 0), 1);
        assert_eq!(cell(&out, 0, 1), 2);
    }

    #[test]
    fn test_exhaustion_stops_early() {
        let config = config(4, 2, 1, false);
        let mut stream = stream(&[0, 25_000, 50_000], 1);
        let mut out = cube(4, 2);
        let mut seen = Vec::new();

        let report = FrameAssembler::new(&config)
            .assemble(
                &mut stream,
                &lines(&[0, 2, 4, 6], 2),
                out.view_mut(),
                never,
                |row| seen.push(row),
            )
            .unwrap();

        assert_eq!(seen, vec![0, 1]);
        assert_eq!(cell(&out, 1, 0), 3);
        assert_eq!(cell(&out, 1, 1), 0);
        assert_eq!(report.exhausted_at_row, Some(1));
        assert_eq!(report.zero_filled_rows, 2);
        assert!(report.is_partial());
    }

    #[test]
    fn test_cancellation() {
        let config = config(1, 2, 1, false);
        let mut out = cube(1, 2);
        let result = FrameAssembler::new(&config).assemble(
            &mut stream(&[0], 1),
            &lines(&[0], 2),
            out.view_mut(),
            || true,
            |_| {},
        );
        assert!(matches!(result, Err(RepackError::Cancelled)));
    }

    #[test]
    fn test_rejects_wrong_output_shape() {
        let config = config(1, 2, 1, false);
        let mut out = cube(1, 3);
        let result = FrameAssembler::new(&config).assemble(
            &mut stream(&[0], 1),
            &lines(&[0], 2),
            out.view_mut(),
            never,
            |_| {},
        );
        assert!(matches!(result, Err(RepackError::Validation(_))));
        assert_eq!(out.len_of(Axis(3)), 3);
    }
}
