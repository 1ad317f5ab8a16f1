//! Frame-grid timelines
//!
//! Each front-end runs on its own clock. Its hardware timestamps are turned
//! into positions on a common integer frame grid: elapsed time since the
//! device's first frame, shifted by the calibration offset and divided by the
//! frame periodicity.
use crate::errors::RepackError;
use crate::index::IndexRecord;

/// Frame-grid position of every raw frame of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTimeline {
    grid: Vec<i64>,
    timestamps: Vec<u64>,
    chunk_frames: Vec<usize>,
}

impl DeviceTimeline {
    /// Build a timeline from the index records of every chunk, in file order.
    ///
    /// # Arguments
    /// * `chunks` - Index records per chunk
    /// * `offset_s` - Calibration time offset in s
    /// * `periodicity_ms` - Frame periodicity in ms
    ///
    /// Fails with `RepackError::Validation` if the resulting grid is not
    /// non-decreasing, i.e. the device clock went backwards.
    pub fn build(
        chunks: &[Vec<IndexRecord>],
        offset_s: f64,
        periodicity_ms: f64,
    ) -> Result<Self, RepackError> {
        if !(periodicity_ms.is_finite() && periodicity_ms > 0.0) {
            return Err(RepackError::Validation(format!(
                "frame periodicity must be positive, got {periodicity_ms}"
            )));
        }

        let chunk_frames: Vec<usize> = chunks.iter().map(Vec::len).collect();
        let timestamps: Vec<u64> = chunks
            .iter()
            .flat_map(|records| records.iter().map(|r| r.timestamp))
            .collect();

        let grid = match timestamps.first() {
            Some(&first) => timestamps
                .iter()
                .map(|&ts| grid_position(ts, first, offset_s, periodicity_ms))
                .collect(),
            None => Vec::new(),
        };

        if let Some(i) = grid.windows(2).position(|w| w[1] < w[0]) {
            return Err(RepackError::Validation(format!(
                "non-monotonic device clock: frame {} maps to grid {} after grid {}",
                i + 1,
                grid[i + 1],
                grid[i]
            )));
        }

        log::debug!(
            "Built timeline of {} frames over {} chunk(s), grid {:?}..{:?}",
            grid.len(),
            chunk_frames.len(),
            grid.first(),
            grid.last()
        );

        Ok(Self {
            grid,
            timestamps,
            chunk_frames,
        })
    }

    /// Grid position per frame, non-decreasing
    pub fn grid(&self) -> &[i64] {
        &self.grid
    }

    /// Number of frames of each chunk
    pub fn chunk_frames(&self) -> &[usize] {
        &self.chunk_frames
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Half-open range of frame indices whose grid position lies in `[start, end)`.
    pub fn frames_between(&self, start: i64, end: i64) -> (usize, usize) {
        let lo = self.grid.partition_point(|&g| g < start);
        let hi = self.grid.partition_point(|&g| g < end).max(lo);
        (lo, hi)
    }

    /// Timing diagnostics of the underlying hardware timestamps
    pub fn stats(&self) -> TimelineStats {
        let intervals_ms: Vec<f64> = self
            .timestamps
            .windows(2)
            .map(|w| (w[1] as f64 - w[0] as f64) / 1000.0)
            .collect();

        let (min_interval_ms, max_interval_ms, mean_interval_ms) = if intervals_ms.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let min = intervals_ms.iter().copied().fold(f64::INFINITY, f64::min);
            let max = intervals_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = intervals_ms.iter().sum::<f64>() / intervals_ms.len() as f64;
            (min, max, mean)
        };

        let mut collisions = 0;
        let mut gaps = 0;
        for w in self.grid.windows(2) {
            match w[1] - w[0] {
                0 => collisions += 1,
                1 => {}
                step => gaps += (step - 1) as usize,
            }
        }

        TimelineStats {
            frames: self.grid.len(),
            chunks: self.chunk_frames.len(),
            first_timestamp: self.timestamps.first().copied(),
            last_timestamp: self.timestamps.last().copied(),
            min_interval_ms,
            max_interval_ms,
            mean_interval_ms,
            collisions,
            gaps,
        }
    }
}

/// `round((ts - first + offset_s * 1e6) / 1000 / periodicity_ms)`, ties to even.
fn grid_position(ts: u64, first: u64, offset_s: f64, periodicity_ms: f64) -> i64 {
    let elapsed_us = (ts as i128 - first as i128) as f64;
    ((elapsed_us + offset_s * 1e6) / 1000.0 / periodicity_ms).round_ties_even() as i64
}

/// Timing summary of one device
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineStats {
    pub frames: usize,
    pub chunks: usize,
    pub first_timestamp: Option<u64>,
    pub last_timestamp: Option<u64>,
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
    pub mean_interval_ms: f64,
    /// Consecutive frames landing on the same grid position
    pub collisions: usize,
    /// Grid positions skipped between consecutive frames
    pub gaps: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(timestamps: &[u64]) -> Vec<IndexRecord> {
        timestamps
            .iter()
            .map(|&timestamp| IndexRecord {
                timestamp,
                ..IndexRecord::default()
            })
            .collect()
    }

    #[test]
    fn test_grid_from_periodicity() {
        // 25 ms frames with a little jitter, split over two chunks
        let chunks = vec![
            records(&[1_000_000, 1_025_400, 1_049_900]),
            records(&[1_075_000, 1_125_000]),
        ];
        let timeline = DeviceTimeline::build(&chunks, 0.0, 25.0).unwrap();
        assert_eq!(timeline.grid(), &[0, 1, 2, 3, 5]);
        assert_eq!(timeline.chunk_frames(), &[3, 2]);
        assert_eq!(timeline.len(), 5);
    }

    #[test]
    fn test_offset_shifts_grid() {
        let chunks = vec![records(&[0, 40_000, 80_000])];
        let timeline = DeviceTimeline::build(&chunks, 0.08, 40.0).unwrap();
        assert_eq!(timeline.grid(), &[2, 3, 4]);

        let timeline = DeviceTimeline::build(&chunks, -0.04, 40.0).unwrap();
        assert_eq!(timeline.grid(), &[-1, 0, 1]);
    }

    #[test]
    fn test_rounds_half_to_even() {
        // 12.5 ms and 37.5 ms at 25 ms periodicity are exact ties
        let chunks = vec![records(&[0, 12_500, 37_500])];
        let timeline = DeviceTimeline::build(&chunks, 0.0, 25.0).unwrap();
        assert_eq!(timeline.grid(), &[0, 0, 2]);
    }

    #[test]
    fn test_non_decreasing_for_sorted_timestamps() {
        let mut ts = 5_000u64;
        let mut stamps = Vec::new();
        for i in 0..500u64 {
            ts += 24_000 + (i * 7919) % 3_000;
            stamps.push(ts);
        }
        let chunks: Vec<Vec<IndexRecord>> = stamps.chunks(64).map(records).collect();
        let timeline = DeviceTimeline::build(&chunks, -0.92, 25.0).unwrap();
        assert!(timeline.grid().windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(timeline.len(), 500);
    }

    #[test]
    fn test_clock_going_backwards_is_flagged() {
        let chunks = vec![records(&[0, 100_000]), records(&[25_000])];
        assert!(matches!(
            DeviceTimeline::build(&chunks, 0.0, 25.0),
            Err(RepackError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_timeline() {
        let timeline = DeviceTimeline::build(&[], 0.0, 25.0).unwrap();
        assert!(timeline.is_empty());
        assert_eq!(timeline.frames_between(0, 10), (0, 0));
    }

    #[test]
    fn test_frames_between() {
        let chunks = vec![records(&[0, 25_000, 25_000, 75_000, 100_000])];
        let timeline = DeviceTimeline::build(&chunks, 0.0, 25.0).unwrap();
        assert_eq!(timeline.grid(), &[0, 1, 1, 3, 4]);
        assert_eq!(timeline.frames_between(1, 3), (1, 3));
        assert_eq!(timeline.frames_between(2, 3), (3, 3));
        assert_eq!(timeline.frames_between(3, 10), (3, 5));
    }

    #[test]
    fn test_stats() {
        let chunks = vec![records(&[0, 25_000, 25_000, 100_000])];
        let stats = DeviceTimeline::build(&chunks, 0.0, 25.0).unwrap().stats();
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.collisions, 1);
        assert_eq!(stats.gaps, 2);
        assert_eq!(stats.min_interval_ms, 0.0);
        assert_eq!(stats.max_interval_ms, 75.0);
        assert_eq!(stats.mean_interval_ms, 100.0 / 3.0);
        assert_eq!(stats.last_timestamp, Some(100_000));
    }
}
