//! Raster scan log
//!
//! The bracket controller logs one `start end` line (seconds) per scan row,
//! followed by a final line whose first value is the calibration time offset
//! between the scan clock and the radar captures.
use std::path::Path;

use crate::errors::RepackError;

/// One scan row mapped onto the frame grid: `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLine {
    pub row: usize,
    pub start: i64,
    pub end: i64,
}

impl ScanLine {
    pub fn width(&self) -> usize {
        (self.end - self.start) as usize
    }
}

/// Parsed scan log
#[derive(Debug, Clone, PartialEq)]
pub struct ScanLog {
    /// `(start, end)` time of every row, in s
    pub rows: Vec<(f64, f64)>,
    /// Calibration offset in s
    pub offset_time: f64,
}

impl ScanLog {
    pub fn from_file(path: &Path) -> Result<Self, RepackError> {
        log::trace!("Reading scan log {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse whitespace-delimited scan log text. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self, RepackError> {
        let mut entries: Vec<Vec<f64>> = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values = line
                .split_whitespace()
                .map(|v| v.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    RepackError::Validation(format!("scan log line {}: {}", lineno + 1, e))
                })?;
            entries.push(values);
        }

        if entries.len() < 2 {
            return Err(RepackError::Validation(format!(
                "scan log needs at least one row and the calibration entry, found {} entries",
                entries.len()
            )));
        }

        let calibration = entries.pop().unwrap_or_default();
        let offset_time = calibration.first().copied().ok_or_else(|| {
            RepackError::Validation("empty calibration entry in scan log".to_string())
        })?;
        if !offset_time.is_finite() {
            return Err(RepackError::Validation(format!(
                "scan log calibration offset {offset_time} is not finite"
            )));
        }

        let rows = entries
            .into_iter()
            .enumerate()
            .map(|(row, values)| match values.as_slice() {
                [start, end] if start.is_finite() && end.is_finite() => Ok((*start, *end)),
                [start, end] => Err(RepackError::Validation(format!(
                    "scan row {row} has non-finite times {start} {end}"
                ))),
                _ => Err(RepackError::Validation(format!(
                    "scan row {} has {} values, expected 2",
                    row,
                    values.len()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rows, offset_time })
    }

    /// Map every scan row onto the frame grid.
    ///
    /// `start = round(t_start * 1000 / periodicity_ms)`, `end = start + cols`.
    /// Fails if a row doesn't fit the `i64` frame grid.
    pub fn scan_lines(
        &self,
        cols: usize,
        periodicity_ms: f64,
    ) -> Result<Vec<ScanLine>, RepackError> {
        let width = i64::try_from(cols).map_err(|_| {
            RepackError::Validation(format!("{cols} columns exceed the frame grid"))
        })?;

        self.rows
            .iter()
            .enumerate()
            .map(|(row, &(t0, _))| {
                let position = (t0 * 1000.0 / periodicity_ms).round_ties_even();
                // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
                let fits = position.is_finite()
                    && position >= i64::MIN as f64
                    && position < i64::MAX as f64;
                let start = position as i64;
                match start.checked_add(width) {
                    Some(end) if fits => Ok(ScanLine { row, start, end }),
                    _ => Err(RepackError::Validation(format!(
                        "scan row {row} at {t0} s is outside the frame grid"
                    ))),
                }
            })
            .collect()
    }
}

/// Read a scan log and map it onto the frame grid.
///
/// Returns the scan lines and the calibration offset (s) from the log.
pub fn map_scan_trajectory(
    path: &Path,
    cols: usize,
    periodicity_ms: f64,
) -> Result<(Vec<ScanLine>, f64), RepackError> {
    let log = ScanLog::from_file(path)?;
    let lines = log.scan_lines(cols, periodicity_ms)?;
    log::debug!(
        "Mapped {} scan rows onto the frame grid (calibration offset {} s)",
        lines.len(),
        log.offset_time
    );
    Ok((lines, log.offset_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_map() {
        let text = "0.0 1.0\n0.1 1.1\n\n# comment\n0.2 1.2\n-0.5 0\n";
        let log = ScanLog::parse(text).unwrap();
        assert_eq!(log.rows.len(), 3);
        assert_eq!(log.offset_time, -0.5);

        let lines = log.scan_lines(4, 25.0).unwrap();
        assert_eq!(
            lines,
            vec![
                ScanLine { row: 0, start: 0, end: 4 },
                ScanLine { row: 1, start: 4, end: 8 },
                ScanLine { row: 2, start: 8, end: 12 },
            ]
        );
        assert!(lines.iter().all(|l| l.width() == 4));
    }

    #[test]
    fn test_single_value_calibration_line() {
        let log = ScanLog::parse("3.0 4.0\n1.25\n").unwrap();
        assert_eq!(log.offset_time, 1.25);
        assert_eq!(log.scan_lines(10, 40.0).unwrap()[0].start, 75);
    }

    #[test]
    fn test_too_short_log() {
        assert!(matches!(
            ScanLog::parse("0.0 1.0\n"),
            Err(RepackError::Validation(_))
        ));
        assert!(matches!(ScanLog::parse(""), Err(RepackError::Validation(_))));
    }

    #[test]
    fn test_malformed_values() {
        assert!(ScanLog::parse("0.0 abc\n1 0\n").is_err());
        assert!(ScanLog::parse("0.0 1.0 2.0\n1 0\n").is_err());
    }

    #[test]
    fn test_non_finite_times_are_rejected() {
        for text in ["nan 1.0\n0\n", "0.0 inf\n0\n", "-inf 1.0\n0\n", "0.0 1.0\nnan\n"] {
            assert!(
                matches!(ScanLog::parse(text), Err(RepackError::Validation(_))),
                "{text:?}"
            );
        }
    }

    #[test]
    fn test_times_outside_the_grid() {
        let log = ScanLog::parse("1e300 1.0\n0\n").unwrap();
        assert!(matches!(
            log.scan_lines(4, 25.0),
            Err(RepackError::Validation(_))
        ));

        let log = ScanLog {
            rows: vec![(0.0, 1.0)],
            offset_time: 0.0,
        };
        // Largest f64 below 2^63
        let edge = ScanLog {
            rows: vec![(9_223_372_036_854_774_784.0, 0.0)],
            offset_time: 0.0,
        };
        assert!(log.scan_lines(4, 25.0).is_ok());
        assert_eq!(edge.scan_lines(4, 1000.0).unwrap()[0].start, i64::MAX - 1023);
        assert!(edge.scan_lines(2048, 1000.0).is_err());
        assert!(matches!(
            log.scan_lines(usize::MAX, 25.0),
            Err(RepackError::Validation(_))
        ));
    }
}
