//! Capture configuration
//!
//! The document written by the capture tool next to every recording. It is
//! parsed once, validated, and then handed around as an immutable
//! `ValidatedConfig`.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::ops::Deref;
use std::path::Path;

use crate::errors::RepackError;

/// Speed of light in m/s
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Enable mask of the four receive antennas of one chip.
pub const RX_CHANNEL_MASK: u8 = 0b1111;
/// Enable mask of the three transmit antennas of one chip.
pub const TX_CHANNEL_MASK: u8 = 0b111;

/// Chirp profile of the radar chips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RadarProfile {
    pub id: u32,
    /// Start frequency in GHz
    pub start_frequency: f64,
    /// Chirp slope in MHz/us
    pub frequency_slope: f64,
    /// Idle time in us
    pub idle_time: f64,
    /// ADC start time in us
    pub adc_start_time: f64,
    /// Ramp end time in us
    pub ramp_end_time: f64,
    /// TX start time in us
    pub tx_start_time: f64,
    /// ADC samples per chirp
    pub num_adc_samples: usize,
    /// ADC sampling frequency in ksps
    pub adc_sampling_frequency: f64,
    /// RX gain in dB
    pub rx_gain: u32,
    pub hpf_corner_freq1: u8,
    pub hpf_corner_freq2: u8,
}

impl Default for RadarProfile {
    fn default() -> Self {
        Self {
            id: 0,
            start_frequency: 77.0,
            frequency_slope: 79.0327,
            idle_time: 5.0,
            adc_start_time: 6.0,
            ramp_end_time: 40.0,
            tx_start_time: 0.0,
            num_adc_samples: 256,
            adc_sampling_frequency: 8000.0,
            rx_gain: 48,
            hpf_corner_freq1: 0,
            hpf_corner_freq2: 0,
        }
    }
}

impl RadarProfile {
    /// Chirp slope in Hz/s
    pub fn slope_hz_per_s(&self) -> f64 {
        self.frequency_slope * 1e12
    }

    /// ADC sampling rate in samples per second
    pub fn sampling_rate_hz(&self) -> f64 {
        self.adc_sampling_frequency * 1e3
    }

    /// Frequency at the center of the sampled part of the chirp, in Hz.
    pub fn center_frequency(&self) -> f64 {
        let slope = self.slope_hz_per_s();
        self.start_frequency * 1e9
            + self.adc_start_time * 1e-6 * slope
            + (self.num_adc_samples / 2) as f64 / self.sampling_rate_hz() * slope
    }

    /// Wavenumber at the center frequency, in rad/m.
    pub fn center_wavenumber(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.center_frequency() / SPEED_OF_LIGHT
    }

    /// Target range (m) of a range-FFT bin of an `n_fft`-point FFT, corrected by
    /// the distance between antenna plane and scan plane.
    pub fn range_of_bin(&self, bin: usize, n_fft: usize, antenna_offset_m: f64) -> f64 {
        let ts = 1.0 / self.sampling_rate_hz();
        SPEED_OF_LIGHT / 2.0 * (bin as f64 / (self.slope_hz_per_s() * ts * n_fft as f64))
            - antenna_offset_m
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameConfig {
    /// Number of frames to record (0 means until stopped)
    pub num_frames: u32,
    /// Chirp loops per frame
    pub num_loops: usize,
    /// Frame periodicity in ms
    pub frame_periodicity: f64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            num_frames: 0,
            num_loops: 2,
            frame_periodicity: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    pub rx_channel_en: u8,
    pub tx_channel_en: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            rx_channel_en: RX_CHANNEL_MASK,
            tx_channel_en: TX_CHANNEL_MASK,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MimoConfig {
    pub profile: RadarProfile,
    pub frame: FrameConfig,
    pub channel: ChannelConfig,
}

/// Raster scan performed by the bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BracketProfile {
    /// Horizontal sampling pitch in mm
    pub dx: f64,
    /// Vertical sampling pitch in mm
    pub dy: f64,
    /// Number of scan rows
    pub row: usize,
    /// Number of samples (columns) per row
    pub col: usize,
    /// Scan log file name, relative to the capture directory
    pub timestamps: String,
    /// Manual time offset correction in s, added to the scan log's
    /// calibration entry. Defaults to zero.
    pub offset_time: f64,
    pub record_time: Option<f64>,
    pub run_time: Option<String>,
    pub files: Option<Vec<String>>,
    /// Serpentine scan: every other row runs in the opposite direction
    pub next_line_reverse: bool,
    /// With a serpentine scan, reverse the even rows instead of the odd ones
    pub reverse_first_line: bool,
    pub pre_acc: bool,
}

impl Default for BracketProfile {
    fn default() -> Self {
        Self {
            dx: 1.0,
            dy: 2.0,
            row: 151,
            col: 401,
            timestamps: "timestamps.txt".to_string(),
            offset_time: 0.0,
            record_time: None,
            run_time: None,
            files: None,
            next_line_reverse: false,
            reverse_first_line: false,
            pre_acc: false,
        }
    }
}

impl BracketProfile {
    /// Whether the columns of scan row `row` are stored in reversed order.
    pub fn is_reversed(&self, row: usize) -> bool {
        if !self.next_line_reverse {
            return false;
        }
        let odd = row % 2 == 1;
        odd != self.reverse_first_line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BracketConfig {
    pub profile: BracketProfile,
}

/// The full capture configuration as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmwConfig {
    pub mimo: MimoConfig,
    pub bracket: BracketConfig,
}

impl MmwConfig {
    /// Parse a configuration document without validating it.
    pub fn from_file(path: &Path) -> Result<Self, RepackError> {
        log::trace!("Reading configuration from {}", path.display());
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Parse and validate a configuration document.
    pub fn load(path: &Path) -> Result<ValidatedConfig, RepackError> {
        Self::from_file(path)?.validate()
    }

    /// Check the configuration against what the reconstruction supports.
    pub fn validate(self) -> Result<ValidatedConfig, RepackError> {
        let profile = &self.mimo.profile;
        let frame = &self.mimo.frame;
        let channel = &self.mimo.channel;
        let bracket = &self.bracket.profile;

        let counts = [
            ("numAdcSamples", profile.num_adc_samples),
            ("numLoops", frame.num_loops),
            ("row", bracket.row),
            ("col", bracket.col),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(RepackError::Validation(format!("{name} must be non-zero")));
            }
        }

        let positives = [
            ("framePeriodicity", frame.frame_periodicity),
            ("adcSamplingFrequency", profile.adc_sampling_frequency),
            ("frequencySlope", profile.frequency_slope),
            ("dx", bracket.dx),
            ("dy", bracket.dy),
        ];
        for (name, value) in positives {
            if !(value.is_finite() && value > 0.0) {
                return Err(RepackError::Validation(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        if !bracket.offset_time.is_finite() {
            return Err(RepackError::Validation(
                "offset_time must be finite".to_string(),
            ));
        }

        // Only the fully enabled 4-chip cascade is supported.
        if channel.rx_channel_en != RX_CHANNEL_MASK || channel.tx_channel_en != TX_CHANNEL_MASK {
            return Err(RepackError::Validation(format!(
                "channel masks rx={:#06b} tx={:#05b} do not enable the full cascade",
                channel.rx_channel_en, channel.tx_channel_en
            )));
        }

        Ok(ValidatedConfig { inner: self })
    }
}

/// A configuration that passed `MmwConfig::validate`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    inner: MmwConfig,
}

impl ValidatedConfig {
    pub fn samples_per_chirp(&self) -> usize {
        self.inner.mimo.profile.num_adc_samples
    }

    pub fn chirps_per_frame(&self) -> usize {
        self.inner.mimo.frame.num_loops
    }

    /// Frame periodicity in ms
    pub fn periodicity_ms(&self) -> f64 {
        self.inner.mimo.frame.frame_periodicity
    }

    pub fn rows(&self) -> usize {
        self.inner.bracket.profile.row
    }

    pub fn cols(&self) -> usize {
        self.inner.bracket.profile.col
    }

    /// The chirp of every frame that ends up in the assembled cube.
    pub fn representative_chirp(&self) -> usize {
        (self.chirps_per_frame() - 1).min(1)
    }

    pub fn raw(&self) -> &MmwConfig {
        &self.inner
    }
}

impl Deref for ValidatedConfig {
    type Target = MmwConfig;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
