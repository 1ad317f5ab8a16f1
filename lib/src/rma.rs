//! Range migration imaging
//!
//! Frequency-domain (Stolt-style) migration of one range slice of the
//! assembled cube into a focused 2-D image.
use ndarray::{s, Array1, Array2, ArrayView2, ArrayView6, Axis};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::errors::ImagingError;

/// Default spatial FFT size
pub const DEFAULT_FFT_SIZE: usize = 512;

/// Value substituted for exact zeros of a range slice
const ZERO_FLOOR: f64 = 1e-10;

/// Parameters of one migration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmaParams {
    /// Horizontal (column) sampling pitch in mm
    pub dx_mm: f64,
    /// Vertical (row) sampling pitch in mm
    pub dy_mm: f64,
    /// Target range in m
    pub range_m: f64,
    /// Radar center wavenumber in rad/m
    pub wavenumber: f64,
    /// Requested spatial FFT size
    pub fft_size: usize,
}

impl RmaParams {
    pub fn new(dx_mm: f64, dy_mm: f64, range_m: f64, wavenumber: f64) -> Self {
        Self {
            dx_mm,
            dy_mm,
            range_m,
            wavenumber,
            fft_size: DEFAULT_FFT_SIZE,
        }
    }

    fn validate(&self) -> Result<(), ImagingError> {
        let positives = [
            ("dx", self.dx_mm),
            ("dy", self.dy_mm),
            ("wavenumber", self.wavenumber),
        ];
        for (name, value) in positives {
            if !(value.is_finite() && value > 0.0) {
                return Err(ImagingError::InvalidParameter { name, value });
            }
        }
        if !self.range_m.is_finite() {
            return Err(ImagingError::InvalidParameter {
                name: "range",
                value: self.range_m,
            });
        }
        if self.fft_size == 0 {
            return Err(ImagingError::InvalidParameter {
                name: "fft_size",
                value: 0.0,
            });
        }
        Ok(())
    }
}

/// FFT size used for an echo whose larger dimension is `extent`.
pub fn fft_size_for(requested: usize, extent: usize) -> usize {
    if extent <= requested {
        requested
    } else {
        extent.next_power_of_two()
    }
}

/// Complex echo of one RX/TX pair at one range bin.
///
/// Runs an FFT along the sample axis of `I + jQ` for every scan position.
///
/// # Arguments
/// * `cube` - Assembled cube `(rx, tx, rows, cols, samples, IQ)`
/// * `rx`, `tx` - Channel pair
/// * `bin` - 0-based range bin
pub fn range_slice(
    cube: ArrayView6<i16>,
    rx: usize,
    tx: usize,
    bin: usize,
) -> Result<Array2<Complex64>, ImagingError> {
    let shape = cube.shape();
    let checks = [("rx", rx, shape[0]), ("tx", tx, shape[1]), ("bin", bin, shape[4])];
    for (name, index, size) in checks {
        if index >= size {
            return Err(ImagingError::OutOfRange { name, index, size });
        }
    }

    let (rows, cols, samples) = (shape[2], shape[3], shape[4]);
    let pair = cube.slice(s![rx, tx, .., .., .., ..]);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(samples);
    let mut buf = vec![Complex64::default(); samples];

    let mut out = Array2::<Complex64>::zeros((rows, cols));
    for ((r, c), value) in out.indexed_iter_mut() {
        for (b, iq) in buf.iter_mut().zip(pair.slice(s![r, c, .., ..]).outer_iter()) {
            *b = Complex64::new(iq[0] as f64, iq[1] as f64);
        }
        fft.process(&mut buf);
        let v = buf[bin];
        *value = if v == Complex64::default() {
            Complex64::new(ZERO_FLOOR, 0.0)
        } else {
            v
        };
    }
    Ok(out)
}

/// Reconstruct a focused image from a range slice.
///
/// The echo (rows along y, columns along x) is centered in an `N x N` grid,
/// transformed, multiplied with the matched filter `kz * exp(-j R kz)` and
/// transformed back. `N` is `params.fft_size`, grown to the next power of
/// two if the echo doesn't fit.
pub fn rma(echo: ArrayView2<Complex64>, params: &RmaParams) -> Result<Array2<Complex64>, ImagingError> {
    let (rows, cols) = echo.dim();
    if rows == 0 || cols == 0 {
        return Err(ImagingError::EmptyEcho);
    }
    params.validate()?;

    let n = fft_size_for(params.fft_size, rows.max(cols));
    log::debug!(
        "RMA on {}x{} echo with {}-point FFT, R={:.4} m, k={:.2} rad/m",
        rows,
        cols,
        n,
        params.range_m,
        params.wavenumber
    );

    let mut spectrum = centered(echo, n);
    let mut planner = FftPlanner::new();
    fft2(&mut spectrum, planner.plan_fft_forward(n).as_ref());
    let phase = phase_factor(n, params);
    spectrum.zip_mut_with(&phase, |s, p| *s *= *p);
    fft2(&mut spectrum, planner.plan_fft_inverse(n).as_ref());

    let scale = 1.0 / (n * n) as f64;
    spectrum.mapv_inplace(|v| v * scale);
    Ok(spectrum)
}

/// Zero-pad `echo` to `n x n` with the echo in the middle. An odd padding
/// puts the extra zero row or column on the trailing side.
fn centered(echo: ArrayView2<Complex64>, n: usize) -> Array2<Complex64> {
    let (rows, cols) = echo.dim();
    let (r0, c0) = ((n - rows) / 2, (n - cols) / 2);
    let mut padded = Array2::<Complex64>::zeros((n, n));
    padded
        .slice_mut(s![r0..r0 + rows, c0..c0 + cols])
        .assign(&echo);
    padded
}

/// Matched filter in FFT order: rows follow ky, columns follow kx.
fn phase_factor(n: usize, params: &RmaParams) -> Array2<Complex64> {
    let ws_x = 2.0 * PI / (params.dx_mm * 1e-3);
    let ws_y = 2.0 * PI / (params.dy_mm * 1e-3);
    let kx = Array1::linspace(-ws_x / 2.0, ws_x / 2.0, n);
    let ky = Array1::linspace(-ws_y / 2.0, ws_y / 2.0, n);
    let k2 = (2.0 * params.wavenumber).powi(2);

    let mut shifted = Array2::<Complex64>::zeros((n, n));
    for r in 0..n {
        for c in 0..n {
            let radicand = k2 - kx[c] * kx[c] - ky[r] * ky[r];
            // evanescent
            let kz = if radicand > 0.0 { radicand.sqrt() } else { 0.0 };
            let value = Complex64::from_polar(kz, -params.range_m * kz);
            shifted[[(r + n / 2) % n, (c + n / 2) % n]] = value;
        }
    }
    shifted
}

/// In-place 2-D FFT of a square matrix.
fn fft2(data: &mut Array2<Complex64>, fft: &dyn Fft<f64>) {
    let mut buf = vec![Complex64::default(); data.nrows()];
    for axis in [Axis(1), Axis(0)] {
        for mut lane in data.lanes_mut(axis) {
            for (b, v) in buf.iter_mut().zip(lane.iter()) {
                *b = *v;
            }
            fft.process(&mut buf);
            for (v, b) in lane.iter_mut().zip(&buf) {
                *v = *b;
            }
        }
    }
}

/// Pixel of largest magnitude: `(row, col, magnitude)`
pub fn peak(image: ArrayView2<Complex64>) -> Option<(usize, usize, f64)> {
    image
        .indexed_iter()
        .map(|((r, c), v)| (r, c, v.norm()))
        .fold(None, |best, cur| match best {
            Some((_, _, m)) if m >= cur.2 => best,
            _ => Some(cur),
        })
}

/// Write an image as interleaved little-endian f64 `(re, im)` pairs, row-major.
pub fn write_complex_image(path: &Path, image: ArrayView2<Complex64>) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for v in image.iter() {
        writer.write_all(&v.re.to_le_bytes())?;
        writer.write_all(&v.im.to_le_bytes())?;
    }
    writer.flush()
}
