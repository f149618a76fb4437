//! Coded spectral envelope: mel-warped log envelope reduced with a DCT-II.

use std::f64::consts::PI;

use ndarray::Array2;

/// Lower edge of the mel axis, Hz.
const FLOOR_FREQUENCY: f64 = 40.0;

fn frequency_to_mel(f: f64) -> f64 {
    1127.01048 * (f / 700.0 + 1.0).ln()
}

/// Compresses a spectral envelope into `dim` mel-cepstral-like coefficients.
///
/// The log envelope is resampled onto `fft_size / 2` mel-uniform points
/// between 40 Hz and Nyquist and reduced with an orthonormal DCT-II, keeping
/// the first `dim` coefficients.
pub(crate) struct EnvelopeCoder {
    /// Mel value of every FFT bin.
    bin_mel: Vec<f64>,
    /// Uniform mel grid the log envelope is resampled onto.
    mel_axis: Vec<f64>,
    /// `dim x mel_axis.len()` DCT basis.
    basis: Array2<f64>,
}

impl EnvelopeCoder {
    pub fn new(fs: f64, fft_size: usize, dim: usize) -> Self {
        let points = fft_size / 2;
        let floor_mel = frequency_to_mel(FLOOR_FREQUENCY);
        let ceil_mel = frequency_to_mel(fs / 2.0);

        let bin_mel = (0..=points)
            .map(|i| frequency_to_mel(i as f64 * fs / fft_size as f64))
            .collect();
        let mel_axis = (0..points)
            .map(|i| (ceil_mel - floor_mel) * i as f64 / points as f64 + floor_mel)
            .collect();

        let n = points as f64;
        let basis = Array2::from_shape_fn((dim, points), |(k, j)| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            scale * (PI * k as f64 * (2.0 * j as f64 + 1.0) / (2.0 * n)).cos()
        });

        Self {
            bin_mel,
            mel_axis,
            basis,
        }
    }

    pub fn dim(&self) -> usize {
        self.basis.nrows()
    }

    /// Code one frame's envelope (`fft_size / 2 + 1` bins) into `out`.
    pub fn code(&self, envelope: &[f64], out: &mut [f64]) {
        let log_env: Vec<f64> = envelope.iter().map(|v| v.max(f64::MIN_POSITIVE).ln()).collect();
        let mel_spectrum = self.resample(&log_env);
        for (o, row) in out.iter_mut().zip(self.basis.rows()) {
            *o = row.iter().zip(&mel_spectrum).map(|(b, m)| b * m).sum();
        }
    }

    /// Linear interpolation of `values` (on `bin_mel`) at each `mel_axis` point.
    fn resample(&self, values: &[f64]) -> Vec<f64> {
        let mut seg = 0;
        self.mel_axis
            .iter()
            .map(|&m| {
                while seg + 2 < self.bin_mel.len() && self.bin_mel[seg + 1] < m {
                    seg += 1;
                }
                let (x0, x1) = (self.bin_mel[seg], self.bin_mel[seg + 1]);
                let (y0, y1) = (values[seg], values[seg + 1]);
                let frac = ((m - x0) / (x1 - x0)).clamp(0.0, 1.0);
                y0 + (y1 - y0) * frac
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_envelope_codes_to_dc_only() {
        let coder = EnvelopeCoder::new(16_000.0, 1024, 36);
        assert_eq!(coder.dim(), 36);

        let mut out = vec![0.0; 36];
        coder.code(&vec![1.0; 513], &mut out);
        assert!(out.iter().all(|v| v.abs() < 1e-9));

        let level = 2.0f64;
        coder.code(&vec![level; 513], &mut out);
        assert!((out[0] - level.ln() * 512f64.sqrt()).abs() < 1e-9);
        assert!(out[1..].iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn brighter_envelope_changes_first_cepstral_slope() {
        let coder = EnvelopeCoder::new(16_000.0, 1024, 8);
        let rising: Vec<f64> = (0..513).map(|i| 1.0 + i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        let (mut a, mut b) = (vec![0.0; 8], vec![0.0; 8]);
        coder.code(&rising, &mut a);
        coder.code(&falling, &mut b);
        assert!(a[1] < 0.0 && b[1] > 0.0, "{a:?} {b:?}");
    }
}
