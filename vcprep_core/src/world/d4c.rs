//! Band aperiodicity.
//!
//! Coarse aperiodicity is measured in 3 kHz-spaced bands as the ratio of
//! inter-harmonic to harmonic energy, then interpolated in dB across the FFT
//! bins between a -60 dB anchor at DC and a ~0 dB anchor at Nyquist.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

use super::{interp_index, sample_at, FftPlan};

/// Aperiodicity reported for unvoiced frames.
pub(crate) const UNVOICED_APERIODICITY: f64 = 1.0 - 1e-12;

const BAND_SPACING: f64 = 3000.0;
const UPPER_BAND_LIMIT: f64 = 15_000.0;
const FLOOR_DB: f64 = -60.0;
/// Pitch periods covered by the analysis window.
const WINDOW_PERIODS: f64 = 4.0;

pub(crate) struct D4c<'a> {
    pub plan: &'a FftPlan,
    pub fs: f64,
}

impl D4c<'_> {
    pub fn band_count(&self) -> usize {
        let top = UPPER_BAND_LIMIT.min(self.fs / 2.0 - BAND_SPACING);
        if top <= 0.0 {
            0
        } else {
            (top / BAND_SPACING) as usize
        }
    }

    /// Aperiodicity of the frame at `t` seconds, `fft_size / 2 + 1` bins.
    pub fn frame(&self, x: &[f64], f0: f64, t: f64, out: &mut [f64]) {
        if f0 <= 0.0 {
            out.fill(UNVOICED_APERIODICITY);
            return;
        }

        let power = self.power_spectrum(x, f0, t);
        let df = self.fs / self.plan.size as f64;

        let mut anchors = vec![(0.0, FLOOR_DB)];
        for k in 1..=self.band_count() {
            let center = k as f64 * BAND_SPACING;
            anchors.push((center, band_aperiodicity_db(&power, f0, center, df)));
        }
        anchors.push((self.fs / 2.0, -1e-12));

        for (i, o) in out.iter_mut().enumerate() {
            let db = interp_anchors(&anchors, i as f64 * df);
            *o = 10f64.powf(db / 20.0);
        }
    }

    fn power_spectrum(&self, x: &[f64], f0: f64, t: f64) -> Vec<f64> {
        let n = self.plan.size;
        let half_window = ((WINDOW_PERIODS / 2.0 * self.fs / f0).round() as isize)
            .min((n as isize - 1) / 2)
            .max(1);
        let center = (t * self.fs).round() as isize;
        let len = (2 * half_window + 1) as f64;

        let mut buf = vec![Complex::new(0.0, 0.0); n];
        for (slot, base) in buf.iter_mut().zip(-half_window..=half_window) {
            let pos = (base + half_window) as f64;
            let w = 0.5 - 0.5 * (2.0 * PI * (pos + 1.0) / (len + 1.0)).cos();
            slot.re = sample_at(x, center + base) * w;
        }
        self.plan.forward(&mut buf);
        buf[..=n / 2].iter().map(|c| c.norm_sqr()).collect()
    }
}

/// Inter-harmonic to harmonic energy ratio, in dB, within one band.
fn band_aperiodicity_db(power: &[f64], f0: f64, center: f64, df: f64) -> f64 {
    let lo = center - BAND_SPACING / 2.0;
    let hi = center + BAND_SPACING / 2.0;

    let first = (lo / f0).ceil().max(1.0) as usize;
    let last = (hi / f0).floor() as usize;

    let mut harmonic = 0.0;
    let mut noise = 0.0;
    for h in first..=last {
        let bin = h as f64 * f0 / df;
        harmonic += peak_around(power, bin);
        noise += interp_index(power, bin + 0.5 * f0 / df);
    }

    if harmonic <= f64::MIN_POSITIVE {
        return 0.0;
    }
    (10.0 * (noise / harmonic).max(1e-12).log10()).clamp(FLOOR_DB, 0.0)
}

fn peak_around(power: &[f64], bin: f64) -> f64 {
    let center = bin.round() as isize;
    (center - 1..=center + 1)
        .filter_map(|i| usize::try_from(i).ok().and_then(|i| power.get(i)))
        .copied()
        .fold(0.0, f64::max)
}

fn interp_anchors(anchors: &[(f64, f64)], f: f64) -> f64 {
    match anchors.windows(2).find(|w| f <= w[1].0) {
        Some(w) => {
            let ((x0, y0), (x1, y1)) = (w[0], w[1]);
            if x1 <= x0 {
                y1
            } else {
                y0 + (y1 - y0) * (f - x0) / (x1 - x0)
            }
        }
        None => anchors.last().map(|a| a.1).unwrap_or(0.0),
    }
}
