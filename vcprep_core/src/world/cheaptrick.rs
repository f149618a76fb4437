//! CheapTrick spectral envelope estimation.
//!
//! A Hann window three pitch periods long makes the power spectrum
//! F0-adaptive; linear smoothing over 2/3 F0 and cepstral liftering then
//! remove the remaining harmonic ripple.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

use super::{interp_index, sample_at, FftPlan};

/// F0 substituted for unvoiced frames and frames below the window floor.
pub(crate) const DEFAULT_F0: f64 = 500.0;
/// Compensation lifter coefficient.
const Q1: f64 = -0.15;

pub(crate) struct CheapTrick<'a> {
    pub plan: &'a FftPlan,
    pub fs: f64,
    /// Lowest F0 whose window fits the FFT.
    pub f0_floor: f64,
}

impl CheapTrick<'_> {
    /// Envelope of the frame at `t` seconds, `fft_size / 2 + 1` bins.
    pub fn frame(&self, x: &[f64], f0: f64, t: f64, out: &mut [f64]) {
        let f0 = if f0 <= self.f0_floor { DEFAULT_F0 } else { f0 };
        let n = self.plan.size;

        let mut buf = self.windowed_waveform(x, f0, t);
        self.plan.forward(&mut buf);
        let mut power: Vec<f64> = buf[..=n / 2].iter().map(|c| c.norm_sqr()).collect();

        dc_correction(&mut power, f0, self.fs, n);
        let mut smoothed = linear_smoothing(&power, f0 * 2.0 / 3.0, self.fs, n);
        for v in &mut smoothed {
            *v += f64::EPSILON;
        }
        self.smoothing_with_recovery(&smoothed, f0, out);
    }

    fn windowed_waveform(&self, x: &[f64], f0: f64, t: f64) -> Vec<Complex<f64>> {
        let n = self.plan.size;
        let half = (1.5 * self.fs / f0).round() as isize;
        let half = half.min((n as isize - 1) / 2);
        let center = (t * self.fs + 0.001).round() as isize;

        let mut window: Vec<f64> = (-half..=half)
            .map(|base| {
                let position = base as f64 / 1.5 / self.fs;
                0.5 * (PI * position * f0).cos() + 0.5
            })
            .collect();
        let norm = window.iter().map(|w| w * w).sum::<f64>().sqrt();
        for w in &mut window {
            *w /= norm;
        }

        let mut wave: Vec<f64> = (-half..=half)
            .zip(&window)
            .map(|(base, w)| sample_at(x, center + base) * w)
            .collect();

        // Remove the DC component the window would otherwise leak.
        let weight = wave.iter().sum::<f64>() / window.iter().sum::<f64>();
        for (v, w) in wave.iter_mut().zip(&window) {
            *v -= w * weight;
        }

        let mut buf = vec![Complex::new(0.0, 0.0); n];
        for (slot, v) in buf.iter_mut().zip(wave) {
            slot.re = v;
        }
        buf
    }

    fn smoothing_with_recovery(&self, smoothed: &[f64], f0: f64, out: &mut [f64]) {
        let n = self.plan.size;
        let half = n / 2;

        let mut buf = vec![Complex::new(0.0, 0.0); n];
        for i in 0..=half {
            buf[i].re = smoothed[i].ln();
        }
        for i in 1..half {
            buf[n - i] = buf[i];
        }
        self.plan.inverse(&mut buf);

        for i in 0..=half {
            let quefrency = i as f64 / self.fs;
            let smoothing = if i == 0 {
                1.0
            } else {
                let arg = PI * f0 * quefrency;
                arg.sin() / arg
            };
            let compensation = (1.0 - 2.0 * Q1) + 2.0 * Q1 * (2.0 * PI * quefrency * f0).cos();
            buf[i] = Complex::new(buf[i].re / n as f64 * smoothing * compensation, 0.0);
        }
        for i in 1..half {
            buf[n - i] = buf[i];
        }
        self.plan.forward(&mut buf);

        for (o, c) in out.iter_mut().zip(&buf[..=half]) {
            *o = c.re.exp();
        }
    }
}

/// Fold the spectrum below F0 back onto itself to offset the window's DC bias.
fn dc_correction(power: &mut [f64], f0: f64, fs: f64, fft_size: usize) {
    let df = fs / fft_size as f64;
    let upper = (2 + (f0 / df) as usize).min(power.len());
    let original = power.to_vec();
    for (i, p) in power.iter_mut().enumerate().take(upper) {
        let mirrored = (f0 - i as f64 * df) / df;
        if mirrored >= 0.0 {
            *p += interp_index(&original, mirrored);
        }
    }
}

/// Moving average of `width` Hz over the spectrum, mirrored at both edges.
fn linear_smoothing(power: &[f64], width: f64, fs: f64, fft_size: usize) -> Vec<f64> {
    let df = fs / fft_size as f64;
    let half = power.len() - 1;
    let boundary = (width / df) as usize + 1;

    let mut mirrored = Vec::with_capacity(power.len() + 2 * boundary);
    for i in 0..boundary {
        mirrored.push(power[(boundary - i).min(half)]);
    }
    mirrored.extend_from_slice(power);
    for i in 0..boundary {
        mirrored.push(power[half.saturating_sub(1 + i)]);
    }

    let mut cumulative = Vec::with_capacity(mirrored.len());
    let mut acc = 0.0;
    for v in mirrored {
        acc += v * df;
        cumulative.push(acc);
    }

    let position = |f: f64| f / df + boundary as f64 - 0.5;
    (0..=half)
        .map(|i| {
            let f = i as f64 * df;
            let hi = interp_index(&cumulative, position(f + width / 2.0));
            let lo = interp_index(&cumulative, position(f - width / 2.0));
            (hi - lo) / width
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_preserves_flat_spectrum() {
        let flat = vec![2.0; 513];
        let out = linear_smoothing(&flat, 100.0, 16_000.0, 1024);
        assert_eq!(out.len(), 513);
        assert!(out.iter().all(|v| (v - 2.0).abs() < 1e-9), "{:?}", &out[..4]);
    }

    #[test]
    fn envelope_of_tone_peaks_near_its_frequency() {
        let plan = FftPlan::new(1024);
        let ct = CheapTrick {
            plan: &plan,
            fs: 16_000.0,
            f0_floor: 47.0,
        };
        // Harmonic-rich 200 Hz pulse with a strong 1 kHz partial.
        let x: Vec<f64> = (0..4000)
            .map(|i| {
                let t = i as f64 / 16_000.0;
                0.1 * (2.0 * PI * 200.0 * t).sin() + 0.5 * (2.0 * PI * 1000.0 * t).sin()
            })
            .collect();
        let mut env = vec![0.0; 513];
        ct.frame(&x, 200.0, 0.125, &mut env);

        assert!(env.iter().all(|v| v.is_finite() && *v > 0.0));
        let peak = env
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as f64 * 16_000.0 / 1024.0)
            .unwrap();
        assert!((peak - 1000.0).abs() < 250.0, "peak at {peak} Hz");
    }
}
