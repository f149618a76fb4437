//! F0 estimation.
//!
//! Per frame: cumulative-mean-normalised difference over lags covering
//! `[f0_floor, f0_ceil]`, first dip below [`VOICING_THRESHOLD`], parabolic
//! refinement. Frames that never dip, or carry no energy, are unvoiced (0).

/// Largest normalised difference accepted as periodic.
const VOICING_THRESHOLD: f64 = 0.15;
/// Voiced runs shorter than this many frames are zeroed.
const MIN_VOICED_RUN: usize = 3;
/// Mean-square energy under which a frame is treated as silence.
const SILENCE_ENERGY: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub(crate) struct F0Search {
    pub fs: f64,
    pub frame_period: f64,
    pub f0_floor: f64,
    pub f0_ceil: f64,
}

impl F0Search {
    /// Estimate one F0 value per frame; frame `i` sits at `i * frame_period`.
    pub fn estimate(&self, x: &[f64], n_frames: usize) -> Vec<f64> {
        let tau_min = ((self.fs / self.f0_ceil).floor() as usize).max(2);
        let tau_max = (self.fs / self.f0_floor).ceil() as usize;
        let window = tau_max;

        let mut buf = vec![0.0; window + tau_max + 1];
        let mut diff = vec![0.0; tau_max + 2];

        let mut f0: Vec<f64> = (0..n_frames)
            .map(|i| {
                let center = (i as f64 * self.frame_period * self.fs).round() as isize;
                let start = center - window as isize / 2;
                fill_frame(x, start, &mut buf);
                self.frame_f0(&buf, window, tau_min, tau_max, &mut diff)
            })
            .collect();

        remove_short_runs(&mut f0, MIN_VOICED_RUN);
        f0
    }

    fn frame_f0(
        &self,
        buf: &[f64],
        window: usize,
        tau_min: usize,
        tau_max: usize,
        cmnd: &mut [f64],
    ) -> f64 {
        let energy = buf[..window].iter().map(|v| v * v).sum::<f64>() / window as f64;
        if energy < SILENCE_ENERGY {
            return 0.0;
        }

        cmnd[0] = 1.0;
        let mut running = 0.0;
        for tau in 1..=tau_max + 1 {
            let d: f64 = (0..window)
                .map(|j| {
                    let e = buf[j] - buf.get(j + tau).copied().unwrap_or(0.0);
                    e * e
                })
                .sum();
            running += d;
            cmnd[tau] = if running > 0.0 { d * tau as f64 / running } else { 1.0 };
        }

        let Some(mut tau) = (tau_min..tau_max).find(|&t| cmnd[t] < VOICING_THRESHOLD) else {
            return 0.0;
        };
        while tau + 1 < tau_max && cmnd[tau + 1] < cmnd[tau] {
            tau += 1;
        }

        let (a, b, c) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
        let denom = a - 2.0 * b + c;
        let shift = if denom.abs() > f64::EPSILON {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };

        let f0 = self.fs / (tau as f64 + shift);
        if (self.f0_floor..=self.f0_ceil).contains(&f0) {
            f0
        } else {
            0.0
        }
    }
}

/// Copy `x[start..start + buf.len()]` into `buf`, zero outside the signal.
fn fill_frame(x: &[f64], start: isize, buf: &mut [f64]) {
    for (j, slot) in buf.iter_mut().enumerate() {
        let idx = start + j as isize;
        *slot = if idx >= 0 {
            x.get(idx as usize).copied().unwrap_or(0.0)
        } else {
            0.0
        };
    }
}

fn remove_short_runs(f0: &mut [f64], min_run: usize) {
    let mut i = 0;
    while i < f0.len() {
        if f0[i] == 0.0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < f0.len() && f0[i] > 0.0 {
            i += 1;
        }
        if i - start < min_run {
            f0[start..i].fill(0.0);
        }
    }
}
