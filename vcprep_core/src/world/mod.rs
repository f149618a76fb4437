//! Vocoder analysis: F0, spectral envelope, aperiodicity and coded envelope.
//!
//! Follows the WORLD decomposition. F0 and the frame time axis are estimated
//! first; envelope and aperiodicity are then computed frame by frame at those
//! times, conditioned on the F0 estimate. Output for a given waveform is
//! fully deterministic.

mod cheaptrick;
mod codec;
mod d4c;
mod f0;

use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use crate::config::PrepConfig;
use cheaptrick::CheapTrick;
use codec::EnvelopeCoder;
use d4c::D4c;
use f0::F0Search;

/// Aligned analysis products for one waveform.
///
/// `T` is the frame count, `F = fft_size / 2 + 1` and `D` the coded
/// dimension.
#[derive(Debug, Clone)]
pub struct VocoderFeatures {
    /// `T` values in Hz, 0 where unvoiced.
    pub f0: Array1<f64>,
    /// `T` frame times in seconds.
    pub time_axis: Array1<f64>,
    /// `F x T`
    pub spectral_envelope: Array2<f64>,
    /// `F x T`
    pub aperiodicity: Array2<f64>,
    /// `D x T`
    pub coded_sp: Array2<f64>,
}

impl VocoderFeatures {
    pub fn frames(&self) -> usize {
        self.f0.len()
    }

    pub fn voiced_frames(&self) -> usize {
        self.f0.iter().filter(|&&v| v > 0.0).count()
    }

    /// True when no frame carries a pitch estimate.
    pub fn is_unvoiced(&self) -> bool {
        self.voiced_frames() == 0
    }
}

/// Forward/inverse complex FFT plans of one size.
pub(crate) struct FftPlan {
    pub size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl FftPlan {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    pub fn forward(&self, buf: &mut [Complex<f64>]) {
        self.forward.process(buf);
    }

    /// Unnormalised inverse transform.
    pub fn inverse(&self, buf: &mut [Complex<f64>]) {
        self.inverse.process(buf);
    }
}

/// Sample at `idx`, clamped to the signal edges; 0 for an empty signal.
pub(crate) fn sample_at(x: &[f64], idx: isize) -> f64 {
    match x.len() {
        0 => 0.0,
        len => x[idx.clamp(0, len as isize - 1) as usize],
    }
}

/// Linear interpolation of `values` at fractional index `pos`, clamped.
pub(crate) fn interp_index(values: &[f64], pos: f64) -> f64 {
    let Some(&last) = values.last() else {
        return 0.0;
    };
    if pos <= 0.0 {
        return values[0];
    }
    let i = pos.floor() as usize;
    if i + 1 >= values.len() {
        return last;
    }
    let frac = pos - i as f64;
    values[i] + (values[i + 1] - values[i]) * frac
}

/// Vocoder analysis bound to one configuration.
///
/// Construction plans the FFTs and precomputes the envelope coder, so one
/// analyzer should be reused across batches.
pub struct VocoderAnalyzer {
    fs: f64,
    frame_period_ms: f64,
    f0_search: F0Search,
    envelope_f0_floor: f64,
    plan: FftPlan,
    coder: EnvelopeCoder,
}

impl VocoderAnalyzer {
    pub fn new(cfg: &PrepConfig) -> Self {
        let fs = cfg.sample_rate as f64;
        Self {
            fs,
            frame_period_ms: cfg.frame_period_ms,
            f0_search: F0Search {
                fs,
                frame_period: cfg.frame_period_secs(),
                f0_floor: cfg.f0_floor,
                f0_ceil: cfg.f0_ceil,
            },
            envelope_f0_floor: cfg.envelope_f0_floor(),
            plan: FftPlan::new(cfg.fft_size),
            coder: EnvelopeCoder::new(fs, cfg.fft_size, cfg.feature_dim),
        }
    }

    fn frame_count(&self, samples: usize) -> usize {
        (1000.0 * samples as f64 / self.fs / self.frame_period_ms).floor() as usize + 1
    }

    /// Analyse `x`. Never fails: silent or very short input comes back with
    /// an all-zero F0 contour.
    pub fn analyze(&self, x: &[f64]) -> VocoderFeatures {
        let n_frames = self.frame_count(x.len());
        let bins = self.plan.size / 2 + 1;
        let dim = self.coder.dim();

        let time_axis =
            Array1::from_shape_fn(n_frames, |i| i as f64 * self.frame_period_ms / 1000.0);
        let f0 = Array1::from(self.f0_search.estimate(x, n_frames));

        let cheaptrick = CheapTrick {
            plan: &self.plan,
            fs: self.fs,
            f0_floor: self.envelope_f0_floor,
        };
        let d4c = D4c {
            plan: &self.plan,
            fs: self.fs,
        };

        let mut spectral_envelope = Array2::zeros((bins, n_frames));
        let mut aperiodicity = Array2::zeros((bins, n_frames));
        let mut coded_sp = Array2::zeros((dim, n_frames));

        let mut env = vec![0.0; bins];
        let mut ap = vec![0.0; bins];
        let mut coded = vec![0.0; dim];
        for (i, (&f, &t)) in f0.iter().zip(time_axis.iter()).enumerate() {
            cheaptrick.frame(x, f, t, &mut env);
            d4c.frame(x, f, t, &mut ap);
            self.coder.code(&env, &mut coded);

            spectral_envelope.column_mut(i).assign(&ArrayView1::from(env.as_slice()));
            aperiodicity.column_mut(i).assign(&ArrayView1::from(ap.as_slice()));
            coded_sp.column_mut(i).assign(&ArrayView1::from(coded.as_slice()));
        }

        let features = VocoderFeatures {
            f0,
            time_axis,
            spectral_envelope,
            aperiodicity,
            coded_sp,
        };
        debug!(
            samples = x.len(),
            frames = features.frames(),
            voiced = features.voiced_frames(),
            "analysed waveform"
        );
        features
    }
}
