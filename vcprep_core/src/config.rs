//! Preprocessing configuration and its TOML loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// Immutable settings shared by every pipeline stage.
///
/// Defaults reproduce the StarGAN-VC preprocessing setup: 16 kHz audio,
/// 36-dimensional coded envelopes cut into 512-frame segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    pub sample_rate: u32,
    pub feature_dim: usize,
    pub frames: usize,
    pub fft_size: usize,
    pub chunk_size: usize,
    pub pre_emphasis: f64,
    pub top_db: f64,
    pub trim_frame_length: usize,
    pub trim_hop_length: usize,
    pub frame_period_ms: f64,
    pub f0_floor: f64,
    pub f0_ceil: f64,
    pub workers: usize,
    /// Only these speakers are processed when set.
    pub speakers: Option<Vec<String>>,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            feature_dim: 36,
            frames: 512,
            fft_size: 1024,
            chunk_size: 1,
            pre_emphasis: 0.97,
            top_db: 15.0,
            trim_frame_length: 2048,
            trim_hop_length: 512,
            frame_period_ms: 5.0,
            f0_floor: 71.0,
            f0_ceil: 800.0,
            workers: 1,
            speakers: None,
        }
    }
}

impl PrepConfig {
    /// Load a config from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
        let cfg: Self = toml::from_str(&text)
            .map_err(|e| PrepError::InvalidConfig(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PrepError::InvalidConfig(msg));

        if self.sample_rate == 0 {
            return fail("sample_rate must be positive".into());
        }
        for (name, value) in [
            ("feature_dim", self.feature_dim),
            ("frames", self.frames),
            ("fft_size", self.fft_size),
            ("chunk_size", self.chunk_size),
            ("trim_frame_length", self.trim_frame_length),
            ("trim_hop_length", self.trim_hop_length),
            ("workers", self.workers),
        ] {
            if value == 0 {
                return fail(format!("{name} must be positive"));
            }
        }
        if self.feature_dim > self.fft_size / 2 {
            return fail(format!(
                "feature_dim {} exceeds fft_size / 2 = {}",
                self.feature_dim,
                self.fft_size / 2
            ));
        }
        if !(0.0..1.0).contains(&self.pre_emphasis) {
            return fail(format!("pre_emphasis {} outside [0, 1)", self.pre_emphasis));
        }
        if self.top_db <= 0.0 {
            return fail("top_db must be positive".into());
        }
        if self.frame_period_ms <= 0.0 {
            return fail("frame_period_ms must be positive".into());
        }
        if self.f0_floor <= 0.0 || self.f0_floor >= self.f0_ceil {
            return fail(format!(
                "f0 range [{}, {}] is empty",
                self.f0_floor, self.f0_ceil
            ));
        }
        if self.f0_ceil >= self.sample_rate as f64 / 2.0 {
            return fail(format!("f0_ceil {} is above Nyquist", self.f0_ceil));
        }
        if self.fft_size < self.min_fft_size() {
            return fail(format!(
                "fft_size {} cannot hold the envelope window; need at least {}",
                self.fft_size,
                self.min_fft_size()
            ));
        }
        Ok(())
    }

    /// Hop between analysis frames, in seconds.
    pub fn frame_period_secs(&self) -> f64 {
        self.frame_period_ms / 1000.0
    }

    /// Number of analysis frames produced for `samples` input samples.
    pub fn frame_count(&self, samples: usize) -> usize {
        (1000.0 * samples as f64 / self.sample_rate as f64 / self.frame_period_ms).floor() as usize
            + 1
    }

    /// Lowest F0 whose three-period window fits in `fft_size`.
    pub fn envelope_f0_floor(&self) -> f64 {
        3.0 * self.sample_rate as f64 / (self.fft_size as f64 - 3.0)
    }

    fn min_fft_size(&self) -> usize {
        // The 500 Hz fallback window must fit at minimum.
        (3.0 * self.sample_rate as f64 / 500.0).ceil() as usize + 4
    }

    pub fn allows_speaker(&self, speaker: &str) -> bool {
        match &self.speakers {
            Some(list) => list.iter().any(|s| s == speaker),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PrepConfig::default().validate().unwrap();
    }

    #[test]
    fn frame_count_matches_five_ms_hop() {
        let cfg = PrepConfig::default();
        assert_eq!(cfg.frame_count(0), 1);
        assert_eq!(cfg.frame_count(79), 1);
        assert_eq!(cfg.frame_count(80), 2);
        assert_eq!(cfg.frame_count(47_920), 600);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = PrepConfig::default();
        cfg.frames = 0;
        assert!(matches!(cfg.validate(), Err(PrepError::InvalidConfig(_))));

        let mut cfg = PrepConfig::default();
        cfg.feature_dim = 600;
        assert!(cfg.validate().is_err());

        let mut cfg = PrepConfig::default();
        cfg.f0_floor = 900.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PrepConfig::default();
        cfg.pre_emphasis = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PrepConfig::default();
        cfg.fft_size = 64;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PrepConfig = toml::from_str("frames = 128\nspeakers = [\"A\"]").unwrap();
        assert_eq!(cfg.frames, 128);
        assert_eq!(cfg.feature_dim, 36);
        assert!(cfg.allows_speaker("A"));
        assert!(!cfg.allows_speaker("B"));
    }
}
