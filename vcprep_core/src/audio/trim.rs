//! Silence trimming and pre-emphasis.

/// Floor applied to frame power before conversion to dB.
const POWER_FLOOR: f64 = 1e-10;

/// Trim leading and trailing frames quieter than `top_db` below the loudest
/// frame.
///
/// Loudness is the RMS of centred, zero-padded frames of `frame_length`
/// samples taken every `hop_length` samples. The kept region runs from the
/// first loud frame's start to the end of the last loud frame, clipped to the
/// signal.
pub fn trim_silence(y: &[f64], top_db: f64, frame_length: usize, hop_length: usize) -> &[f64] {
    if y.is_empty() {
        return y;
    }

    let power = frame_power(y, frame_length, hop_length);
    let peak = power.iter().copied().fold(POWER_FLOOR, f64::max);
    let ref_db = 10.0 * peak.log10();

    let loud = |p: f64| 10.0 * p.max(POWER_FLOOR).log10() - ref_db > -top_db;

    let Some(first) = power.iter().position(|&p| loud(p)) else {
        return &y[..0];
    };
    // `first` exists, so `rposition` does too.
    let last = power.iter().rposition(|&p| loud(p)).unwrap_or(first);

    let start = (first * hop_length).min(y.len());
    let end = ((last + 1) * hop_length).min(y.len());
    &y[start..end.max(start)]
}

/// Mean square of each centred analysis frame.
fn frame_power(y: &[f64], frame_length: usize, hop_length: usize) -> Vec<f64> {
    let pad = frame_length / 2;
    let n_frames = 1 + y.len() / hop_length;

    (0..n_frames)
        .map(|t| {
            // Frame t covers padded[t*hop .. t*hop + frame_length].
            let lo = (t * hop_length) as isize - pad as isize;
            let hi = lo + frame_length as isize;
            let a = lo.max(0) as usize;
            let b = (hi.max(0) as usize).min(y.len());
            let sum: f64 = if a < b { y[a..b].iter().map(|v| v * v).sum() } else { 0.0 };
            sum / frame_length as f64
        })
        .collect()
}

/// First-order pre-emphasis: `y[0] = x[0]`, `y[n] = x[n] - alpha * x[n-1]`.
pub fn pre_emphasis(x: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    if let Some(&first) = x.first() {
        out.push(first);
        out.extend(x.windows(2).map(|w| w[1] - alpha * w[0]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, amp: f64) -> Vec<f64> {
        (0..len)
            .map(|i| amp * (2.0 * std::f64::consts::PI * 220.0 * i as f64 / 16_000.0).sin())
            .collect()
    }

    #[test]
    fn pre_emphasis_keeps_length_and_first_sample() {
        let x = [0.5, 1.0, -1.0, 0.25];
        let y = pre_emphasis(&x, 0.97);
        assert_eq!(y.len(), x.len());
        assert_eq!(y[0], x[0]);
        assert!((y[1] - (1.0 - 0.97 * 0.5)).abs() < 1e-12);
        assert!((y[2] - (-1.0 - 0.97)).abs() < 1e-12);
        assert!(pre_emphasis(&[], 0.97).is_empty());
        assert_eq!(pre_emphasis(&[0.3], 0.97), vec![0.3]);
    }

    #[test]
    fn trims_silent_edges() {
        let mut y = vec![0.0; 8192];
        y.extend(tone(16_000, 0.5));
        y.extend(vec![0.0; 8192]);

        let trimmed = trim_silence(&y, 15.0, 2048, 512);
        assert!(trimmed.len() < y.len());
        assert!(trimmed.len() >= 16_000);
        // Silence may survive only up to one frame on either side.
        assert!(trimmed.len() <= 16_000 + 2 * 2048);
    }

    #[test]
    fn steady_signal_is_untouched() {
        let y = tone(47_920, 0.5);
        assert_eq!(trim_silence(&y, 15.0, 2048, 512).len(), y.len());
    }

    #[test]
    fn all_zero_signal_is_kept() {
        let y = vec![0.0; 4000];
        assert_eq!(trim_silence(&y, 15.0, 2048, 512).len(), 4000);
        assert!(trim_silence(&[], 15.0, 2048, 512).is_empty());
    }
}
