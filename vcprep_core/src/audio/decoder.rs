use anyhow::{anyhow, Context, Result};
use std::path::Path;

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use rubato::{Fft, FixedSync, Resampler};
use audioadapter_buffers::direct::InterleavedSlice;

/// Decode an audio file to mono samples at `sample_rate`.
///
/// Channels are averaged; the FFT resampler runs only when the source rate
/// differs from the target.
pub fn decode_to_mono<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let (interleaved, sr_in, channels) = decode_interleaved(path)?;
    let mono = downmix(&interleaved, channels);

    let out = if sr_in == sample_rate {
        mono
    } else {
        resample(&mono, sr_in as usize, sample_rate as usize)
            .with_context(|| format!("failed to resample {} Hz -> {} Hz", sr_in, sample_rate))?
    };

    Ok(out.into_iter().map(f64::from).collect())
}

fn decode_interleaved(path: &Path) -> Result<(Vec<f32>, u32, usize)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("unsupported format or failed to probe container")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no supported audio tracks found"))?;

    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("failed to create decoder for selected track")?;

    let mut interleaved_f32: Vec<f32> = Vec::new();
    let mut input_sample_rate: Option<u32> = track.codec_params.sample_rate;
    let mut input_channels: Option<usize> = track.codec_params.channels.map(|c| c.count());

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow!("decoder reset required (chained streams)"));
            }
            // end of stream
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(e).context("error reading next packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::IoError(_)) => continue,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow!("decoder reset required mid-stream"));
            }
            Err(e) => return Err(e).context("unrecoverable decode error"),
        };

        input_sample_rate.get_or_insert(decoded.spec().rate);
        input_channels.get_or_insert(decoded.spec().channels.count());

        let mut sbuf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        sbuf.copy_interleaved_ref(decoded);

        interleaved_f32.extend_from_slice(sbuf.samples());
    }

    let sr_in = input_sample_rate.ok_or_else(|| anyhow!("could not determine input sample rate"))?;
    let ch_in = input_channels.ok_or_else(|| anyhow!("could not determine channel count"))?;

    if interleaved_f32.is_empty() {
        return Err(anyhow!("decoded audio was empty"));
    }
    if ch_in == 0 {
        return Err(anyhow!("stream reports zero channels"));
    }

    Ok((interleaved_f32, sr_in, ch_in))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(mono: &[f32], sr_in: usize, sr_out: usize) -> Result<Vec<f32>> {
    // Offline clips: fixed 1024-sample input chunks, single sub-chunk.
    let chunk_size: usize = 1024;
    let sub_chunks: usize = 1;

    let mut resampler = Fft::<f32>::new(sr_in, sr_out, chunk_size, sub_chunks, 1, FixedSync::Input)
        .context("failed to construct FFT resampler")?;

    let input_len_frames = mono.len();
    let out_len_frames = resampler.process_all_needed_output_len(input_len_frames);
    let mut out = vec![0.0f32; out_len_frames];

    let input_adapter =
        InterleavedSlice::new(mono, 1, input_len_frames).context("bad input adapter")?;
    let mut output_adapter =
        InterleavedSlice::new_mut(&mut out, 1, out_len_frames).context("bad output adapter")?;

    let (_frames_read, frames_written) = resampler.process_all_into_buffer(
        &input_adapter,
        &mut output_adapter,
        input_len_frames,
        None,
    )?;

    out.truncate(frames_written);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = [1.0f32, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = decode_to_mono("does/not/exist.wav", 16_000).unwrap_err();
        assert!(format!("{err:#}").contains("failed to open audio file"));
    }
}
