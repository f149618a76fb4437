//! Utterance discovery and loading.
//!
//! Discovery is a pure listing step producing one immutable [`SpeakerSource`]
//! per speaker; [`load_speaker`] then decodes, trims and pre-emphasises that
//! speaker's files in order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::audio::decoder::decode_to_mono;
use crate::audio::trim::{pre_emphasis, trim_silence};
use crate::config::PrepConfig;
use crate::error::{PrepError, Result};

const AUDIO_EXTENSION: &str = "wav";

/// One utterance file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtteranceSource {
    pub id: String,
    pub path: PathBuf,
}

/// All files of one speaker, in path order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerSource {
    pub id: String,
    pub utterances: Vec<UtteranceSource>,
}

/// A decoded, trimmed and pre-emphasised utterance.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: String,
    pub samples: Vec<f64>,
}

/// A speaker's utterances, ready for batching.
#[derive(Debug, Clone)]
pub struct Speaker {
    pub id: String,
    pub utterances: Vec<Utterance>,
}

/// Split a file name into `(speaker, utterance)`.
///
/// The speaker is the text before the first `_`; the utterance is the text
/// after it, up to the next `_` or `.`.
pub fn parse_file_name(path: &Path) -> Result<(String, String)> {
    let malformed = || PrepError::MalformedFileName(path.to_path_buf());

    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(malformed)?;
    let (speaker, rest) = name.split_once('_').ok_or_else(malformed)?;
    let utterance = rest.split(['_', '.']).next().unwrap_or_default();

    if speaker.is_empty() || utterance.is_empty() {
        return Err(malformed());
    }
    Ok((speaker.to_string(), utterance.to_string()))
}

/// Recursively list `*.wav` files under `root`, grouped by speaker.
///
/// Speakers come back sorted by id and each speaker's utterances sorted by
/// path, so identical trees always produce identical orderings.
pub fn discover(root: &Path) -> Result<Vec<SpeakerSource>> {
    if !root.is_dir() {
        return Err(PrepError::InputNotFound(root.to_path_buf()));
    }

    let mut files = Vec::new();
    collect_audio_files(root, &mut files)?;
    files.sort();
    info!("Total {} audio files!", files.len());

    let mut speakers: BTreeMap<String, Vec<UtteranceSource>> = BTreeMap::new();
    for path in files {
        let (speaker, utterance) = parse_file_name(&path)?;
        let entry = speakers.entry(speaker.clone()).or_default();
        if let Some(prev) = entry.iter().find(|u| u.id == utterance) {
            return Err(PrepError::DuplicateUtterance {
                speaker,
                utterance,
                first: prev.path.clone(),
                second: path,
            });
        }
        entry.push(UtteranceSource { id: utterance, path });
    }

    Ok(speakers
        .into_iter()
        .map(|(id, utterances)| SpeakerSource { id, utterances })
        .collect())
}

fn collect_audio_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| PrepError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PrepError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| PrepError::io(&path, e))?;
        if file_type.is_dir() {
            collect_audio_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(AUDIO_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

/// Decode, trim and pre-emphasise one utterance file.
pub fn load_utterance(source: &UtteranceSource, cfg: &PrepConfig) -> Result<Utterance> {
    let wav = decode_to_mono(&source.path, cfg.sample_rate).map_err(|e| PrepError::Decode {
        path: source.path.clone(),
        source: e,
    })?;
    let trimmed = trim_silence(
        &wav,
        cfg.top_db,
        cfg.trim_frame_length,
        cfg.trim_hop_length,
    );
    debug!(
        path = %source.path.display(),
        decoded = wav.len(),
        kept = trimmed.len(),
        "trimmed utterance"
    );
    if trimmed.is_empty() && !wav.is_empty() {
        warn!(path = %source.path.display(), "trimming removed the whole utterance");
    }

    Ok(Utterance {
        id: source.id.clone(),
        samples: pre_emphasis(trimmed, cfg.pre_emphasis),
    })
}

/// Load every utterance of a speaker, preserving discovery order.
pub fn load_speaker(source: &SpeakerSource, cfg: &PrepConfig) -> Result<Speaker> {
    let utterances = source
        .utterances
        .iter()
        .map(|u| {
            info!("{}", u.path.display());
            load_utterance(u, cfg)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Speaker {
        id: source.id.clone(),
        utterances,
    })
}

/// Discover and load a whole dataset, keyed by speaker id.
///
/// Holds every waveform in memory at once; the pipeline itself loads one
/// speaker at a time instead.
pub fn load_dataset(root: &Path, cfg: &PrepConfig) -> Result<BTreeMap<String, Speaker>> {
    discover(root)?
        .iter()
        .filter(|s| cfg.allows_speaker(&s.id))
        .map(|s| load_speaker(s, cfg).map(|sp| (sp.id.clone(), sp)))
        .collect()
}
