//! Per-speaker batching of utterances.

use std::iter::FusedIterator;
use std::slice::Chunks;

use crate::audio::Utterance;

/// Several consecutive utterances of one speaker joined end to end.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<'a> {
    pub speaker: &'a str,
    /// Position of this batch in the speaker's batch sequence.
    pub index: usize,
    /// Number of utterances joined into `waveform`.
    pub utterances: usize,
    pub waveform: Vec<f64>,
}

impl Batch<'_> {
    /// Base file name for everything persisted from this batch.
    pub fn name(&self) -> String {
        format!("{}_{}", self.speaker, self.index)
    }
}

/// Iterator over a speaker's batches.
///
/// Every batch but the last holds exactly `chunk_size` utterances. The
/// sequence is finite; cloning it restarts from the current position.
#[derive(Debug, Clone)]
pub struct SpeakerBatches<'a> {
    speaker: &'a str,
    chunks: Chunks<'a, Utterance>,
    next_index: usize,
}

impl<'a> SpeakerBatches<'a> {
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn new(speaker: &'a str, utterances: &'a [Utterance], chunk_size: usize) -> Self {
        Self {
            speaker,
            chunks: utterances.chunks(chunk_size),
            next_index: 0,
        }
    }
}

impl<'a> Iterator for SpeakerBatches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        let len = chunk.iter().map(|u| u.samples.len()).sum();
        let mut waveform = Vec::with_capacity(len);
        for utterance in chunk {
            waveform.extend_from_slice(&utterance.samples);
        }

        let index = self.next_index;
        self.next_index += 1;
        Some(Batch {
            speaker: self.speaker,
            index,
            utterances: chunk.len(),
            waveform,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for SpeakerBatches<'_> {}
impl FusedIterator for SpeakerBatches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn utt(id: &str, samples: &[f64]) -> Utterance {
        Utterance {
            id: id.to_string(),
            samples: samples.to_vec(),
        }
    }

    #[test]
    fn concatenates_in_order() {
        let utts = [utt("1", &[1.0, 2.0]), utt("2", &[3.0]), utt("3", &[4.0, 5.0, 6.0])];
        let batches: Vec<_> = SpeakerBatches::new("A", &utts, 2).collect();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].index, 0);
        assert_eq!(batches[0].utterances, 2);
        assert_eq!(batches[0].waveform, vec![1.0, 2.0, 3.0]);
        assert_eq!(batches[1].index, 1);
        assert_eq!(batches[1].utterances, 1);
        assert_eq!(batches[1].waveform, vec![4.0, 5.0, 6.0]);
        assert_eq!(batches[1].name(), "A_1");
    }

    #[test]
    fn batch_length_is_sum_of_utterances() {
        let utts: Vec<_> = (1..=7).map(|n| utt(&n.to_string(), &vec![0.5; n * 10])).collect();
        for chunk_size in 1..=8 {
            let batches = SpeakerBatches::new("S", &utts, chunk_size);
            assert_eq!(batches.len(), utts.len().div_ceil(chunk_size));
            let total: usize = batches.map(|b| b.waveform.len()).sum();
            assert_eq!(total, (1..=7).map(|n| n * 10).sum::<usize>());
        }
    }

    #[test]
    fn no_utterances_means_no_batches() {
        assert_eq!(SpeakerBatches::new("A", &[], 1).count(), 0);
    }
}
