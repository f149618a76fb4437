//! Pipeline: discover → load → batch → analyze → persist.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audio::loader::{discover, load_speaker};
use crate::audio::{Speaker, SpeakerSource};
use crate::batch::{Batch, SpeakerBatches};
use crate::config::PrepConfig;
use crate::error::{PrepError, Result};
use crate::persist::OutputDir;
use crate::report::{BatchReport, RunSummary};
use crate::segment::Segments;
use crate::world::VocoderAnalyzer;

/// Cooperative stop flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PrepError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub struct Pipeline {
    cfg: PrepConfig,
    analyzer: VocoderAnalyzer,
}

impl Pipeline {
    pub fn new(cfg: PrepConfig) -> Result<Self> {
        cfg.validate()?;
        let analyzer = VocoderAnalyzer::new(&cfg);
        Ok(Self { cfg, analyzer })
    }

    pub fn config(&self) -> &PrepConfig {
        &self.cfg
    }

    /// Process every speaker under `input_dir` into `out`.
    ///
    /// With more than one worker, speakers are spread over a bounded thread
    /// pool. The first failure trips `cancel` so remaining workers stop at
    /// their next batch boundary; files already written stay on disk.
    pub fn run(
        &self,
        input_dir: &Path,
        out: &OutputDir,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let sources = self.select_speakers(discover(input_dir)?);

        let workers = self.cfg.workers.min(sources.len()).max(1);
        info!(
            speakers = sources.len(),
            workers,
            output = %out.path().display(),
            "starting run"
        );

        let reports = if workers == 1 {
            let mut reports = Vec::new();
            for source in &sources {
                reports.extend(self.process_speaker(source, out, cancel)?);
            }
            reports
        } else {
            self.run_pool(&sources, out, cancel, workers)?
        };

        let summary = RunSummary::from_reports(sources.len(), reports);
        if summary.unvoiced_batches > 0 {
            warn!(
                "{} of {} batches have no voiced frames",
                summary.unvoiced_batches, summary.batches
            );
        }
        info!(
            speakers = summary.speakers,
            batches = summary.batches,
            segments = summary.segments,
            "[Running Time]: {:.2?}",
            start.elapsed()
        );
        Ok(summary)
    }

    /// Apply the speaker allow-list. Listed speakers without files are kept
    /// with no utterances.
    fn select_speakers(&self, discovered: Vec<SpeakerSource>) -> Vec<SpeakerSource> {
        let Some(allowed) = &self.cfg.speakers else {
            return discovered;
        };

        let mut selected: Vec<SpeakerSource> = discovered
            .into_iter()
            .filter(|s| self.cfg.allows_speaker(&s.id))
            .collect();
        for id in allowed {
            if !selected.iter().any(|s| &s.id == id) {
                warn!(speaker = %id, "no audio files found for speaker");
                selected.push(SpeakerSource {
                    id: id.clone(),
                    utterances: Vec::new(),
                });
            }
        }
        selected.sort_by(|a, b| a.id.cmp(&b.id));
        selected.dedup_by(|a, b| a.id == b.id);
        selected
    }

    fn run_pool(
        &self,
        sources: &[SpeakerSource],
        out: &OutputDir,
        cancel: &CancelToken,
        workers: usize,
    ) -> Result<Vec<BatchReport>> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<&SpeakerSource>(workers);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for source in job_rx.iter() {
                        let result = self.process_speaker(source, out, cancel);
                        if result.is_err() {
                            cancel.cancel();
                        }
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for source in sources {
                if cancel.is_cancelled() || job_tx.send(source).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        let mut reports = Vec::new();
        let mut failure = None;
        for result in result_rx.iter() {
            match result {
                Ok(batch_reports) => reports.extend(batch_reports),
                // Keep the root cause over the cancellations it triggered.
                Err(PrepError::Cancelled) => {
                    failure.get_or_insert(PrepError::Cancelled);
                }
                Err(e) => {
                    if matches!(failure, None | Some(PrepError::Cancelled)) {
                        failure = Some(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => Err(PrepError::Cancelled),
            None => Ok(reports),
        }
    }

    /// Load one speaker from disk and process all of its batches.
    pub fn process_speaker(
        &self,
        source: &SpeakerSource,
        out: &OutputDir,
        cancel: &CancelToken,
    ) -> Result<Vec<BatchReport>> {
        cancel.check()?;
        info!(speaker = %source.id, utterances = source.utterances.len(), "processing speaker");
        let speaker = load_speaker(source, &self.cfg)?;
        self.process_loaded(&speaker, out, cancel)
    }

    /// Process an already loaded speaker.
    pub fn process_loaded(
        &self,
        speaker: &Speaker,
        out: &OutputDir,
        cancel: &CancelToken,
    ) -> Result<Vec<BatchReport>> {
        let mut reports = Vec::new();
        for batch in SpeakerBatches::new(&speaker.id, &speaker.utterances, self.cfg.chunk_size) {
            cancel.check()?;
            reports.push(self.process_batch(&batch, out)?);
        }
        Ok(reports)
    }

    /// Analyze one batch and persist its archive and segments.
    pub fn process_batch(&self, batch: &Batch<'_>, out: &OutputDir) -> Result<BatchReport> {
        let features = self.analyzer.analyze(&batch.waveform);
        let name = batch.name();

        out.write_archive(&name, features.f0.view(), features.coded_sp.view())?;

        let mut segments = 0;
        for segment in Segments::new(features.coded_sp.view(), self.cfg.frames) {
            out.write_segment(&name, segment.start, segment.data)?;
            segments += 1;
        }

        let voiced_frames = features.voiced_frames();
        if voiced_frames == 0 {
            warn!(batch = %name, frames = features.frames(), "batch has no voiced frames");
        }
        debug!(batch = %name, frames = features.frames(), segments, voiced_frames, "batch done");

        Ok(BatchReport {
            speaker: batch.speaker.to_string(),
            batch_index: batch.index,
            utterances: batch.utterances,
            samples: batch.waveform.len(),
            frames: features.frames(),
            segments,
            voiced_frames,
            all_unvoiced: voiced_frames == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Utterance;

    fn output() -> (tempfile::TempDir, OutputDir) {
        let root = tempfile::tempdir().unwrap();
        let out =
            OutputDir::acquire(&root.path().join("out"), &root.path().join("in"), false).unwrap();
        (root, out)
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn speaker_without_utterances_writes_nothing() {
        let (_root, out) = output();
        let pipeline = Pipeline::new(PrepConfig::default()).unwrap();
        let speaker = Speaker {
            id: "A".into(),
            utterances: Vec::new(),
        };
        let reports = pipeline
            .process_loaded(&speaker, &out, &CancelToken::new())
            .unwrap();
        assert!(reports.is_empty());
        assert!(names(out.path()).is_empty());
    }

    #[test]
    fn short_batch_keeps_archive_but_no_segments() {
        let (_root, out) = output();
        let cfg = PrepConfig {
            frames: 16,
            ..PrepConfig::default()
        };
        let pipeline = Pipeline::new(cfg).unwrap();
        // 1120 samples give 15 frames, one short of a segment.
        let speaker = Speaker {
            id: "A".into(),
            utterances: vec![Utterance {
                id: "1".into(),
                samples: vec![0.0; 80 * 14],
            }],
        };
        let reports = pipeline
            .process_loaded(&speaker, &out, &CancelToken::new())
            .unwrap();
        assert_eq!(reports[0].frames, 15);
        assert_eq!(reports[0].segments, 0);
        assert!(reports[0].all_unvoiced);
        assert_eq!(names(out.path()), ["A_0.npz"]);
    }

    #[test]
    fn exact_width_batch_yields_one_segment() {
        let (_root, out) = output();
        let cfg = PrepConfig {
            frames: 16,
            ..PrepConfig::default()
        };
        let pipeline = Pipeline::new(cfg).unwrap();
        let speaker = Speaker {
            id: "A".into(),
            utterances: vec![Utterance {
                id: "1".into(),
                samples: vec![0.0; 80 * 15],
            }],
        };
        let reports = pipeline
            .process_loaded(&speaker, &out, &CancelToken::new())
            .unwrap();
        assert_eq!(reports[0].frames, 16);
        assert_eq!(reports[0].segments, 1);
        assert_eq!(names(out.path()), ["A_0.npz", "A_0_0.npy"]);
    }

    #[test]
    fn cancelled_token_stops_before_first_batch() {
        let (_root, out) = output();
        let pipeline = Pipeline::new(PrepConfig::default()).unwrap();
        let speaker = Speaker {
            id: "A".into(),
            utterances: vec![Utterance {
                id: "1".into(),
                samples: vec![0.0; 800],
            }],
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = pipeline.process_loaded(&speaker, &out, &cancel).unwrap_err();
        assert!(matches!(err, PrepError::Cancelled));
        assert!(names(out.path()).is_empty());
    }

    #[test]
    fn allow_list_adds_missing_speakers_empty() {
        let cfg = PrepConfig {
            speakers: Some(vec!["C".into(), "A".into()]),
            ..PrepConfig::default()
        };
        let pipeline = Pipeline::new(cfg).unwrap();
        let discovered = ["A", "B"]
            .iter()
            .map(|id| SpeakerSource {
                id: id.to_string(),
                utterances: Vec::new(),
            })
            .collect();
        let selected = pipeline.select_speakers(discovered);
        let ids: Vec<_> = selected.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["A", "C"]);
    }
}
