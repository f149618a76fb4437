//! Per-batch diagnostics, written as JSON Lines.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// What one batch produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub speaker: String,
    pub batch_index: usize,
    pub utterances: usize,
    pub samples: usize,
    pub frames: usize,
    pub segments: usize,
    pub voiced_frames: usize,
    /// No frame of the batch received an F0 estimate.
    pub all_unvoiced: bool,
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub speakers: usize,
    pub utterances: usize,
    pub batches: usize,
    pub segments: usize,
    pub unvoiced_batches: usize,
    /// Ordered by speaker, then batch index.
    pub reports: Vec<BatchReport>,
}

impl RunSummary {
    pub(crate) fn from_reports(speakers: usize, mut reports: Vec<BatchReport>) -> Self {
        reports.sort_by(|a, b| {
            a.speaker
                .cmp(&b.speaker)
                .then(a.batch_index.cmp(&b.batch_index))
        });
        Self {
            speakers,
            utterances: reports.iter().map(|r| r.utterances).sum(),
            batches: reports.len(),
            segments: reports.iter().map(|r| r.segments).sum(),
            unvoiced_batches: reports.iter().filter(|r| r.all_unvoiced).count(),
            reports,
        }
    }
}

pub fn write_jsonl(path: &Path, reports: &[BatchReport]) -> Result<()> {
    let file = File::create(path).map_err(|e| PrepError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for report in reports {
        serde_json::to_writer(&mut writer, report).map_err(|source| PrepError::Report {
            path: path.to_path_buf(),
            source,
        })?;
        writer.write_all(b"\n").map_err(|e| PrepError::io(path, e))?;
    }
    writer.flush().map_err(|e| PrepError::io(path, e))?;
    Ok(())
}

/// Read a report written by [`write_jsonl`]. Blank lines are skipped.
pub fn read_jsonl(path: &Path) -> Result<Vec<BatchReport>> {
    let file = File::open(path).map_err(|e| PrepError::io(path, e))?;
    let mut reports = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| PrepError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let report = serde_json::from_str(&line).map_err(|source| PrepError::Report {
            path: path.to_path_buf(),
            source,
        })?;
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(speaker: &str, batch_index: usize, voiced_frames: usize) -> BatchReport {
        BatchReport {
            speaker: speaker.to_string(),
            batch_index,
            utterances: 2,
            samples: 1000,
            frames: 13,
            segments: 1,
            voiced_frames,
            all_unvoiced: voiced_frames == 0,
        }
    }

    #[test]
    fn summary_orders_and_counts() {
        let summary = RunSummary::from_reports(
            2,
            vec![report("B", 0, 5), report("A", 1, 0), report("A", 0, 3)],
        );
        let order: Vec<_> = summary
            .reports
            .iter()
            .map(|r| (r.speaker.as_str(), r.batch_index))
            .collect();
        assert_eq!(order, [("A", 0), ("A", 1), ("B", 0)]);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.utterances, 6);
        assert_eq!(summary.segments, 3);
        assert_eq!(summary.unvoiced_batches, 1);
    }

    #[test]
    fn jsonl_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.jsonl");
        let reports = vec![report("A", 0, 0), report("A", 1, 9)];
        write_jsonl(&path, &reports).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"all_unvoiced\":true"));
        assert_eq!(read_jsonl(&path).unwrap(), reports);
    }
}
