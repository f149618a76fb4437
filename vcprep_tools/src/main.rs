use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use vcprep_core::BatchReport;
use vcprep_core::report::read_jsonl;

/// Summarise a vcprep JSON Lines report as one TSV row per speaker.
#[derive(Parser, Debug)]
#[command(name = "report_to_tsv")]
struct Args {
    /// Report written by `vcprep --report`
    input: PathBuf,

    /// Destination TSV file
    #[arg(default_value = "report.tsv")]
    output: PathBuf,
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct SpeakerRow {
    speaker: String,
    batches: usize,
    utterances: usize,
    samples: usize,
    frames: usize,
    segments: usize,
    voiced_frames: usize,
    unvoiced_batches: usize,
    voiced_ratio: f64,
}

fn summarise(reports: &[BatchReport]) -> Vec<SpeakerRow> {
    let mut rows: BTreeMap<&str, SpeakerRow> = BTreeMap::new();
    for report in reports {
        let row = rows
            .entry(report.speaker.as_str())
            .or_insert_with(|| SpeakerRow {
                speaker: report.speaker.clone(),
                ..SpeakerRow::default()
            });
        row.batches += 1;
        row.utterances += report.utterances;
        row.samples += report.samples;
        row.frames += report.frames;
        row.segments += report.segments;
        row.voiced_frames += report.voiced_frames;
        if report.all_unvoiced {
            row.unvoiced_batches += 1;
        }
    }

    rows.into_values()
        .map(|mut row| {
            if row.frames > 0 {
                row.voiced_ratio = row.voiced_frames as f64 / row.frames as f64;
            }
            row
        })
        .collect()
}

fn convert(input: &Path, output: &Path) -> Result<usize> {
    let reports = read_jsonl(input)
        .with_context(|| format!("Failed to read report: {}", input.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(output)
        .with_context(|| format!("Failed to create output: {}", output.display()))?;

    let rows = summarise(&reports);
    for row in &rows {
        writer.serialize(row).context("Failed to write a TSV row")?;
    }
    writer.flush()?;

    println!("Read: {} batches", reports.len());
    Ok(rows.len())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let speakers = convert(&args.input, &args.output)?;

    println!("Wrote: {}", args.output.display());
    println!("Speakers: {}", speakers);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcprep_core::report::write_jsonl;

    fn report(speaker: &str, batch_index: usize, frames: usize, voiced_frames: usize) -> BatchReport {
        BatchReport {
            speaker: speaker.to_string(),
            batch_index,
            utterances: 1,
            samples: frames * 80,
            frames,
            segments: frames / 512,
            voiced_frames,
            all_unvoiced: voiced_frames == 0,
        }
    }

    #[test]
    fn rows_are_grouped_per_speaker() {
        let rows = summarise(&[
            report("TM1", 0, 600, 300),
            report("SF1", 0, 100, 0),
            report("TM1", 1, 1100, 500),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].speaker, "SF1");
        assert_eq!(rows[0].unvoiced_batches, 1);
        assert_eq!(rows[0].voiced_ratio, 0.0);
        assert_eq!(rows[1].batches, 2);
        assert_eq!(rows[1].frames, 1700);
        assert_eq!(rows[1].segments, 3);
        assert!((rows[1].voiced_ratio - 800.0 / 1700.0).abs() < 1e-12);
    }

    #[test]
    fn writes_tab_separated_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.jsonl");
        let output = dir.path().join("report.tsv");
        write_jsonl(&input, &[report("A", 0, 10, 5)]).unwrap();

        assert_eq!(convert(&input, &output).unwrap(), 1);
        let text = std::fs::read_to_string(&output).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "speaker\tbatches\tutterances\tsamples\tframes\tsegments\tvoiced_frames\tunvoiced_batches\tvoiced_ratio"
        );
        assert_eq!(lines.next().unwrap(), "A\t1\t1\t800\t10\t0\t5\t0\t0.5");
        assert!(lines.next().is_none());
    }
}
