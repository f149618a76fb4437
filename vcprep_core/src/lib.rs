//! Speaker-conditioned voice-conversion preprocessing.
//!
//! Turns per-speaker utterance recordings into fixed-shape training
//! features: trimmed, pre-emphasised waveforms are concatenated into
//! batches, analysed into F0 and a coded spectral envelope, and the
//! envelope is cut into fixed-width segments saved as `.npy` files next to
//! one `.npz` archive per batch.
//!
//! ```no_run
//! use std::path::Path;
//! use vcprep_core::{CancelToken, OutputDir, Pipeline, PrepConfig};
//!
//! let input = Path::new("data/speakers");
//! let out = OutputDir::acquire(Path::new("data/processed"), input, false)?;
//! let summary = Pipeline::new(PrepConfig::default())?.run(input, &out, &CancelToken::new())?;
//! println!("{} segments", summary.segments);
//! # Ok::<(), vcprep_core::PrepError>(())
//! ```

pub mod audio;
pub mod batch;
pub mod config;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod report;
pub mod segment;
pub mod world;

pub use config::PrepConfig;
pub use error::{PrepError, Result};
pub use persist::OutputDir;
pub use pipeline::{CancelToken, Pipeline};
pub use report::{BatchReport, RunSummary};
pub use world::{VocoderAnalyzer, VocoderFeatures};
