pub mod decoder;
pub mod loader;
pub mod trim;

pub use loader::{Speaker, SpeakerSource, Utterance, UtteranceSource};
