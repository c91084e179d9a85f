// Desktop media engine for audiofile sessions
//
// Decodes with symphonia, renders through cpal and downloads remote sources
// with ureq. Windows, macOS and Linux.

pub mod decoder;
pub mod engine;
pub mod fetch;
pub mod output;
pub mod resample;

pub use decoder::{decode_bytes, decode_file, PcmTrack};
pub use engine::{DesktopEngine, DesktopEngineFactory};
pub use fetch::{HttpFetcher, DEFAULT_HTTP_RETRIES};
pub use resample::OutputSpec;
