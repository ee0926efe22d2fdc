//! Screenshot text extraction and translation core.
//!
//! Takes a captured pixel buffer, finds the text in it with ONNX detection
//! and recognition models, merges it into one positioned block and translates
//! it through a local seq2seq model, a local text-generation server or a
//! cloud API. Built for game UI text: everything degrades instead of
//! erroring, and a caller can cancel a pass at any stage boundary.

pub mod config;
pub mod inference;
pub mod lang;
pub mod pipeline;
pub mod translate;
pub mod vision;

pub use config::{load_config, save_config, EngineConfig, TranslationBackendKind};
pub use lang::Language;
pub use pipeline::{AnalyzeError, Analyzer};
pub use translate::{
    build_backend, cloud::CloudBackend, seq2seq::Seq2SeqBackend, textgen::TextGenBackend,
    BackendError, TranslationBackend, TranslationDispatcher,
};
pub use vision::{OcrSessionManager, Rect, RecognizedBlock, TranslatedBlock};

/// Install a formatted `tracing` subscriber honoring `RUST_LOG`, defaulting
/// to info level. Call once from the host application.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
