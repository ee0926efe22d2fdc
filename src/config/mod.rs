//! Engine Configuration
//!
//! User settings for OCR and translation, stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::lang::Language;
use crate::vision::OcrModelPaths;

/// Which translation backend handles dispatched text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationBackendKind {
    /// Bundled ONNX encoder-decoder model, fully offline.
    LocalSeq2Seq,
    /// Local text-generation server speaking the Ollama HTTP API.
    TextGenServer,
    /// Hosted generative API.
    CloudApi,
}

/// Engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Language pair and backend choice
    pub translation: TranslationConfig,
    /// OCR model locations
    pub ocr: OcrConfig,
}

/// Translation-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Language the screenshots are in
    pub source_language: Language,
    /// Language to translate into
    pub target_language: Language,
    /// Active backend
    pub backend: TranslationBackendKind,
    /// Base URL for the text-generation server
    pub server_endpoint: String,
    /// Model name requested from the server backend
    pub server_model: String,
    /// Cloud API key; empty disables the cloud backend
    pub api_key: String,
    /// Cloud model identifier
    pub cloud_model: String,
    /// Sampling temperature passed to generative backends
    pub temperature: f32,
    /// Directory holding the offline seq2seq model files
    /// (encoder.onnx, decoder.onnx, tokenizer.json)
    pub seq2seq_dir: PathBuf,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_language: Language::Ja,
            target_language: Language::En,
            backend: TranslationBackendKind::LocalSeq2Seq,
            server_endpoint: "http://localhost:11434".to_string(),
            server_model: "qwen2.5:7b".to_string(),
            api_key: String::new(),
            cloud_model: "gemini-2.0-flash".to_string(),
            temperature: 0.3,
            seq2seq_dir: PathBuf::from("models/seq2seq"),
        }
    }
}

/// OCR model locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Directory holding the per-language model files
    pub models_dir: PathBuf,
    /// Overrides for individual languages, keyed by language code
    #[serde(default)]
    pub overrides: HashMap<String, OcrModelOverride>,
}

/// Explicit file locations for one language, replacing the layout convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrModelOverride {
    pub detection_model: PathBuf,
    pub recognition_model: PathBuf,
    pub dictionary: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            overrides: HashMap::new(),
        }
    }
}

impl OcrConfig {
    /// Resolve the model files for a language. Without an override the
    /// convention is `<models_dir>/<code>_det.onnx`, `<code>_rec.onnx` and
    /// `<code>_dict.txt`.
    pub fn paths_for(&self, language: Language) -> OcrModelPaths {
        let code = language.code();
        if let Some(o) = self.overrides.get(code) {
            return OcrModelPaths {
                detection_model: o.detection_model.clone(),
                recognition_model: o.recognition_model.clone(),
                dictionary: o.dictionary.clone(),
            };
        }
        OcrModelPaths {
            detection_model: self.models_dir.join(format!("{code}_det.onnx")),
            recognition_model: self.models_dir.join(format!("{code}_rec.onnx")),
            dictionary: self.models_dir.join(format!("{code}_dict.txt")),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
