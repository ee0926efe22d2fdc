//! OCR session lifecycle
//!
//! Owns the loaded detection/recognition engines and the label table for the
//! active OCR language. Language switches dispose the previous sessions and
//! table before the replacements load, and every access goes through one
//! lock, so a concurrent analysis can never observe a half-switched state.

use std::path::{Path, PathBuf};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::info;

use super::dictionary::{load_label_table, LabelTable};
use crate::inference::{InferenceEngine, OnnxEngine};
use crate::lang::Language;

/// Model and dictionary file locations for one OCR language.
#[derive(Debug, Clone)]
pub struct OcrModelPaths {
    pub detection_model: PathBuf,
    pub recognition_model: PathBuf,
    pub dictionary: PathBuf,
}

/// Everything needed to run one recognition pass.
pub struct LoadedOcr {
    pub language: Language,
    pub detection: Box<dyn InferenceEngine>,
    pub recognition: Box<dyn InferenceEngine>,
    pub table: LabelTable,
}

type EngineFactory = Box<dyn Fn(&Path) -> Result<Box<dyn InferenceEngine>> + Send + Sync>;

/// Guarded holder for the active OCR sessions.
pub struct OcrSessionManager {
    state: Mutex<Option<LoadedOcr>>,
    factory: EngineFactory,
}

impl OcrSessionManager {
    pub fn new() -> Self {
        Self::with_factory(Box::new(|path| {
            Ok(Box::new(OnnxEngine::from_file(path)?) as Box<dyn InferenceEngine>)
        }))
    }

    /// Inject a custom engine loader (used by tests).
    pub fn with_factory(factory: EngineFactory) -> Self {
        Self {
            state: Mutex::new(None),
            factory,
        }
    }

    /// Make sure sessions for `language` are loaded, swapping out any
    /// previously active language first.
    pub fn ensure_loaded(&self, language: Language, paths: &OcrModelPaths) -> Result<()> {
        let mut guard = self.state.lock();
        if let Some(loaded) = guard.as_ref() {
            if loaded.language == language {
                return Ok(());
            }
            info!(
                "Switching OCR language {} -> {}",
                loaded.language.code(),
                language.code()
            );
        }
        // Drop the old sessions before loading replacements.
        *guard = None;

        let detection = (self.factory)(&paths.detection_model)?;
        let recognition = (self.factory)(&paths.recognition_model)?;
        let mut table = load_label_table(&paths.dictionary);
        if let Some(classes) = recognition.output_class_count() {
            table.realign(classes);
        }
        info!(
            "Loaded OCR sessions for {} ({} labels)",
            language.code(),
            table.len()
        );

        *guard = Some(LoadedOcr {
            language,
            detection,
            recognition,
            table,
        });
        Ok(())
    }

    /// Run `f` against the loaded sessions. Returns `None` when nothing is
    /// loaded. The lock is held for the duration of `f`, which is what keeps
    /// analyses from racing a language switch.
    pub fn with_loaded<R>(&self, f: impl FnOnce(&mut LoadedOcr) -> R) -> Option<R> {
        let mut guard = self.state.lock();
        guard.as_mut().map(f)
    }

    pub fn active_language(&self) -> Option<Language> {
        self.state.lock().as_ref().map(|l| l.language)
    }

    pub fn unload(&self) {
        let mut guard = self.state.lock();
        if guard.take().is_some() {
            info!("OCR sessions unloaded");
        }
    }
}

impl Default for OcrSessionManager {
    fn default() -> Self {
        Self::new()
    }
}
