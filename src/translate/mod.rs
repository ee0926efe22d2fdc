//! Translation dispatch
//!
//! The dispatcher decides whether recognized text needs translating at all,
//! drives the selected backend through the timeout ladder, validates what
//! comes back and degrades to a sanitized placeholder when nothing acceptable
//! survives. Its contract with the pipeline is simple: the only error that
//! ever escapes is cancellation.

pub mod cloud;
pub mod policy;
pub mod seq2seq;
pub mod textgen;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, TranslationBackendKind};
use crate::lang::{
    char_ratio, contains_cjk, contains_hangul, contains_kana, is_cjk_ideograph, is_hangul,
    is_kana, is_latin_letter, script_fraction, Language,
};
use cloud::CloudBackend;
use policy::RetryPolicy;
use seq2seq::Seq2SeqBackend;
use textgen::TextGenBackend;

/// Target-script fraction above which translation is skipped entirely.
const BYPASS_FRACTION: f32 = 0.8;
/// Maximum tolerated kana fraction in a non-Japanese-target result.
const KANA_LEAK_LIMIT: f32 = 0.25;
/// Minimum Latin fraction required of an English-target result.
const EN_MIN_LATIN: f32 = 0.45;
/// Maximum CJK fraction tolerated in an English-target result.
const EN_MAX_CJK: f32 = 0.2;

/// Faults a translation backend can report. The variants double as short
/// user-visible strings, since a non-timeout fault is displayed where the
/// translation would have gone.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("translation timed out")]
    Timeout,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("rate limited")]
    RateLimited,
    #[error("blocked by safety filter: {0}")]
    Blocked(String),
    #[error("backend error: {0}")]
    Http(String),
    #[error("cancelled")]
    Cancelled,
}

/// One translation attempt as the backends see it.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub source: Language,
    pub target: Language,
    /// Second-chance attempt with a sterner prompt wording.
    pub strict: bool,
    /// Sampling seed, changed between the first attempt and the retry.
    pub seed: u64,
}

impl TranslationRequest {
    /// Instruction prompt for generative backends. The strict variant leans
    /// on models that echoed source text or chatted instead of translating.
    pub fn prompt(&self) -> String {
        if self.strict {
            format!(
                "Translate the following {} text into {}. Output ONLY the {} \
                 translation, with no notes, no romanization and none of the \
                 original text.\n\n{}",
                self.source.english_name(),
                self.target.english_name(),
                self.target.english_name(),
                self.text
            )
        } else {
            format!(
                "Translate this {} text to {}. Reply with the translation only.\n\n{}",
                self.source.english_name(),
                self.target.english_name(),
                self.text
            )
        }
    }
}

/// A translation backend. Implementations map their transport failures onto
/// [`BackendError`] and must return [`BackendError::Cancelled`] promptly when
/// the token fires mid-call.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError>;
}

/// Construct the translation backend the configuration selects.
///
/// The cloud backend requires a key; the offline backend requires its model
/// files on disk. The server backend connects lazily, so construction always
/// succeeds for it.
pub fn build_backend(config: &EngineConfig) -> anyhow::Result<Box<dyn TranslationBackend>> {
    let t = &config.translation;
    match t.backend {
        TranslationBackendKind::LocalSeq2Seq => {
            let backend = Seq2SeqBackend::from_files(
                &t.seq2seq_dir.join("encoder.onnx"),
                &t.seq2seq_dir.join("decoder.onnx"),
                &t.seq2seq_dir.join("tokenizer.json"),
            )?;
            Ok(Box::new(backend))
        }
        TranslationBackendKind::TextGenServer => Ok(Box::new(TextGenBackend::new(
            t.server_endpoint.clone(),
            t.server_model.clone(),
            t.temperature,
        ))),
        TranslationBackendKind::CloudApi => {
            if t.api_key.trim().is_empty() {
                anyhow::bail!("cloud backend selected but no API key configured");
            }
            Ok(Box::new(CloudBackend::new(
                t.api_key.clone(),
                t.cloud_model.clone(),
                t.temperature,
            )))
        }
    }
}

/// Whether `text` is already in the target language and can skip translation.
///
/// True when the target-script fraction exceeds the bypass threshold and no
/// conflicting script is present: Hangul blocks a Japanese bypass, kana
/// blocks a Chinese one (the shared ideograph range would otherwise claim
/// Japanese text as Chinese).
pub fn should_bypass(text: &str, target: Language) -> bool {
    if script_fraction(text, target) <= BYPASS_FRACTION {
        return false;
    }
    match target {
        Language::Ja => !contains_hangul(text),
        Language::ZhHans | Language::ZhHant => !contains_kana(text) && !contains_hangul(text),
        _ => true,
    }
}

/// Whether a backend result is an acceptable translation of `source_text`.
fn is_acceptable(result: &str, source_text: &str, target: Language) -> bool {
    let trimmed = result.trim();
    if trimmed.is_empty() {
        return false;
    }

    // Kana leaking through means the model echoed rather than translated.
    if target != Language::Ja
        && contains_kana(source_text)
        && trimmed.chars().count() > 2
        && char_ratio(trimmed, is_kana) > KANA_LEAK_LIMIT
    {
        return false;
    }

    if target == Language::En {
        if contains_cjk(source_text) && trimmed == source_text.trim() {
            return false;
        }
        if char_ratio(trimmed, is_latin_letter) < EN_MIN_LATIN {
            return false;
        }
        if char_ratio(trimmed, is_cjk_ideograph) > EN_MAX_CJK {
            return false;
        }
    }

    true
}

/// Source/target pairs that earn one stricter-prompt retry after a rejected
/// result. CJK-to-English is where echo and romanization failures cluster.
fn retry_eligible(source: Language, target: Language) -> bool {
    target == Language::En
        && matches!(
            source,
            Language::Ja | Language::Ko | Language::ZhHans | Language::ZhHant
        )
}

/// Strip a source string down to characters safe to show as a fallback:
/// letters, digits, CJK/kana/hangul and basic punctuation. Returns the fixed
/// per-language placeholder when nothing safe remains.
fn sanitized_fallback(source_text: &str, target: Language) -> String {
    let kept: String = source_text
        .chars()
        .filter(|&c| {
            c.is_alphanumeric()
                || is_cjk_ideograph(c)
                || is_kana(c)
                || is_hangul(c)
                || c.is_whitespace()
                || matches!(c, '.' | ',' | '!' | '?' | '-' | ':' | ';' | '\'' | '"' | '(' | ')')
        })
        .collect();
    let kept = kept.trim();
    if kept.is_empty() {
        target.unreadable_placeholder().to_string()
    } else {
        kept.to_string()
    }
}

/// Drives one piece of text through bypass, backend, validation and fallback.
pub struct TranslationDispatcher {
    source: Language,
    target: Language,
}

impl TranslationDispatcher {
    pub fn new(source: Language, target: Language) -> Self {
        Self { source, target }
    }

    /// Translate `text`, always producing something displayable.
    ///
    /// Timeouts degrade to the source text, other backend faults to their
    /// short user-visible message, rejected results to a sanitized fallback.
    /// Cancellation is the single error that propagates.
    pub async fn dispatch(
        &self,
        text: &str,
        backend: &dyn TranslationBackend,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        if should_bypass(text, self.target) {
            debug!("Bypassing translation, text already in target script");
            return Ok(text.to_string());
        }

        let policy = RetryPolicy::for_model(backend.model_name());

        let request = TranslationRequest {
            text: text.to_string(),
            source: self.source,
            target: self.target,
            strict: false,
            seed: 42,
        };
        match self.attempt(&policy, &request, backend, cancel).await? {
            Some(result) => return Ok(result),
            None => {
                if retry_eligible(self.source, self.target) {
                    info!("Translation rejected by validation, retrying with strict prompt");
                    let strict_request = TranslationRequest {
                        strict: true,
                        seed: 1337,
                        ..request
                    };
                    if let Some(result) =
                        self.attempt(&policy, &strict_request, backend, cancel).await?
                    {
                        return Ok(result);
                    }
                }
            }
        }

        warn!("No acceptable translation produced, using sanitized fallback");
        Ok(sanitized_fallback(text, self.target))
    }

    /// One ladder pass plus validation. `Ok(None)` means the backend answered
    /// but validation rejected the result.
    async fn attempt(
        &self,
        policy: &RetryPolicy,
        request: &TranslationRequest,
        backend: &dyn TranslationBackend,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, BackendError> {
        let outcome = policy
            .run(|| backend.translate(request, cancel))
            .await;

        match outcome {
            Ok(result) => {
                if is_acceptable(&result, &request.text, self.target) {
                    Ok(Some(result.trim().to_string()))
                } else {
                    debug!("Backend result failed validation");
                    Ok(None)
                }
            }
            Err(BackendError::Cancelled) => Err(BackendError::Cancelled),
            Err(BackendError::Timeout) => {
                // Ladder exhausted: the source text stands in for the result.
                warn!("Translation timed out twice, returning source text");
                Ok(Some(request.text.clone()))
            }
            Err(e) => {
                // Shown directly in place of the translation.
                warn!("Translation backend fault: {}", e);
                Ok(Some(e.to_string()))
            }
        }
    }
}
