//! Offline seq2seq translation backend
//!
//! Encoder-decoder ONNX model with greedy autoregressive decoding. Each line
//! of input is translated independently and rejoined, which preserves the
//! layout the aggregator produced. Decoding recomputes the full growing
//! sequence every step; quadratic in line length but fine for short UI text.

use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BackendError, TranslationBackend, TranslationRequest};
use crate::inference::{InferenceEngine, OnnxEngine, TensorData};
use crate::lang::Language;

/// Hard cap on decode steps per line.
const MAX_DECODE_STEPS: usize = 512;

/// Marker token for a language, in the `__xx__` convention multilingual
/// seq2seq vocabularies use. Chinese variants share one marker.
fn marker_token(lang: Language) -> &'static str {
    match lang {
        Language::En => "__en__",
        Language::Ja => "__ja__",
        Language::Ko => "__ko__",
        Language::ZhHans | Language::ZhHant => "__zh__",
        Language::Ru => "__ru__",
    }
}

struct Seq2SeqInner {
    tokenizer: Tokenizer,
    encoder: Box<dyn InferenceEngine>,
    decoder: Box<dyn InferenceEngine>,
    pad_id: i64,
    eos_id: i64,
}

/// Fully offline translation backend.
pub struct Seq2SeqBackend {
    inner: Mutex<Seq2SeqInner>,
    name: String,
}

impl Seq2SeqBackend {
    pub fn from_files(
        encoder_path: &Path,
        decoder_path: &Path,
        tokenizer_path: &Path,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {e}"))?;
        let encoder = Box::new(OnnxEngine::from_file(encoder_path)?);
        let decoder = Box::new(OnnxEngine::from_file(decoder_path)?);
        Ok(Self::from_parts(tokenizer, encoder, decoder))
    }

    pub fn from_parts(
        tokenizer: Tokenizer,
        encoder: Box<dyn InferenceEngine>,
        decoder: Box<dyn InferenceEngine>,
    ) -> Self {
        let pad_id = tokenizer.token_to_id("<pad>").unwrap_or(0) as i64;
        let eos_id = tokenizer.token_to_id("</s>").unwrap_or(2) as i64;
        Self {
            inner: Mutex::new(Seq2SeqInner {
                tokenizer,
                encoder,
                decoder,
                pad_id,
                eos_id,
            }),
            name: "local-seq2seq".to_string(),
        }
    }
}

impl Seq2SeqInner {
    /// Translate one line. Internal model failures fall back to the original
    /// line; only cancellation escapes.
    fn translate_line(
        &mut self,
        line: &str,
        source: Language,
        target: Language,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        match self.decode_line(line, source, target, cancel) {
            Ok(text) => Ok(text),
            Err(LineError::Cancelled) => Err(BackendError::Cancelled),
            Err(LineError::Model(e)) => {
                warn!("Seq2seq decode failed for a line, keeping original: {e:#}");
                Ok(line.to_string())
            }
        }
    }

    fn decode_line(
        &mut self,
        line: &str,
        source: Language,
        target: Language,
        cancel: &CancellationToken,
    ) -> Result<String, LineError> {
        let src_marker = self.marker_id(source)?;
        let tgt_marker = self.marker_id(target)?;

        let encoding = self
            .tokenizer
            .encode(line, false)
            .map_err(|e| LineError::Model(anyhow!("tokenize failed: {e}")))?;

        let mut input_ids: Vec<i64> = Vec::with_capacity(encoding.get_ids().len() + 2);
        input_ids.push(src_marker);
        input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
        input_ids.push(self.eos_id);

        let seq_len = input_ids.len();
        let ids_tensor = TensorData::I64 {
            shape: vec![1, seq_len],
            data: input_ids,
        };
        let mask_tensor = TensorData::I64 {
            shape: vec![1, seq_len],
            data: vec![1; seq_len],
        };

        // Encoder runs once; its hidden states feed every decode step.
        let encoder_outputs = self
            .encoder
            .run(&[
                ("input_ids", ids_tensor),
                ("attention_mask", mask_tensor.clone()),
            ])
            .map_err(LineError::Model)?;
        let hidden = encoder_outputs
            .into_iter()
            .next()
            .ok_or_else(|| LineError::Model(anyhow!("encoder produced no outputs")))?;

        let mut output_ids: Vec<i64> = vec![self.pad_id, tgt_marker];
        for _ in 0..MAX_DECODE_STEPS {
            if cancel.is_cancelled() {
                return Err(LineError::Cancelled);
            }

            let decoder_inputs = [
                (
                    "input_ids",
                    TensorData::I64 {
                        shape: vec![1, output_ids.len()],
                        data: output_ids.clone(),
                    },
                ),
                ("encoder_hidden_states", hidden.clone()),
                ("encoder_attention_mask", mask_tensor.clone()),
            ];
            let outputs = self.decoder.run(&decoder_inputs).map_err(LineError::Model)?;
            let logits = outputs
                .into_iter()
                .next()
                .ok_or_else(|| LineError::Model(anyhow!("decoder produced no outputs")))?;

            let next = argmax_last_position(&logits)
                .ok_or_else(|| LineError::Model(anyhow!("unusable logits shape")))?;
            output_ids.push(next);
            if next == self.eos_id {
                break;
            }
        }

        // Skip the two leading control tokens (pad + target marker) and any
        // trailing eos/pad.
        let generated: Vec<u32> = output_ids[2..]
            .iter()
            .filter(|&&id| id >= 0 && id != self.eos_id && id != self.pad_id)
            .map(|&id| id as u32)
            .collect();
        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| LineError::Model(anyhow!("detokenize failed: {e}")))?;
        debug!(
            "Decoded {} tokens from a {}-token line",
            generated.len(),
            seq_len
        );
        Ok(text.trim().to_string())
    }

    fn marker_id(&self, lang: Language) -> Result<i64, LineError> {
        let token = marker_token(lang);
        self.tokenizer
            .token_to_id(token)
            .map(|id| id as i64)
            .ok_or_else(|| LineError::Model(anyhow!("vocabulary has no {token} marker")))
    }
}

enum LineError {
    Cancelled,
    Model(anyhow::Error),
}

/// Arg-max over the vocabulary dimension at the last sequence position of a
/// `[1, seq, vocab]` logits tensor.
fn argmax_last_position(logits: &TensorData) -> Option<i64> {
    let shape = logits.shape();
    let data = logits.as_f32()?;
    if shape.len() != 3 || shape[0] != 1 || shape[1] == 0 || shape[2] == 0 {
        return None;
    }
    let vocab = shape[2];
    let last = &data[(shape[1] - 1) * vocab..shape[1] * vocab];
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &score) in last.iter().enumerate() {
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    Some(best as i64)
}

#[async_trait]
impl TranslationBackend for Seq2SeqBackend {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let mut inner = self.inner.lock();
        let mut out_lines = Vec::new();
        for line in request.text.lines() {
            if line.trim().is_empty() {
                out_lines.push(String::new());
                continue;
            }
            let translated =
                inner.translate_line(line, request.source, request.target, cancel)?;
            out_lines.push(translated);
        }
        Ok(out_lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tokenizer() -> Tokenizer {
        // Tiny word-level vocabulary, loaded the same way a real
        // tokenizer.json would be.
        let json = r#"{
            "version": "1.0",
            "model": {
                "type": "WordLevel",
                "vocab": {
                    "<pad>": 0, "<unk>": 1, "</s>": 2,
                    "__ja__": 3, "__en__": 4,
                    "hello": 5, "world": 6, "open": 7, "settings": 8
                },
                "unk_token": "<unk>"
            },
            "pre_tokenizer": {"type": "Whitespace"}
        }"#;
        Tokenizer::from_bytes(json.as_bytes()).unwrap()
    }

    /// Encoder fake: returns a fixed hidden-state tensor.
    struct FakeEncoder;

    impl InferenceEngine for FakeEncoder {
        fn run(&mut self, inputs: &[(&str, TensorData)]) -> Result<Vec<TensorData>> {
            let seq = inputs[0].1.shape()[1];
            Ok(vec![TensorData::F32 {
                shape: vec![1, seq, 4],
                data: vec![0.5; seq * 4],
            }])
        }
        fn input_names(&self) -> &[String] {
            &[]
        }
    }

    /// Decoder fake: emits a scripted token sequence via peaked logits.
    struct ScriptedDecoder {
        script: Vec<i64>,
        step: usize,
        vocab: usize,
    }

    impl InferenceEngine for ScriptedDecoder {
        fn run(&mut self, inputs: &[(&str, TensorData)]) -> Result<Vec<TensorData>> {
            let seq = inputs[0].1.shape()[1];
            let token = self.script[self.step.min(self.script.len() - 1)];
            self.step += 1;
            let mut data = vec![0.0f32; seq * self.vocab];
            data[(seq - 1) * self.vocab + token as usize] = 10.0;
            Ok(vec![TensorData::F32 {
                shape: vec![1, seq, self.vocab],
                data,
            }])
        }
        fn input_names(&self) -> &[String] {
            &[]
        }
    }

    /// Engine that always fails.
    struct BrokenEngine;

    impl InferenceEngine for BrokenEngine {
        fn run(&mut self, _inputs: &[(&str, TensorData)]) -> Result<Vec<TensorData>> {
            Err(anyhow!("no such model"))
        }
        fn input_names(&self) -> &[String] {
            &[]
        }
    }

    fn request(text: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            source: Language::Ja,
            target: Language::En,
            strict: false,
            seed: 42,
        }
    }

    #[tokio::test]
    async fn test_greedy_decode_follows_scripted_tokens() {
        // Decoder emits "open settings" then eos.
        let backend = Seq2SeqBackend::from_parts(
            test_tokenizer(),
            Box::new(FakeEncoder),
            Box::new(ScriptedDecoder {
                script: vec![7, 8, 2],
                step: 0,
                vocab: 9,
            }),
        );
        let out = backend
            .translate(&request("hello world"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "open settings");
    }

    #[tokio::test]
    async fn test_blank_lines_preserved() {
        let backend = Seq2SeqBackend::from_parts(
            test_tokenizer(),
            Box::new(FakeEncoder),
            Box::new(ScriptedDecoder {
                script: vec![6, 2, 6, 2],
                step: 0,
                vocab: 9,
            }),
        );
        let out = backend
            .translate(&request("hello\n\nhello"), &CancellationToken::new())
            .await
            .unwrap();
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "");
    }

    #[tokio::test]
    async fn test_model_failure_keeps_original_line() {
        let backend = Seq2SeqBackend::from_parts(
            test_tokenizer(),
            Box::new(BrokenEngine),
            Box::new(BrokenEngine),
        );
        let out = backend
            .translate(&request("hello world"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_cancellation_escapes_decode_loop() {
        let backend = Seq2SeqBackend::from_parts(
            test_tokenizer(),
            Box::new(FakeEncoder),
            Box::new(ScriptedDecoder {
                script: vec![6, 2],
                step: 0,
                vocab: 9,
            }),
        );
        let token = CancellationToken::new();
        token.cancel();
        let result = backend.translate(&request("hello"), &token).await;
        assert!(matches!(result, Err(BackendError::Cancelled)));
    }

    #[test]
    fn test_argmax_last_position() {
        let logits = TensorData::F32 {
            shape: vec![1, 2, 3],
            // Position 0 peaks at 0, position 1 peaks at 2.
            data: vec![9.0, 0.0, 0.0, 0.1, 0.2, 5.0],
        };
        assert_eq!(argmax_last_position(&logits), Some(2));

        let bad = TensorData::F32 {
            shape: vec![2, 3],
            data: vec![0.0; 6],
        };
        assert_eq!(argmax_last_position(&bad), None);
    }

    #[test]
    fn test_decode_step_cap() {
        // Decoder never emits eos; decode must stop at the cap.
        let mut inner = Seq2SeqInner {
            tokenizer: test_tokenizer(),
            encoder: Box::new(FakeEncoder),
            decoder: Box::new(ScriptedDecoder {
                script: vec![6],
                step: 0,
                vocab: 9,
            }),
            pad_id: 0,
            eos_id: 2,
        };
        let out = inner
            .decode_line("hello", Language::Ja, Language::En, &CancellationToken::new())
            .unwrap_or_default();
        // 512 copies of "world" joined by spaces.
        assert_eq!(out.split_whitespace().count(), MAX_DECODE_STEPS);
    }
}
