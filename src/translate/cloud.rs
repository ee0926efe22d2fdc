//! Cloud generative API backend
//!
//! Gemini-style `generateContent` endpoint. Safety filters are relaxed for
//! game text (they otherwise flag combat vocabulary constantly); a block that
//! still happens is surfaced with its reason instead of an empty string.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BackendError, TranslationBackend, TranslationRequest};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Backend for a hosted generative API.
pub struct CloudBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl CloudBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }

    fn extract_text(response: GenerateContentResponse) -> Result<String, BackendError> {
        if let Some(feedback) = &response.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                return Err(BackendError::Blocked(reason.clone()));
            }
        }
        let text = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(BackendError::Http("empty response".to_string()));
        }
        Ok(text)
    }

    fn map_status(status: reqwest::StatusCode, model: &str) -> BackendError {
        match status.as_u16() {
            404 => BackendError::ModelNotFound(model.to_string()),
            429 => BackendError::RateLimited,
            code => BackendError::Http(format!("API returned {code}")),
        }
    }
}

#[async_trait]
impl TranslationBackend for CloudBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            API_BASE, self.model, self.api_key
        );
        let safety: Vec<_> = SAFETY_CATEGORIES
            .iter()
            .map(|c| json!({"category": c, "threshold": "BLOCK_NONE"}))
            .collect();
        let body = json!({
            "contents": [{"parts": [{"text": request.prompt()}]}],
            "safetySettings": safety,
            "generationConfig": {
                "temperature": self.temperature,
                "seed": request.seed,
            },
        });

        // Cancellation has to cover the body read too, not just the send.
        let call = async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        BackendError::Timeout
                    } else {
                        BackendError::Http(e.to_string())
                    }
                })?;
            if !response.status().is_success() {
                return Err(Self::map_status(response.status(), &self.model));
            }
            let parsed: GenerateContentResponse = response
                .json()
                .await
                .map_err(|e| BackendError::Http(e.to_string()))?;
            debug!("Cloud API returned {} candidates", parsed.candidates.len());
            Self::extract_text(parsed)
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            r = call => r,
        }
    }
}
