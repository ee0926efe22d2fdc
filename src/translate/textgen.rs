//! Local text-generation server backend
//!
//! Talks to an Ollama-compatible HTTP API: `/api/generate` for completions
//! and `/api/tags` for the installed model list. The model list is cached
//! briefly so UI polling does not hammer the server.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BackendError, TranslationBackend, TranslationRequest};

/// How long a fetched model list stays fresh.
const MODEL_LIST_TTL: Duration = Duration::from_secs(5);
/// Completion length cap; UI text never needs more.
const NUM_PREDICT: i64 = 512;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Backend for a local Ollama-compatible server.
pub struct TextGenBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    model_cache: Mutex<Option<(Instant, Vec<String>)>>,
}

impl TextGenBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            temperature,
            model_cache: Mutex::new(None),
        }
    }

    fn map_status(status: reqwest::StatusCode, model: &str) -> BackendError {
        match status.as_u16() {
            404 => BackendError::ModelNotFound(model.to_string()),
            429 => BackendError::RateLimited,
            code => BackendError::Http(format!("server returned {code}")),
        }
    }

    fn map_transport(e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Http(e.to_string())
        }
    }

    /// Installed model names, served from a short-lived cache.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        if let Some((fetched, models)) = self.model_cache.lock().as_ref() {
            if fetched.elapsed() < MODEL_LIST_TTL {
                return Ok(models.clone());
            }
        }

        let url = format!("{}/api/tags", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_transport)?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), &self.model));
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        debug!("Server reports {} installed models", models.len());
        *self.model_cache.lock() = Some((Instant::now(), models.clone()));
        Ok(models)
    }
}

#[async_trait]
impl TranslationBackend for TextGenBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = json!({
            "model": self.model,
            "prompt": request.prompt(),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "top_p": 0.9,
                "seed": request.seed,
                "num_predict": NUM_PREDICT,
            },
        });

        // Cancellation has to cover the body read too: a server can accept
        // the request and then stall mid-response.
        let call = async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(Self::map_transport)?;
            if !response.status().is_success() {
                return Err(Self::map_status(response.status(), &self.model));
            }
            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| BackendError::Http(e.to_string()))?;
            Ok(parsed.response)
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            r = call => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Language;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_cancel_during_stalled_body_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            // Headers promise a body that never arrives.
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000000\r\n\r\n{")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(600)).await;
        });

        let backend = TextGenBackend::new(format!("http://{addr}"), "qwen2.5:7b", 0.3);
        let request = TranslationRequest {
            text: "せっていをひらく".to_string(),
            source: Language::Ja,
            target: Language::En,
            strict: false,
            seed: 42,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = backend.translate(&request, &cancel).await;
        assert!(matches!(result, Err(BackendError::Cancelled)));
    }

    #[test]
    fn test_status_mapping() {
        let model = "qwen2.5:7b";
        assert!(matches!(
            TextGenBackend::map_status(reqwest::StatusCode::NOT_FOUND, model),
            BackendError::ModelNotFound(_)
        ));
        assert!(matches!(
            TextGenBackend::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, model),
            BackendError::RateLimited
        ));
        assert!(matches!(
            TextGenBackend::map_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, model),
            BackendError::Http(_)
        ));
    }

    #[test]
    fn test_generate_response_parsing() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"response":"Open the settings","done":true}"#).unwrap();
        assert_eq!(parsed.response, "Open the settings");
    }

    #[test]
    fn test_tags_response_parsing() {
        let parsed: TagsResponse = serde_json::from_str(
            r#"{"models":[{"name":"qwen2.5:7b","size":4}, {"name":"llama3.1:8b"}]}"#,
        )
        .unwrap();
        let names: Vec<_> = parsed.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["qwen2.5:7b", "llama3.1:8b"]);
    }
}
