use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use crate::llm::{models::CompletionRequest, CompletionUpstream, LlmError};
use crate::stream::Utf8Carry;

pub struct OpenAiUpstream {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiUpstream {
    pub fn new(api_key: String, base_url: String, default_model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model,
        }
    }

    fn prepare(&self, request: &CompletionRequest) -> CompletionRequest {
        let mut body = request.clone();
        if body.model.is_empty() {
            body.model = self.default_model.clone();
        }
        body.stream = true;
        body
    }
}

#[async_trait]
impl CompletionUpstream for OpenAiUpstream {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        tx: Sender<String>,
    ) -> Result<(), LlmError> {
        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest);
        }
        if self.api_key.is_empty() {
            warn!("No upstream API key configured, request will likely be rejected");
        }

        let body = self.prepare(request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited);
            }
            return Err(LlmError::Api(format!("OpenAI Stream Error {}: {}", status, text)));
        }

        let mut stream = response.bytes_stream();
        let mut utf8 = Utf8Carry::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            let text = utf8.push(&bytes);
            if text.is_empty() {
                continue;
            }
            if tx.send(text).await.is_err() {
                debug!("Stream receiver dropped, abandoning upstream response");
                return Ok(());
            }
        }

        if utf8.held() > 0 {
            warn!("Upstream closed mid-character, dropping {} byte(s)", utf8.held());
        }
        Ok(())
    }
}
