pub mod models;
pub mod openai;

use openai::OpenAiUpstream;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::config::AppConfig;
use models::CompletionRequest;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network Error: {0}")]
    Network(String),
    #[error("API Error: {0}")]
    Api(String),
    #[error("Invalid Request")]
    InvalidRequest,
    #[error("Rate Limited")]
    RateLimited,
}

/// The completion API the relay forwards requests to.
#[async_trait]
pub trait CompletionUpstream: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Issues a streaming completion and sends every received text chunk,
    /// untouched, on `tx`. Returns once the upstream closes the stream.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        tx: Sender<String>,
    ) -> Result<(), LlmError>;
}

pub struct UpstreamFactory;

impl UpstreamFactory {
    pub fn create_default(config: &AppConfig) -> Option<Arc<dyn CompletionUpstream>> {
        let cfg = &config.upstream;

        match cfg.provider.as_str() {
            "openai" => Some(Arc::new(OpenAiUpstream::new(
                cfg.api_key.clone(),
                cfg.api_base.clone(),
                cfg.default_model.clone(),
            ))),
            _ => None,
        }
    }
}
