use reqwest::{Client, RequestBuilder, Response};

use crate::api::models::STREAM_ID_HEADER;
use crate::chat::Dispatch;

/// HTTP side of the chat client: the push channel subscription and the
/// fire-and-forget completion request.
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    pub fn events_url(&self) -> String {
        format!("{}/events", self.base_url)
    }

    pub fn completion_url(&self) -> String {
        format!("{}/api/chatcompletion", self.base_url)
    }

    pub async fn subscribe(&self) -> Result<Response, reqwest::Error> {
        self.authorize(self.client.get(self.events_url()))
            .header("Accept", "text/event-stream")
            .send()
            .await?
            .error_for_status()
    }

    /// Only transport failures and error statuses are observed; the output
    /// arrives on the push channel.
    pub async fn start_completion(&self, dispatch: &Dispatch) -> Result<(), reqwest::Error> {
        self.authorize(self.client.post(self.completion_url()))
            .header(STREAM_ID_HEADER, dispatch.stream_id.to_string())
            .json(&dispatch.request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
