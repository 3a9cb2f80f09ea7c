use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use url::Url;

use crate::config::ApiSettings;
use crate::error::AdapterError;
use crate::protocol::wire::ChatCompletionRequest;

/// Outbound HTTP transport for the chat-completions endpoint.
///
/// One client instance per provider; reqwest pools connections underneath.
/// Only a connect timeout is set; a whole-request timeout would kill
/// long-lived SSE streams mid-turn.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    user_agent: String,
}

impl HttpTransport {
    /// Build a transport from the API settings.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] when the base URL does not parse
    /// or the HTTP client cannot be constructed.
    pub fn new(settings: &ApiSettings) -> Result<Self, AdapterError> {
        let endpoint = chat_completions_url(&settings.base_url)?;
        let client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AdapterError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key.clone(),
            user_agent: settings.user_agent.clone(),
        })
    }

    /// Send the request and return the response body as a byte stream.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] on connection failures and the
    /// categorized upstream error for any non-2xx status, with the response
    /// body text attached.
    pub async fn post_chat_completions(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>>, AdapterError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .header(http::header::USER_AGENT, &self.user_agent)
            .header(http::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| AdapterError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body_text, "upstream rejected request");
            return Err(AdapterError::from_upstream_status(status, body_text));
        }
        Ok(response.bytes_stream())
    }
}

/// Join the configured base with the chat-completions path, tolerating a
/// trailing slash on the base.
fn chat_completions_url(base_url: &str) -> Result<Url, AdapterError> {
    let joined = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    Url::parse(&joined)
        .map_err(|e| AdapterError::Transport(format!("invalid base URL '{base_url}': {e}")))
}
