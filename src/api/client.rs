use super::error::ProviderError;
use super::logging::{debug_payload_enabled, emit_debug_payload};
use crate::types::{ChatRequest, FimRequest, FimResponse};
use crate::util::is_local_endpoint_url;
use anyhow::{bail, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// The model provider as seen by the session.
pub trait ModelApi: Send + Sync {
    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ByteStream, ProviderError>>;

    fn complete<'a>(&'a self, request: &'a FimRequest)
        -> BoxFuture<'a, Result<String, ProviderError>>;
}

/// Builds model clients for a base URL and the name of the env var holding the key.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, base_url: &str, api_key_name: &str) -> Result<Arc<dyn ModelApi>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn connect(&self, base_url: &str, api_key_name: &str) -> Result<Arc<dyn ModelApi>> {
        Ok(Arc::new(ApiClient::new(base_url, api_key_name)?))
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key_name: &str) -> Result<Self> {
        let api_key = std::env::var(api_key_name)
            .ok()
            .filter(|v| !v.trim().is_empty());
        if api_key.is_none() && !is_local_endpoint_url(base_url) {
            bail!(
                "environment variable {api_key_name} must be set for non-local endpoints (url: '{base_url}')"
            );
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize>(
        &self,
        request_url: &str,
        payload: &T,
    ) -> Result<reqwest::Response, ProviderError> {
        if debug_payload_enabled() {
            if let Ok(value) = serde_json::to_value(payload) {
                emit_debug_payload(request_url, &value);
            }
        }

        let mut request = self
            .http
            .post(request_url)
            .header("content-type", "application/json")
            .json(payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("authorization", format!("Bearer {api_key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|error| ProviderError::from_reqwest(error, request_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), request_url, &body));
        }
        Ok(response)
    }

    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, ProviderError> {
        let request_url = endpoint_url(&self.base_url, "chat/completions", request.beta);
        let response = self.post(&request_url, request).await?;

        let request_url_for_stream = request_url.clone();
        let stream = response.bytes_stream().map(move |item| {
            item.map_err(|error| ProviderError::from_reqwest(error, &request_url_for_stream))
        });
        Ok(Box::pin(stream))
    }

    async fn fim_completion(&self, request: &FimRequest) -> Result<String, ProviderError> {
        let request_url = endpoint_url(&self.base_url, "completions", true);
        let response = self.post(&request_url, request).await?;
        let body: FimResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::from_reqwest(error, &request_url))?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .unwrap_or_default())
    }
}

impl ModelApi for ApiClient {
    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ByteStream, ProviderError>> {
        Box::pin(self.open_chat_stream(request))
    }

    fn complete<'a>(
        &'a self,
        request: &'a FimRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        Box::pin(self.fim_completion(request))
    }
}

/// Joins the provider base URL with an endpoint path, optionally under `/beta`.
pub fn endpoint_url(base_url: &str, path: &str, beta: bool) -> String {
    let mut root = base_url.trim().trim_end_matches('/');
    for suffix in ["/chat/completions", "/completions"] {
        if let Some(stripped) = root.strip_suffix(suffix) {
            root = stripped;
            break;
        }
    }
    let root = root.strip_suffix("/beta").unwrap_or(root);

    if beta {
        format!("{root}/beta/{path}")
    } else {
        format!("{root}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_from_base() {
        assert_eq!(
            endpoint_url("https://api.deepseek.com", "chat/completions", false),
            "https://api.deepseek.com/chat/completions"
        );
        assert_eq!(
            endpoint_url("https://api.deepseek.com/", "completions", true),
            "https://api.deepseek.com/beta/completions"
        );
    }

    #[test]
    fn test_endpoint_url_strips_existing_endpoint_suffix() {
        assert_eq!(
            endpoint_url("http://localhost:8000/v1/chat/completions", "chat/completions", false),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            endpoint_url("https://api.deepseek.com/beta", "chat/completions", true),
            "https://api.deepseek.com/beta/chat/completions"
        );
    }

    #[test]
    fn test_missing_key_rejected_for_remote_endpoint() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::remove_var("TALKSHELL_TEST_MISSING_KEY");
        let result = ApiClient::new("https://api.deepseek.com", "TALKSHELL_TEST_MISSING_KEY");
        assert!(result.is_err());
    }

    #[test]
    fn test_local_endpoint_allows_missing_key() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::remove_var("TALKSHELL_TEST_MISSING_KEY");
        let client = ApiClient::new("http://localhost:8000/v1", "TALKSHELL_TEST_MISSING_KEY")
            .expect("local endpoint should not need a key");
        assert_eq!(client.base_url(), "http://localhost:8000/v1");
    }
}
