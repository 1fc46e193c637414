use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use reqwest::Response;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::chat::{ChatBackend, ChatReply, ChatRequest, EventStream};
use crate::error::{Error, Result};
use crate::stream::EventParser;

/// Where the triage backend listens unless configured otherwise.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8012";

/// HTTP client for the triage backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Failed responses carry `{"detail": "..."}`; surface that text when
    /// present, else fall back to the status line.
    async fn api_error(response: Response) -> Error {
        let status = response.status();
        let fallback = || {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        };
        let detail = match response.text().await {
            Ok(body) => serde_json::from_str::<ErrorBody>(&body)
                .map(|parsed| parsed.detail)
                .ok()
                .filter(|detail| !detail.is_empty())
                .unwrap_or_else(fallback),
            Err(_) => fallback(),
        };
        Error::Api {
            status: status.as_u16(),
            detail,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::decode(response).await
    }

    pub(crate) async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    pub(crate) async fn put_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.http.put(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    pub(crate) async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.delete(self.url(path)).send().await?;
        Self::decode(response).await
    }

    /// Blocking variant of the chat endpoint: one request, one full reply,
    /// plus the patient record updated by the turn.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply> {
        self.post_json("/api/chat", &request).await
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn chat_stream(&self, request: ChatRequest) -> Result<EventStream> {
        let response = self
            .http
            .post(self.url("/api/chat/stream"))
            .json(&request)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let mut parser = EventParser::new();
        let events = response.bytes_stream().flat_map(move |chunk| {
            let parsed: Vec<Result<_>> = match chunk {
                Ok(bytes) => parser.push(&bytes).into_iter().map(Ok).collect(),
                Err(err) => vec![Err(Error::Http(err))],
            };
            stream::iter(parsed)
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_trimmed() {
        let client = ApiClient::new("http://localhost:8012///");
        assert_eq!(
            client.url("/api/patients"),
            "http://localhost:8012/api/patients"
        );
    }

    #[test]
    fn url_joins_base_and_path() {
        let client = ApiClient::new(DEFAULT_BASE_URL);
        assert_eq!(client.url("/api/chat"), "http://localhost:8012/api/chat");
    }
}
