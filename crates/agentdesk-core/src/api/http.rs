use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{
    ApiFuture, ChatRequest, ChatTransport, MessageRecord, StoredMessage, ThreadApi, ThreadSummary,
};
use crate::auth::{TokenProvider, require_token};
use crate::config::ApiConfig;
use crate::error::{EngineError, EngineResult, ErrorKind, classify_reqwest_error};
use crate::stream::ByteStream;

/// List endpoints may return a bare array or wrap it in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "threads", alias = "messages")]
        items: Vec<T>,
    },
}

impl<T> ListBody<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListBody::Bare(items) | ListBody::Wrapped { items } => items,
        }
    }
}

/// Thread REST API over reqwest.
#[derive(Clone)]
pub struct HttpThreadApi {
    http: reqwest::Client,
    base_url: String,
    api: ApiConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpThreadApi {
    pub fn new(
        base_url: impl Into<String>,
        api: ApiConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(api.request_timeout())
            .build()
            .map_err(|e| EngineError::new(ErrorKind::Config, format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api,
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{threads_path}/{thread_id}/messages` with the id percent-encoded.
    fn messages_url(&self, thread_id: &str) -> EngineResult<String> {
        let base = self.url(&self.api.threads_path);
        let mut url = Url::parse(&base)
            .map_err(|e| EngineError::new(ErrorKind::Config, format!("Invalid URL {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| EngineError::new(ErrorKind::Config, format!("Invalid URL {base}")))?
            .pop_if_empty()
            .push(thread_id)
            .push("messages");
        Ok(url.into())
    }

    async fn get_list<T: DeserializeOwned>(&self, url: String) -> EngineResult<Vec<T>> {
        let token = require_token(self.tokens.as_ref())?;
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let response = ensure_success(response).await?;
        let body: ListBody<T> = response
            .json()
            .await
            .map_err(|e| EngineError::decode(format!("Invalid response from {url}: {e}")))?;
        Ok(body.into_vec())
    }
}

impl ThreadApi for HttpThreadApi {
    fn post_message<'a>(&'a self, record: &'a MessageRecord) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let token = require_token(self.tokens.as_ref())?;
            let response = self
                .http
                .post(self.url(&self.api.messages_path))
                .bearer_auth(token)
                .json(record)
                .send()
                .await
                .map_err(|e| classify_reqwest_error(&e))?;
            ensure_success(response).await?;
            Ok(())
        })
    }

    fn list_threads(&self) -> ApiFuture<'_, Vec<ThreadSummary>> {
        Box::pin(self.get_list(self.url(&self.api.threads_path)))
    }

    fn fetch_messages<'a>(&'a self, thread_id: &'a str) -> ApiFuture<'a, Vec<StoredMessage>> {
        Box::pin(async move {
            let url = self.messages_url(thread_id)?;
            self.get_list(url).await
        })
    }
}

/// Streaming chat endpoint over reqwest.
///
/// No overall request timeout is set; stalls are detected by the stream
/// interpreter's idle timeout.
#[derive(Clone)]
pub struct HttpChatTransport {
    http: reqwest::Client,
    url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpChatTransport {
    pub fn new(
        base_url: &str,
        api: &ApiConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(api.request_timeout())
            .build()
            .map_err(|e| EngineError::new(ErrorKind::Config, format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: format!("{base_url}{}", api.stream_path),
            tokens,
        })
    }
}

impl ChatTransport for HttpChatTransport {
    fn open<'a>(&'a self, request: &'a ChatRequest) -> ApiFuture<'a, ByteStream> {
        Box::pin(async move {
            let token = require_token(self.tokens.as_ref())?;
            let response = self
                .http
                .post(&self.url)
                .bearer_auth(token)
                .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
                .json(request)
                .send()
                .await
                .map_err(|e| classify_reqwest_error(&e))?;
            let response = ensure_success(response).await?;

            let bytes = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| classify_reqwest_error(&e)))
                .boxed();
            Ok(bytes)
        })
    }
}

async fn ensure_success(response: reqwest::Response) -> EngineResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::http_status(status.as_u16(), &body))
}
