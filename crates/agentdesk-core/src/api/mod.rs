//! Backend collaborators: the streaming chat endpoint and the thread REST API.
//!
//! Both are traits so the pipeline can be driven by in-memory fakes in tests.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineResult;
use crate::stream::ByteStream;
use crate::transcript::Role;

mod http;

pub use http::{HttpChatTransport, HttpThreadApi};

/// Boxed future returned by collaborator methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send + 'a>>;

/// Body of the streaming chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub agent_slug: String,
    pub message: String,
    pub client_message_id: String,
}

/// A message registered with the thread store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub thread_id: String,
    pub agent_slug: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls_summary: Option<Value>,
    pub client_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
}

/// A persisted message as returned for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(default)]
    pub id: Option<String>,
    /// Raw wire role; see [`Role::parse`]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Opens the streaming chat response for one turn.
pub trait ChatTransport: Send + Sync {
    fn open<'a>(&'a self, request: &'a ChatRequest) -> ApiFuture<'a, ByteStream>;
}

/// Thread and message persistence on the backend.
pub trait ThreadApi: Send + Sync {
    /// Registers a message. Success means the backend durably accepted it.
    fn post_message<'a>(&'a self, record: &'a MessageRecord) -> ApiFuture<'a, ()>;

    fn list_threads(&self) -> ApiFuture<'_, Vec<ThreadSummary>>;

    fn fetch_messages<'a>(&'a self, thread_id: &'a str) -> ApiFuture<'a, Vec<StoredMessage>>;
}
