//! Remote backend client
//!
//! Single seam to every remote service the client consumes:
//! - streamed answer generation (raw text chunks, no framing)
//! - the session store (list/create/get/rename/delete/bulk-replace)
//! - retrieval, summarization, and memory commit
//!
//! All calls are JSON-in/JSON-out except the answer body. The `Backend`
//! trait lets tests drive the components with an in-process fake.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::memory::{CommitOutcome, MemorySummary};
use crate::retrieval::RetrievalHit;
use crate::session::types::{SessionDetail, SessionMeta, Turn};

/// Response header carrying the base64-encoded retrieval summary
pub const CONTEXT_HEADER: &str = "X-Context-B64";

/// Response header carrying the base64-encoded generated graph query
pub const QUERY_HEADER: &str = "X-Query-B64";

/// Remote services consumed by the session manager and its workflows
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open an answer stream for `question`, carrying the full turn history
    async fn answer(&self, question: &str, history: &[Turn]) -> Result<AnswerStream>;

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>>;
    async fn create_session(&self, title: Option<&str>) -> Result<SessionMeta>;
    async fn get_session(&self, id: &str) -> Result<SessionDetail>;
    async fn delete_session(&self, id: &str) -> Result<()>;
    async fn rename_session(&self, id: &str, title: &str) -> Result<()>;

    /// Idempotent bulk replace of a session's remote turn history
    async fn replace_turns(&self, id: &str, turns: &[Turn]) -> Result<()>;

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>>;

    /// Best-effort derived-query suggestion for a question
    async fn suggest_query(&self, question: &str) -> Result<Option<String>>;

    async fn summarize(&self, turns: &[Turn]) -> Result<MemorySummary>;
    async fn commit_memory(&self, memory_id: &str) -> Result<CommitOutcome>;
}

// ============================================================================
// Answer stream
// ============================================================================

/// Events produced while reading a streamed answer body
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Decoded text chunk
    Chunk(String),
    /// Clean end of stream
    Done,
    /// Transport error while reading the body
    Error(String),
}

/// An open answer stream plus the side payloads decoded from its headers
///
/// Dropping (or closing) the stream cancels the reader task and releases the
/// underlying HTTP response on its next send.
#[derive(Debug)]
pub struct AnswerStream {
    /// Decoded retrieval-context payload, if the server sent one
    pub context: Option<String>,
    /// Decoded generated graph query, if the server sent one
    pub graph_query: Option<String>,
    rx: mpsc::Receiver<StreamEvent>,
}

impl AnswerStream {
    pub fn new(
        context: Option<String>,
        graph_query: Option<String>,
        rx: mpsc::Receiver<StreamEvent>,
    ) -> Self {
        Self {
            context,
            graph_query,
            rx,
        }
    }

    /// Receive the next stream event; `None` means the producer is gone
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stop consuming; the reader task exits on its next send
    pub fn close(&mut self) {
        self.rx.close();
    }
}

// ============================================================================
// Incremental text decoding
// ============================================================================

/// Incremental UTF-8 decoder for unframed byte streams
///
/// The answer body arrives as raw byte chunks that can split multi-byte
/// sequences at arbitrary points. An incomplete trailing sequence is carried
/// into the next push; genuinely invalid bytes are lossy-replaced.
#[derive(Debug, Default)]
pub struct TextDecoder {
    carry: Vec<u8>,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning the text decodable so far
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(e) if e.error_len().is_none() => {
                // incomplete trailing sequence: emit the valid prefix, carry the rest
                let valid = e.valid_up_to();
                self.carry = bytes[valid..].to_vec();
                // Safety: from_utf8 validated this prefix
                String::from_utf8_lossy(&bytes[..valid]).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    /// Drain any carried bytes at end of stream
    pub fn flush(&mut self) -> String {
        let bytes = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

// ============================================================================
// HTTP backend
// ============================================================================

/// `Backend` over HTTP against a single base URL
pub struct HttpBackend {
    http: HttpClient,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: HttpClient::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-2xx response into `ChatError::Server`
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(ChatError::Server {
            status: status.as_u16(),
            message: decode_error_body(response).await,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = Self::check(response).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let response = Self::check(response).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn put_ok<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<()> {
        let response = self.http.put(self.url(path)).json(body).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn answer(&self, question: &str, history: &[Turn]) -> Result<AnswerStream> {
        let body = AnswerRequest { question, history };
        let response = self
            .http
            .post(self.url("/api/llm/answer"))
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let context = decode_b64_header(response.headers(), CONTEXT_HEADER);
        let graph_query = decode_b64_header(response.headers(), QUERY_HEADER);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(forward_body(response, tx));

        Ok(AnswerStream::new(context, graph_query, rx))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        self.get_json("/api/sessions").await
    }

    async fn create_session(&self, title: Option<&str>) -> Result<SessionMeta> {
        self.post_json("/api/sessions", &CreateSessionRequest { title })
            .await
    }

    async fn get_session(&self, id: &str) -> Result<SessionDetail> {
        self.get_json(&format!("/api/sessions/{id}")).await
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/sessions/{id}")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn rename_session(&self, id: &str, title: &str) -> Result<()> {
        self.put_ok(&format!("/api/sessions/{id}/title"), &RenameRequest { title })
            .await
    }

    async fn replace_turns(&self, id: &str, turns: &[Turn]) -> Result<()> {
        self.put_ok(
            &format!("/api/sessions/{id}/turns"),
            &ReplaceTurnsRequest { turns },
        )
        .await
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        let response = self
            .http
            .get(self.url("/api/retrieval"))
            .query(&[("query", query), ("k", &k.to_string())])
            .send()
            .await?;
        let response = Self::check(response).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn suggest_query(&self, question: &str) -> Result<Option<String>> {
        let resp: SuggestQueryResponse = self
            .post_json("/api/llm/suggest_query", &SuggestQueryRequest { question })
            .await?;
        Ok(resp.query.filter(|q| !q.is_empty()))
    }

    async fn summarize(&self, turns: &[Turn]) -> Result<MemorySummary> {
        self.post_json("/api/memory/summarize", &SummarizeRequest { turns })
            .await
    }

    async fn commit_memory(&self, memory_id: &str) -> Result<CommitOutcome> {
        self.post_json("/api/memory/commit", &CommitRequest { memory_id })
            .await
    }
}

/// Forward the response body to the channel as decoded text chunks
///
/// Exits when the body ends, the transport fails, or the receiver is dropped
/// (cancellation); in every case the HTTP response is released with the task.
async fn forward_body(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut stream = response.bytes_stream();
    let mut decoder = TextDecoder::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                let text = decoder.push(&bytes);
                if text.is_empty() {
                    continue;
                }
                if tx.send(StreamEvent::Chunk(text)).await.is_err() {
                    debug!("answer stream receiver dropped, cancelling read loop");
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        }
    }

    let tail = decoder.flush();
    if !tail.is_empty() && tx.send(StreamEvent::Chunk(tail)).await.is_err() {
        return;
    }
    let _ = tx.send(StreamEvent::Done).await;
}

/// Decode a base64 side-channel header; failures only suppress the payload
fn decode_b64_header(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(name)?.to_str().ok()?;
    match BASE64.decode(raw) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!("side payload {name} is not valid UTF-8: {e}");
                None
            }
        },
        Err(e) => {
            warn!("failed to decode side payload {name}: {e}");
            None
        }
    }
}

/// Extract a structured error message from a failed response body
async fn decode_error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
        return body.error;
    }
    if !text.trim().is_empty() {
        return text.trim().to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    question: &'a str,
    history: &'a [Turn],
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct RenameRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplaceTurnsRequest<'a> {
    turns: &'a [Turn],
}

#[derive(Debug, Serialize)]
struct SuggestQueryRequest<'a> {
    question: &'a str,
}

#[derive(Debug, Deserialize)]
struct SuggestQueryResponse {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    turns: &'a [Turn],
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    memory_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}
