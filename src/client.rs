//! Streaming chat client for the Ollama `/api/chat` endpoint.
//!
//! A request carries the full current history plus the named sampling
//! options; the response is a newline-delimited JSON stream of content
//! fragments. A spawned reader task forwards fragments over an mpsc channel
//! and watches a shared cancellation flag: once raised, the reader emits a
//! single `Cancelled` event and stops, so the caller can roll the turn back
//! instead of committing a half-finished response.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{LoreweaverConfig, SamplingOptions};
use crate::context::{History, Turn};
use crate::{LoreweaverError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Cap on error body text quoted back to the user.
const ERROR_DETAIL_CHARS: usize = 200;

/// One event from the generation stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental content fragment.
    Delta(String),
    /// The model finished normally.
    Done,
    /// The caller raised the cancellation flag; nothing was committed.
    Cancelled,
    /// The stream broke or the backend reported an error.
    Error(String),
}

/// Cooperative cancellation flag shared between the turn loop and the
/// stream reader.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    options: &'a SamplingOptions,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Client for the generation backend.
pub struct ChatClient {
    client: Client,
    base_url: String,
    model: String,
    options: SamplingOptions,
}

impl ChatClient {
    pub fn new(config: &LoreweaverConfig) -> Self {
        // No overall request timeout: a story response can stream for
        // minutes. Hung connections are the user's Ctrl-C to deal with,
        // the same as slow ones.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("loreweaver/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            options: config.sampling.clone(),
        }
    }

    /// Start a streaming generation over the full history. Returns the
    /// event receiver once the backend has accepted the request.
    pub async fn chat_stream(
        &self,
        history: &History,
        cancel: CancelToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: history.turns(),
            stream: true,
            options: &self.options,
        };

        debug!("Dispatching {} turns to {}", history.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LoreweaverError::Api(format!("could not reach backend: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoreweaverError::Api(format!(
                "API returned status {status}: {}",
                clip_chars(body.trim(), ERROR_DETAIL_CHARS)
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut line_buffer = String::new();

            while let Some(chunk_result) = stream.next().await {
                if cancel.is_cancelled() {
                    let _ = tx.send(StreamEvent::Cancelled).await;
                    return;
                }

                match chunk_result {
                    Ok(bytes) => {
                        line_buffer.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(newline_pos) = line_buffer.find('\n') {
                            let line = line_buffer[..newline_pos].trim().to_string();
                            line_buffer = line_buffer[newline_pos + 1..].to_string();
                            if line.is_empty() {
                                continue;
                            }

                            match serde_json::from_str::<ChatChunk>(&line) {
                                Ok(chunk) => {
                                    if let Some(error) = chunk.error {
                                        let _ = tx.send(StreamEvent::Error(error)).await;
                                        return;
                                    }
                                    if let Some(message) = chunk.message {
                                        if !message.content.is_empty()
                                            && tx
                                                .send(StreamEvent::Delta(message.content))
                                                .await
                                                .is_err()
                                        {
                                            // Receiver gone, stop reading.
                                            return;
                                        }
                                    }
                                    if chunk.done {
                                        let _ = tx.send(StreamEvent::Done).await;
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!("Undecodable stream chunk: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

fn clip_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
