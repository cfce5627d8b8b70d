//! Per-task progress streams.
//!
//! [`TaskStreamSource`] opens the server-push channel of one task and
//! yields decoded [`SseFrame`]s. [`SseStreamSource`] does this over HTTP
//! (`GET {api}/progress/{task_id}`, `text/event-stream`).

use std::collections::VecDeque;
use std::fmt::Display;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;

use crate::config::ClientConfig;
use crate::sse::{SseDecoder, SseFrame};

/// Frames of one task channel, in receipt order.
pub type FrameStream = BoxStream<'static, Result<SseFrame, StreamError>>;

/// Opens the push channel of a task.
#[async_trait]
pub trait TaskStreamSource: Send + Sync {
    async fn open(&self, task_id: &str) -> Result<FrameStream, StreamError>;
}

/// Errors that can occur on a task channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Failed to establish the stream.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The established stream broke while reading.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Server-sent-events source backed by [`reqwest`].
pub struct SseStreamSource {
    client: reqwest::Client,
    api_url: String,
}

impl SseStreamSource {
    /// Streams are long-lived, so only the connect phase is bounded.
    pub fn new(config: &ClientConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        Ok(Self::with_client(client, config.api_url.clone()))
    }

    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Progress endpoint of one task.
    pub fn stream_url(&self, task_id: &str) -> String {
        format!("{}/progress/{}", self.api_url, task_id)
    }
}

#[async_trait]
impl TaskStreamSource for SseStreamSource {
    async fn open(&self, task_id: &str) -> Result<FrameStream, StreamError> {
        let url = self.stream_url(task_id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                StreamError::Connection(format!("Failed to open progress stream at {url}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Connection(format!(
                "Progress stream at {url} returned HTTP {status}"
            )));
        }

        tracing::info!(task_id, "Opened progress stream");
        Ok(sse_frames(response.bytes_stream()).boxed())
    }
}

/// Decode a byte stream into server-sent-event frames.
///
/// A read error is yielded once and ends the stream.
pub fn sse_frames<S, B, E>(bytes: S) -> impl Stream<Item = Result<SseFrame, StreamError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<SseFrame>,
        done: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(chunk.as_ref());
                    state.pending.extend(frames);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(StreamError::Protocol(e.to_string())), state));
                }
                None => {
                    if state.decoder.has_pending() {
                        tracing::debug!("Progress stream ended mid-event");
                    }
                    return None;
                }
            }
        }
    })
}
