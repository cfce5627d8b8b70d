//! Task channel message processing loop.
//!
//! Reads frames from one task's progress stream, decodes them into
//! [`TaskMessage`] variants and dispatches each to the channel's
//! [`TaskObserver`]. Returns on the first terminal message, on
//! cancellation, or when the stream breaks.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::messages::{decode_frame, TaskMessage};
use crate::registry::TaskObserver;
use crate::sse::SseFrame;
use crate::stream::FrameStream;

/// How a processing loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// A `complete` or `error-event` message was delivered.
    Terminal,
    /// The channel's token was cancelled (unsubscribe or shutdown).
    Cancelled,
    /// The stream ended or failed before any terminal message.
    Dropped(String),
}

/// Process frames until a terminal message, cancellation, or stream end.
///
/// `closed` is set *before* the terminal callback runs so that the
/// stream closing afterwards is recognized as expected teardown.
pub async fn process_frames(
    stream: &mut FrameStream,
    task_id: &str,
    observer: &dyn TaskObserver,
    closed: &AtomicBool,
    cancel: &CancellationToken,
) -> ChannelOutcome {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(task_id, "Task channel cancelled");
                return ChannelOutcome::Cancelled;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                if handle_frame(&frame, task_id, observer, closed).await {
                    return ChannelOutcome::Terminal;
                }
            }
            Some(Err(e)) => {
                tracing::error!(task_id, error = %e, "Progress stream receive error");
                return ChannelOutcome::Dropped(e.to_string());
            }
            None => {
                tracing::info!(task_id, "Progress stream closed by server");
                return ChannelOutcome::Dropped("stream closed before completion".into());
            }
        }
    }
}

/// Dispatch one frame. Returns `true` when the message was terminal.
async fn handle_frame(
    frame: &SseFrame,
    task_id: &str,
    observer: &dyn TaskObserver,
    closed: &AtomicBool,
) -> bool {
    let Some(message) = decode_frame(frame) else {
        tracing::debug!(task_id, event = %frame.event, "Ignoring unhandled event");
        return false;
    };

    match message {
        TaskMessage::Progress(data) => {
            tracing::debug!(
                task_id,
                percentage = ?data.percentage,
                step = ?data.step_id(),
                "Generation progress",
            );
            observer.on_progress(data).await;
            false
        }
        TaskMessage::Complete(result) => {
            closed.store(true, Ordering::SeqCst);
            tracing::info!(task_id, uid = %result.uid, "Task completed");
            observer.on_complete(result).await;
            true
        }
        TaskMessage::Failed(failure) => {
            closed.store(true, Ordering::SeqCst);
            tracing::warn!(task_id, error = %failure, "Task failed");
            observer.on_error(failure).await;
            true
        }
    }
}
