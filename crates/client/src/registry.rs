//! Per-task channel registry.
//!
//! [`TaskChannelRegistry`] owns at most one live progress channel per task
//! id. Each subscription spawns a task that opens the stream, feeds frames
//! to the registered [`TaskObserver`], and removes itself from the table
//! when the channel ends. A channel delivers exactly one terminal callback
//! (`on_complete` or `on_error`), or none when it was torn down explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mediagen_core::types::TaskId;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::messages::{ProgressData, TaskFailure, TaskResult};
use crate::processor::{process_frames, ChannelOutcome};
use crate::stream::TaskStreamSource;

/// How long [`TaskChannelRegistry::shutdown`] waits for each channel task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives the messages of one task channel.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    async fn on_progress(&self, progress: ProgressData);
    async fn on_complete(&self, result: TaskResult);
    async fn on_error(&self, failure: TaskFailure);
}

type ChannelTable = Arc<RwLock<HashMap<TaskId, ChannelEntry>>>;

/// Tracks live task channels keyed by task id.
pub struct TaskChannelRegistry {
    channels: ChannelTable,
    source: Arc<dyn TaskStreamSource>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

struct ChannelEntry {
    /// Set once a terminal message was handled or the channel was closed.
    closed: Arc<AtomicBool>,
    /// Child of the registry's master token.
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<()>,
}

impl TaskChannelRegistry {
    pub fn new(source: Arc<dyn TaskStreamSource>) -> Arc<Self> {
        Arc::new(Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            source,
            cancel: CancellationToken::new(),
        })
    }

    /// Open a channel for `task_id` and route its messages to `observer`.
    ///
    /// Returns `false` without side effects when a channel for the id is
    /// already registered or the registry is shut down.
    pub async fn subscribe(&self, task_id: &str, observer: Arc<dyn TaskObserver>) -> bool {
        if self.cancel.is_cancelled() {
            tracing::warn!(task_id, "Subscribe after registry shutdown");
            return false;
        }

        let mut channels = self.channels.write().await;
        if channels.contains_key(task_id) {
            tracing::warn!(task_id, "Task channel already registered");
            return false;
        }

        let closed = Arc::new(AtomicBool::new(false));
        let cancel = self.cancel.child_token();
        let ctx = ChannelContext {
            task_id: task_id.to_string(),
            source: Arc::clone(&self.source),
            observer,
            closed: Arc::clone(&closed),
            cancel: cancel.clone(),
            channels: Arc::clone(&self.channels),
        };

        let task_handle = tokio::spawn(async move {
            tracing::info!(task_id = %ctx.task_id, "Starting task channel");
            run_channel(ctx).await;
        });

        channels.insert(
            task_id.to_string(),
            ChannelEntry {
                closed,
                cancel,
                task_handle,
            },
        );
        true
    }

    /// Close and remove the channel for `task_id`. No further callbacks
    /// are delivered for it. Unknown ids are a logged no-op.
    pub async fn unsubscribe(&self, task_id: &str) -> bool {
        let Some(entry) = self.channels.write().await.remove(task_id) else {
            tracing::warn!(task_id, "Unsubscribe for unknown task channel");
            return false;
        };
        entry.closed.store(true, Ordering::SeqCst);
        entry.cancel.cancel();
        tracing::info!(task_id, "Task channel unsubscribed");
        true
    }

    pub async fn is_subscribed(&self, task_id: &str) -> bool {
        self.channels.read().await.contains_key(task_id)
    }

    pub async fn active_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Close every channel and wait up to 5 seconds per task for a clean
    /// exit. Later subscriptions are refused.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down task channel registry");
        self.cancel.cancel();

        let drained: Vec<(TaskId, ChannelEntry)> =
            self.channels.write().await.drain().collect();
        for (task_id, entry) in drained {
            tracing::info!(task_id = %task_id, "Stopping task channel");
            entry.closed.store(true, Ordering::SeqCst);
            entry.cancel.cancel();
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, entry.task_handle).await;
        }

        tracing::info!("Task channel registry shut down complete");
    }
}

/// Everything a spawned channel task needs.
struct ChannelContext {
    task_id: TaskId,
    source: Arc<dyn TaskStreamSource>,
    observer: Arc<dyn TaskObserver>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
    channels: ChannelTable,
}

impl ChannelContext {
    /// Remove this channel's entry, unless it was already replaced or
    /// removed by `unsubscribe`.
    async fn release(&self) {
        let mut channels = self.channels.write().await;
        let owned = channels
            .get(&self.task_id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.closed, &self.closed));
        if owned {
            channels.remove(&self.task_id);
            tracing::debug!(task_id = %self.task_id, "Task channel released");
        }
    }
}

/// Open -> process -> release. Runs once per subscription; channels are
/// not reopened after a drop.
async fn run_channel(ctx: ChannelContext) {
    let opened = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            ctx.release().await;
            return;
        }
        opened = ctx.source.open(&ctx.task_id) => opened,
    };

    let outcome = match opened {
        Ok(mut stream) => {
            process_frames(
                &mut stream,
                &ctx.task_id,
                ctx.observer.as_ref(),
                &ctx.closed,
                &ctx.cancel,
            )
            .await
        }
        Err(e) => {
            tracing::error!(task_id = %ctx.task_id, error = %e, "Failed to open task channel");
            ChannelOutcome::Dropped(e.to_string())
        }
    };

    if let ChannelOutcome::Dropped(reason) = outcome {
        if ctx.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(task_id = %ctx.task_id, "Channel ended after teardown");
        } else {
            tracing::warn!(task_id = %ctx.task_id, reason = %reason, "Task channel lost");
            ctx.observer.on_error(TaskFailure::Transport(reason)).await;
        }
    }

    ctx.release().await;
    tracing::info!(task_id = %ctx.task_id, "Task channel exited");
}
