//! Progress presenter: a small state machine fed by one task channel.
//!
//! ```text
//! starting -> in_progress -> completed | failed -> hidden
//!     \______________________/________________/
//!                 dismiss() -> hidden
//! ```
//!
//! Terminal phases schedule an automatic hide. The current message is
//! mirrored into a [`TitleAnnotator`] (window or terminal title) and reset
//! once the task is over. Renderers follow state through
//! [`ProgressPresenter::watch`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mediagen_core::task::clamp_percentage;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::messages::{ProgressData, TaskFailure, TaskResult};
use crate::registry::TaskObserver;

/// Delay before a completed presenter hides itself.
pub const COMPLETE_HIDE_DELAY: Duration = Duration::from_secs(2);
/// Delay before a failed presenter hides itself.
pub const ERROR_HIDE_DELAY: Duration = Duration::from_secs(5);

pub const STARTING_MESSAGE: &str = "Starting...";
pub const FALLBACK_STEP_LABEL: &str = "Processing...";
pub const COMPLETE_MESSAGE: &str = "Complete!";

// ---------------------------------------------------------------------------
// Title annotation
// ---------------------------------------------------------------------------

/// Mirrors the presenter message into a title bar.
pub trait TitleAnnotator: Send + Sync {
    fn annotate(&self, text: &str);
    /// Restore the title that was shown before the task started.
    fn reset(&self);
}

/// Annotator for embedders without a title.
pub struct NoTitle;

impl TitleAnnotator for NoTitle {
    fn annotate(&self, _text: &str) {}
    fn reset(&self) {}
}

// ---------------------------------------------------------------------------
// Step labels
// ---------------------------------------------------------------------------

/// Backend step identifier -> human-readable label.
#[derive(Debug, Clone)]
pub struct StepLabels {
    labels: HashMap<String, String>,
}

const DEFAULT_STEP_LABELS: &[(&str, &str)] = &[
    ("queued", "Waiting in queue..."),
    ("loading_models", "Loading models..."),
    ("preparing_inputs", "Preparing inputs..."),
    ("encoding_prompt", "Encoding prompt..."),
    ("sampling", "Generating..."),
    ("decoding", "Decoding..."),
    ("upscaling", "Upscaling..."),
    ("interpolating", "Interpolating frames..."),
    ("encoding_video", "Encoding video..."),
    ("synthesizing_audio", "Synthesizing audio..."),
    ("saving", "Saving result..."),
];

impl Default for StepLabels {
    fn default() -> Self {
        Self {
            labels: DEFAULT_STEP_LABELS
                .iter()
                .map(|(step, label)| (step.to_string(), label.to_string()))
                .collect(),
        }
    }
}

impl StepLabels {
    pub fn empty() -> Self {
        Self {
            labels: HashMap::new(),
        }
    }

    pub fn with(mut self, step: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(step.into(), label.into());
        self
    }

    pub fn label(&self, step: Option<&str>) -> &str {
        step.and_then(|s| self.labels.get(s))
            .map(String::as_str)
            .unwrap_or(FALLBACK_STEP_LABEL)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterPhase {
    Starting,
    InProgress,
    Completed,
    Failed,
    Hidden,
}

impl PresenterPhase {
    /// Completed, failed or hidden: no further progress is accepted.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            PresenterPhase::Completed | PresenterPhase::Failed | PresenterPhase::Hidden
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenterSnapshot {
    pub phase: PresenterPhase,
    pub percentage: u8,
    pub message: String,
    pub counter: Option<(u32, u32)>,
}

impl PresenterSnapshot {
    fn starting() -> Self {
        Self {
            phase: PresenterPhase::Starting,
            percentage: 0,
            message: STARTING_MESSAGE.to_string(),
            counter: None,
        }
    }

    /// Message with the `(current/max) ` counter prefix, when known.
    pub fn display_message(&self) -> String {
        match self.counter {
            Some((current, max)) => format!("({current}/{max}) {}", self.message),
            None => self.message.clone(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.phase != PresenterPhase::Hidden
    }
}

#[derive(Debug, Clone)]
pub struct PresenterTimings {
    pub complete_hide: Duration,
    pub error_hide: Duration,
}

impl Default for PresenterTimings {
    fn default() -> Self {
        Self {
            complete_hide: COMPLETE_HIDE_DELAY,
            error_hide: ERROR_HIDE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PresenterOptions {
    pub labels: StepLabels,
    pub timings: PresenterTimings,
}

type CompleteHook = Box<dyn FnOnce(&TaskResult) + Send>;
type ErrorHook = Box<dyn FnOnce(&TaskFailure) + Send>;

/// External callbacks, each invoked at most once.
#[derive(Default)]
pub struct PresenterHooks {
    on_complete: Option<CompleteHook>,
    on_error: Option<ErrorHook>,
}

impl PresenterHooks {
    pub fn on_complete(mut self, hook: impl FnOnce(&TaskResult) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl FnOnce(&TaskFailure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }
}

// ---------------------------------------------------------------------------
// ProgressPresenter
// ---------------------------------------------------------------------------

/// Presenter for a single task. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressPresenter {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<PresenterSnapshot>,
    title: Arc<dyn TitleAnnotator>,
    options: PresenterOptions,
    hide_timer: Mutex<Option<CancellationToken>>,
    hooks: Mutex<PresenterHooks>,
}

impl ProgressPresenter {
    /// Mount with default labels and timings.
    pub fn mount(title: Arc<dyn TitleAnnotator>, hooks: PresenterHooks) -> Self {
        Self::mount_with(title, hooks, PresenterOptions::default())
    }

    pub fn mount_with(
        title: Arc<dyn TitleAnnotator>,
        hooks: PresenterHooks,
        options: PresenterOptions,
    ) -> Self {
        let (state, _) = watch::channel(PresenterSnapshot::starting());
        title.annotate(STARTING_MESSAGE);
        Self {
            inner: Arc::new(Inner {
                state,
                title,
                options,
                hide_timer: Mutex::new(None),
                hooks: Mutex::new(hooks),
            }),
        }
    }

    pub fn snapshot(&self) -> PresenterSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<PresenterSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn handle_progress(&self, progress: &ProgressData) {
        let labels = &self.inner.options.labels;
        let mut title_text = None;
        self.inner.state.send_if_modified(|s| {
            if s.phase.is_settled() {
                return false;
            }
            s.phase = PresenterPhase::InProgress;
            if let Some(percentage) = progress.percentage {
                s.percentage = clamp_percentage(percentage);
            }
            s.message = labels.label(progress.step_id()).to_string();
            s.counter = progress.counter();
            title_text = Some(s.display_message());
            true
        });
        if let Some(text) = title_text {
            self.inner.title.annotate(&text);
        }
    }

    pub fn handle_complete(&self, result: &TaskResult) {
        let changed = self.inner.settle(PresenterPhase::Completed, 100, COMPLETE_MESSAGE.into());
        if !changed {
            return;
        }
        self.schedule_hide(self.inner.options.timings.complete_hide);
        let hook = self.inner.lock_hooks().on_complete.take();
        if let Some(hook) = hook {
            hook(result);
        }
    }

    pub fn handle_error(&self, failure: &TaskFailure) {
        let changed = self
            .inner
            .settle(PresenterPhase::Failed, 0, failure.to_string());
        if !changed {
            return;
        }
        self.schedule_hide(self.inner.options.timings.error_hide);
        let hook = self.inner.lock_hooks().on_error.take();
        if let Some(hook) = hook {
            hook(failure);
        }
    }

    /// Hide immediately, cancelling any pending auto-hide.
    pub fn dismiss(&self) {
        self.inner.cancel_timer();
        self.inner.hide();
    }

    fn schedule_hide(&self, delay: Duration) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.replace_timer(token.clone()) {
            previous.cancel();
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.hide(),
            }
        });
    }
}

impl Inner {
    /// Enter a terminal phase. Returns false when already settled.
    fn settle(&self, phase: PresenterPhase, percentage: u8, message: String) -> bool {
        let changed = self.state.send_if_modified(|s| {
            if s.phase.is_settled() {
                return false;
            }
            s.phase = phase;
            s.percentage = percentage;
            s.message = message;
            s.counter = None;
            true
        });
        if changed {
            self.title.reset();
        }
        changed
    }

    fn hide(&self) {
        let changed = self.state.send_if_modified(|s| {
            if s.phase == PresenterPhase::Hidden {
                return false;
            }
            s.phase = PresenterPhase::Hidden;
            true
        });
        if changed {
            self.title.reset();
        }
    }

    fn replace_timer(&self, token: CancellationToken) -> Option<CancellationToken> {
        self.hide_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token)
    }

    fn cancel_timer(&self) {
        let timer = self
            .hide_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = timer {
            token.cancel();
        }
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, PresenterHooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskObserver for ProgressPresenter {
    async fn on_progress(&self, progress: ProgressData) {
        self.handle_progress(&progress);
    }

    async fn on_complete(&self, result: TaskResult) {
        self.handle_complete(&result);
    }

    async fn on_error(&self, failure: TaskFailure) {
        self.handle_error(&failure);
    }
}
