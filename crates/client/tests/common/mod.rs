#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use image::{ImageFormat, RgbImage};
use tokio::sync::{mpsc as tokio_mpsc, Semaphore};

use mediagen_client::api::{ApiError, GenerationApi};
use mediagen_client::messages::{ProgressData, TaskFailure, TaskResult};
use mediagen_client::presenter::TitleAnnotator;
use mediagen_client::registry::TaskObserver;
use mediagen_client::sse::SseFrame;
use mediagen_client::stream::{FrameStream, StreamError, TaskStreamSource};
use mediagen_core::history::HistoryEntry;
use mediagen_core::request::{FilePart, GenerateBody};
use mediagen_core::types::TaskId;
use mediagen_core::workflow::Workflow;

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

pub fn progress_frame(percentage: f64, step: &str) -> SseFrame {
    SseFrame::new(
        "progress",
        format!(r#"{{"progress":{{"percentage":{percentage},"currentStep":"{step}"}}}}"#),
    )
}

pub fn complete_frame(uid: &str) -> SseFrame {
    SseFrame::new("complete", format!(r#"{{"result":{{"uid":"{uid}"}}}}"#))
}

pub fn error_frame(message: &str) -> SseFrame {
    SseFrame::new(
        "error-event",
        format!(r#"{{"error":{{"message":"{message}"}}}}"#),
    )
}

// ---------------------------------------------------------------------------
// Scripted stream source
// ---------------------------------------------------------------------------

type FrameSender = mpsc::UnboundedSender<Result<SseFrame, StreamError>>;
type FrameReceiver = mpsc::UnboundedReceiver<Result<SseFrame, StreamError>>;

/// Stream source whose frames are pushed by the test.
#[derive(Default)]
pub struct ScriptedSource {
    senders: Mutex<HashMap<String, FrameSender>>,
    receivers: Mutex<HashMap<String, FrameReceiver>>,
    created: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create the channel pair for `task_id` once. A closed channel is never
    /// recreated, so frames buffered before `open` survive a `close`.
    fn ensure(&self, task_id: &str) {
        if !self.created.lock().unwrap().insert(task_id.to_string()) {
            return;
        }
        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().unwrap().insert(task_id.to_string(), tx);
        self.receivers
            .lock()
            .unwrap()
            .insert(task_id.to_string(), rx);
    }

    fn send(&self, task_id: &str, item: Result<SseFrame, StreamError>) {
        self.ensure(task_id);
        if let Some(tx) = self.senders.lock().unwrap().get(task_id) {
            let _ = tx.unbounded_send(item);
        }
    }

    pub fn push(&self, task_id: &str, frame: SseFrame) {
        self.send(task_id, Ok(frame));
    }

    pub fn push_error(&self, task_id: &str, error: StreamError) {
        self.send(task_id, Err(error));
    }

    /// End the stream as a server disconnect would.
    pub fn close(&self, task_id: &str) {
        self.ensure(task_id);
        self.senders.lock().unwrap().remove(task_id);
    }

    /// Make the next `open` for `task_id` fail.
    pub fn fail_open(&self, task_id: &str) {
        self.failing.lock().unwrap().insert(task_id.to_string());
    }

    pub fn open_count(&self, task_id: &str) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == task_id)
            .count()
    }
}

#[async_trait]
impl TaskStreamSource for ScriptedSource {
    async fn open(&self, task_id: &str) -> Result<FrameStream, StreamError> {
        self.opened.lock().unwrap().push(task_id.to_string());
        if self.failing.lock().unwrap().remove(task_id) {
            return Err(StreamError::Connection("connection refused".into()));
        }
        self.ensure(task_id);
        let receiver = self
            .receivers
            .lock()
            .unwrap()
            .remove(task_id)
            .ok_or_else(|| StreamError::Connection("stream already opened".into()))?;
        Ok(receiver.boxed())
    }
}

// ---------------------------------------------------------------------------
// Recording observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Progress(ProgressData),
    Complete(TaskResult),
    Error(TaskFailure),
}

pub struct RecordingObserver {
    tx: tokio_mpsc::UnboundedSender<Observed>,
}

impl RecordingObserver {
    pub fn new() -> (Arc<Self>, tokio_mpsc::UnboundedReceiver<Observed>) {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl TaskObserver for RecordingObserver {
    async fn on_progress(&self, progress: ProgressData) {
        let _ = self.tx.send(Observed::Progress(progress));
    }
    async fn on_complete(&self, result: TaskResult) {
        let _ = self.tx.send(Observed::Complete(result));
    }
    async fn on_error(&self, failure: TaskFailure) {
        let _ = self.tx.send(Observed::Error(failure));
    }
}

/// Title annotator that records what it was asked to show.
#[derive(Default)]
pub struct RecordingTitle {
    titles: Mutex<Vec<String>>,
    resets: AtomicUsize,
}

impl RecordingTitle {
    pub fn last(&self) -> Option<String> {
        self.titles.lock().unwrap().last().cloned()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl TitleAnnotator for RecordingTitle {
    fn annotate(&self, text: &str) {
        self.titles.lock().unwrap().push(text.to_string());
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

pub async fn next_observed(rx: &mut tokio_mpsc::UnboundedReceiver<Observed>) -> Observed {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("observer channel closed")
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Mock API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    ListWorkflows,
    Generate(GenerateBody),
    Regenerate { uid: String, fields: Vec<String> },
    Upload(FilePart),
    FetchMedia(String),
    FetchBytes(String),
}

#[derive(Debug, Clone, Copy)]
pub enum SubmitFailure {
    Status(u16),
    MissingTaskId,
}

/// In-memory backend recording every call.
#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<ApiCall>>,
    workflows: Mutex<Vec<Workflow>>,
    task_ids: Mutex<VecDeque<TaskId>>,
    submit_failure: Mutex<Option<SubmitFailure>>,
    media: Mutex<HashMap<String, HistoryEntry>>,
    bytes: Mutex<HashMap<String, Vec<u8>>>,
    counter: Mutex<u32>,
    fetch_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn generate_bodies(&self) -> Vec<GenerateBody> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Generate(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    pub fn set_workflows(&self, workflows: Vec<Workflow>) {
        *self.workflows.lock().unwrap() = workflows;
    }

    /// Queue the task id returned by the next submission.
    pub fn queue_task_id(&self, task_id: &str) {
        self.task_ids.lock().unwrap().push_back(task_id.to_string());
    }

    pub fn fail_submissions(&self, failure: SubmitFailure) {
        *self.submit_failure.lock().unwrap() = Some(failure);
    }

    pub fn add_media(&self, entry: HistoryEntry) {
        self.media.lock().unwrap().insert(entry.uid.clone(), entry);
    }

    pub fn add_bytes(&self, url: &str, bytes: Vec<u8>) {
        self.bytes.lock().unwrap().insert(url.to_string(), bytes);
    }

    /// Block `fetch_media` until the returned semaphore is given a permit
    /// per call.
    pub fn hold_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.fetch_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_task_id(&self) -> Result<TaskId, ApiError> {
        match *self.submit_failure.lock().unwrap() {
            Some(SubmitFailure::Status(status)) => {
                return Err(ApiError::Status {
                    status,
                    body: "mock failure".into(),
                })
            }
            Some(SubmitFailure::MissingTaskId) => return Err(ApiError::MissingTaskId),
            None => {}
        }
        if let Some(task_id) = self.task_ids.lock().unwrap().pop_front() {
            return Ok(task_id);
        }
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        Ok(format!("task-{counter}"))
    }
}

fn not_found() -> ApiError {
    ApiError::Status {
        status: 404,
        body: "not found".into(),
    }
}

#[async_trait]
impl GenerationApi for MockApi {
    async fn list_workflows(&self) -> Result<Vec<Workflow>, ApiError> {
        self.record(ApiCall::ListWorkflows);
        Ok(self.workflows.lock().unwrap().clone())
    }

    async fn submit_generate(&self, body: GenerateBody) -> Result<TaskId, ApiError> {
        self.record(ApiCall::Generate(body));
        self.next_task_id()
    }

    async fn submit_regenerate(&self, uid: &str, fields: &[String]) -> Result<TaskId, ApiError> {
        self.record(ApiCall::Regenerate {
            uid: uid.to_string(),
            fields: fields.to_vec(),
        });
        self.next_task_id()
    }

    async fn upload_media(&self, file: FilePart) -> Result<TaskId, ApiError> {
        self.record(ApiCall::Upload(file));
        self.next_task_id()
    }

    async fn fetch_media(&self, uid: &str) -> Result<HistoryEntry, ApiError> {
        self.record(ApiCall::FetchMedia(uid.to_string()));
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("fetch gate closed").forget();
        }
        self.media
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.record(ApiCall::FetchBytes(url.to_string()));
        self.bytes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(not_found)
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::new(width, height)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}
