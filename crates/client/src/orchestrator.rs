//! Generation orchestrator.
//!
//! [`GenerationOrchestrator`] turns a user action into a backend job and
//! reconciles the job's outcome into the caller's [`ResultState`]:
//!
//! 1. validate the session (no network on failure)
//! 2. apply the seed policy
//! 3. fetch bytes for remote slots
//! 4. resolve orientation (decodes the first local image only when the
//!    workflow detects it)
//! 5. build the JSON or multipart body and submit it
//! 6. subscribe a channel whose observer drives a [`ProgressPresenter`],
//!    fetches the finished record and merges it into history
//!
//! Each [`TaskRole`] may have one task in flight; a second request for a
//! busy role is refused with [`GenerateError::RoleBusy`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mediagen_core::error::CoreError;
use mediagen_core::history::{HistoryEntry, ResultState};
use mediagen_core::orientation::detect_orientation;
use mediagen_core::request::{build_generate_body, FilePart, ResolvedMedia};
use mediagen_core::seed::apply_seed_policy;
use mediagen_core::session::GenerationSession;
use mediagen_core::slots::{MediaSlot, MediaSlotModel};
use mediagen_core::task::{Task, TaskRole};
use mediagen_core::types::{MediaKind, TaskId};
use mediagen_core::validation::{validate_session, ValidationError};
use mediagen_core::workflow::{Orientation, Workflow};
use tokio::sync::{broadcast, RwLock};

use crate::api::{ApiError, GenerationApi};
use crate::events::{OrchestratorEvent, EVENT_CHANNEL_CAPACITY};
use crate::messages::{ProgressData, TaskFailure, TaskResult};
use crate::presenter::{PresenterHooks, PresenterOptions, ProgressPresenter, TitleAnnotator};
use crate::registry::{TaskChannelRegistry, TaskObserver};

/// Multipart field name for standalone uploads.
pub const UPLOAD_FIELD: &str = "file";

/// Errors that stop an action before its task is observed.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("A {0} task is already in progress")]
    RoleBusy(TaskRole),

    /// A remote slot's bytes could not be fetched; nothing was submitted.
    #[error("Failed to fetch {kind} {index}: {source}")]
    RemoteMedia {
        kind: MediaKind,
        index: usize,
        source: ApiError,
    },

    #[error("Failed to detect orientation: {0}")]
    Orientation(#[source] CoreError),

    #[error("Submission failed: {0}")]
    Submit(#[source] ApiError),

    #[error("Task {0} is already being observed")]
    AlreadyObserved(TaskId),
}

impl GenerateError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            GenerateError::RemoteMedia {
                kind,
                index,
                source,
            } => format!(
                "Could not load {kind} {}: {}",
                index + 1,
                source.user_message()
            ),
            GenerateError::Orientation(_) => {
                "Could not read the first image to detect its orientation.".to_string()
            }
            GenerateError::Submit(source) => source.user_message(),
            other => other.to_string(),
        }
    }
}

/// What the caller gets back once a task is submitted and observed.
#[derive(Clone)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub role: TaskRole,
    pub presenter: ProgressPresenter,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("role", &self.role)
            .field("phase", &self.presenter.snapshot().phase)
            .finish()
    }
}

/// Coordinates submissions, task channels and result reconciliation.
pub struct GenerationOrchestrator {
    api: Arc<dyn GenerationApi>,
    registry: Arc<TaskChannelRegistry>,
    title: Arc<dyn TitleAnnotator>,
    role_titles: HashMap<TaskRole, Arc<dyn TitleAnnotator>>,
    presenter_options: PresenterOptions,
    shared: Arc<Shared>,
}

/// State shared with channel observers.
struct Shared {
    results: RwLock<ResultState>,
    roles: Mutex<HashMap<TaskRole, RoleState>>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

enum RoleState {
    /// Reserved while the submission is in flight.
    Submitting,
    Observing(ActiveTask),
}

struct ActiveTask {
    task: Task,
    presenter: ProgressPresenter,
}

impl GenerationOrchestrator {
    pub fn new(
        api: Arc<dyn GenerationApi>,
        registry: Arc<TaskChannelRegistry>,
        title: Arc<dyn TitleAnnotator>,
    ) -> Self {
        Self::with_presenter_options(api, registry, title, PresenterOptions::default())
    }

    pub fn with_presenter_options(
        api: Arc<dyn GenerationApi>,
        registry: Arc<TaskChannelRegistry>,
        title: Arc<dyn TitleAnnotator>,
        presenter_options: PresenterOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            registry,
            title,
            role_titles: HashMap::new(),
            presenter_options,
            shared: Arc::new(Shared {
                results: RwLock::new(ResultState::default()),
                roles: Mutex::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    /// Route `role`'s presenters to their own title annotator. Roles without
    /// one share the annotator given at construction, so a task settling in
    /// one role resets the title another role is mirroring.
    pub fn with_role_title(mut self, role: TaskRole, title: Arc<dyn TitleAnnotator>) -> Self {
        self.role_titles.insert(role, title);
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.shared.event_tx.subscribe()
    }

    pub async fn workflows(&self) -> Result<Vec<Workflow>, ApiError> {
        self.api.list_workflows().await
    }

    /// Snapshot of the current result and history.
    pub async fn results(&self) -> ResultState {
        self.shared.results.read().await.clone()
    }

    /// Append a loaded gallery page to history. Entries whose uid is already
    /// present are skipped.
    pub async fn load_gallery(&self, page: Vec<HistoryEntry>) {
        self.shared.results.write().await.load_gallery(page);
    }

    pub fn active_task(&self, role: TaskRole) -> Option<Task> {
        match self.shared.lock_roles().get(&role) {
            Some(RoleState::Observing(active)) => Some(active.task.clone()),
            _ => None,
        }
    }

    pub fn is_busy(&self, role: TaskRole) -> bool {
        self.shared.lock_roles().contains_key(&role)
    }

    /// Validate, assemble and submit the session's request, then observe
    /// the resulting task.
    ///
    /// On validation failure nothing is sent. On a remote fetch or
    /// submission failure no task is created and result state is kept.
    pub async fn generate(
        &self,
        session: &mut GenerationSession,
    ) -> Result<TaskHandle, GenerateError> {
        let reservation = self.shared.reserve(TaskRole::Generate)?;

        let workflow = validate_session(session)?.clone();
        let seed = apply_seed_policy(&mut session.form);
        let media = self.resolve_media(&session.media).await?;
        let orientation = self.resolve_orientation(&workflow, &session.media).await?;

        let body = build_generate_body(&workflow, &session.form, orientation, media);
        tracing::info!(
            workflow = %workflow.name,
            seed,
            orientation = orientation.as_str(),
            multipart = body.is_multipart(),
            "Submitting generation",
        );
        let task_id = self
            .api
            .submit_generate(body)
            .await
            .map_err(GenerateError::Submit)?;

        self.observe(reservation, task_id).await
    }

    /// Ask the backend to regenerate `fields` of an existing record.
    pub async fn regenerate(
        &self,
        uid: &str,
        fields: Vec<String>,
    ) -> Result<TaskHandle, GenerateError> {
        let reservation = self.shared.reserve(TaskRole::Regenerate)?;
        if fields.is_empty() {
            return Err(ValidationError::NoFieldsSelected.into());
        }

        tracing::info!(uid, fields = ?fields, "Submitting regeneration");
        let task_id = self
            .api
            .submit_regenerate(uid, &fields)
            .await
            .map_err(GenerateError::Submit)?;

        self.observe(reservation, task_id).await
    }

    /// Ingest a standalone media file. Its record lands in history like a
    /// generated one.
    pub async fn upload_media(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<TaskHandle, GenerateError> {
        let reservation = self.shared.reserve(TaskRole::Upload)?;

        tracing::info!(file_name, size = bytes.len(), "Submitting upload");
        let task_id = self
            .api
            .upload_media(FilePart::new(UPLOAD_FIELD, file_name, bytes))
            .await
            .map_err(GenerateError::Submit)?;

        self.observe(reservation, task_id).await
    }

    /// Stop observing the task of `role`. The backend job is not
    /// cancelled. Returns `false` when the role had no observed task.
    pub async fn detach(&self, role: TaskRole) -> bool {
        let active = {
            let mut roles = self.shared.lock_roles();
            match roles.remove(&role) {
                Some(RoleState::Observing(active)) => active,
                Some(RoleState::Submitting) => {
                    roles.insert(role, RoleState::Submitting);
                    return false;
                }
                None => return false,
            }
        };

        self.registry.unsubscribe(&active.task.id).await;
        active.presenter.dismiss();
        tracing::info!(role = %role, task_id = %active.task.id, "Detached from task");
        true
    }

    // ---- private helpers ----

    /// Bytes for every occupied slot, images first. Remote slots are
    /// fetched in order; the first failure aborts.
    async fn resolve_media(
        &self,
        media: &MediaSlotModel,
    ) -> Result<Vec<ResolvedMedia>, GenerateError> {
        let mut resolved = Vec::new();
        for kind in [MediaKind::Image, MediaKind::Audio] {
            for (index, slot) in media.slots(kind).iter() {
                match slot {
                    MediaSlot::Empty => {}
                    MediaSlot::LocalFile(local) => {
                        resolved.push(ResolvedMedia::from_local(kind, index, local));
                    }
                    MediaSlot::RemoteReference(remote) => {
                        let bytes = self.api.fetch_bytes(&remote.url).await.map_err(|source| {
                            tracing::warn!(
                                kind = %kind,
                                index,
                                url = %remote.url,
                                error = %source,
                                "Failed to fetch remote slot",
                            );
                            GenerateError::RemoteMedia {
                                kind,
                                index,
                                source,
                            }
                        })?;
                        resolved.push(ResolvedMedia::from_remote(kind, index, remote, bytes));
                    }
                }
            }
        }
        Ok(resolved)
    }

    async fn resolve_orientation(
        &self,
        workflow: &Workflow,
        media: &MediaSlotModel,
    ) -> Result<Orientation, GenerateError> {
        if !workflow.detects_orientation() {
            return Ok(workflow.orientation);
        }
        let Some((_, local)) = media.images().first_local() else {
            return Err(ValidationError::LocalImageRequired.into());
        };

        let bytes = local.bytes.clone();
        let orientation = tokio::task::spawn_blocking(move || detect_orientation(&bytes))
            .await
            .map_err(|e| GenerateError::Orientation(CoreError::Internal(e.to_string())))?
            .map_err(GenerateError::Orientation)?;
        tracing::debug!(orientation = orientation.as_str(), "Detected orientation");
        Ok(orientation)
    }

    /// Mount a presenter for the new task, record it as the role's active
    /// task and subscribe its channel.
    async fn observe(
        &self,
        reservation: RoleReservation,
        task_id: TaskId,
    ) -> Result<TaskHandle, GenerateError> {
        let role = reservation.role;
        let title = self
            .role_titles
            .get(&role)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.title));
        let presenter = ProgressPresenter::mount_with(
            title,
            PresenterHooks::default(),
            self.presenter_options.clone(),
        );
        reservation.commit(ActiveTask {
            task: Task::new(task_id.clone(), role),
            presenter: presenter.clone(),
        });
        self.shared.emit(OrchestratorEvent::TaskStarted {
            role,
            task_id: task_id.clone(),
        });

        let observer = Arc::new(ReconcilingObserver {
            role,
            task_id: task_id.clone(),
            presenter: presenter.clone(),
            api: Arc::clone(&self.api),
            shared: Arc::clone(&self.shared),
        });

        if !self.registry.subscribe(&task_id, observer).await {
            self.shared.clear_role(role, &task_id);
            presenter.dismiss();
            let error = GenerateError::AlreadyObserved(task_id.clone());
            self.shared.emit(OrchestratorEvent::TaskFailed {
                role,
                task_id,
                error: error.to_string(),
            });
            return Err(error);
        }

        Ok(TaskHandle {
            task_id,
            role,
            presenter,
        })
    }
}

impl Shared {
    fn lock_roles(&self) -> MutexGuard<'_, HashMap<TaskRole, RoleState>> {
        self.roles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(self: &Arc<Self>, role: TaskRole) -> Result<RoleReservation, GenerateError> {
        let mut roles = self.lock_roles();
        if roles.contains_key(&role) {
            tracing::warn!(role = %role, "Role busy, refusing new task");
            return Err(GenerateError::RoleBusy(role));
        }
        roles.insert(role, RoleState::Submitting);
        Ok(RoleReservation {
            shared: Arc::clone(self),
            role,
            committed: false,
        })
    }

    fn holds(&self, role: TaskRole, task_id: &str) -> bool {
        matches!(
            self.lock_roles().get(&role),
            Some(RoleState::Observing(active)) if active.task.id == task_id
        )
    }

    /// Release `role` if it is still held by `task_id`.
    fn clear_role(&self, role: TaskRole, task_id: &str) {
        let mut roles = self.lock_roles();
        let held = matches!(
            roles.get(&role),
            Some(RoleState::Observing(active)) if active.task.id == task_id
        );
        if held {
            roles.remove(&role);
        }
    }

    fn update_task(&self, role: TaskRole, task_id: &str, update: impl FnOnce(&mut Task)) {
        if let Some(RoleState::Observing(active)) = self.lock_roles().get_mut(&role) {
            if active.task.id == task_id {
                update(&mut active.task);
            }
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Holds a role while its submission is in flight. Dropped without
/// [`commit`](Self::commit), it frees the role again.
struct RoleReservation {
    shared: Arc<Shared>,
    role: TaskRole,
    committed: bool,
}

impl RoleReservation {
    fn commit(mut self, active: ActiveTask) {
        self.shared
            .lock_roles()
            .insert(self.role, RoleState::Observing(active));
        self.committed = true;
    }
}

impl Drop for RoleReservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut roles = self.shared.lock_roles();
        if matches!(roles.get(&self.role), Some(RoleState::Submitting)) {
            roles.remove(&self.role);
        }
    }
}

/// Channel observer for one orchestrated task.
struct ReconcilingObserver {
    role: TaskRole,
    task_id: TaskId,
    presenter: ProgressPresenter,
    api: Arc<dyn GenerationApi>,
    shared: Arc<Shared>,
}

impl ReconcilingObserver {
    async fn merge(&self, entry: HistoryEntry) {
        let mut results = self.shared.results.write().await;
        match self.role {
            TaskRole::Generate | TaskRole::Upload => results.accept_generated(entry),
            TaskRole::Regenerate => results.accept_regenerated(entry),
        }
    }

    fn fail(&self, error: String) {
        self.shared
            .update_task(self.role, &self.task_id, |task| task.fail(error.clone()));
        self.shared.emit(OrchestratorEvent::TaskFailed {
            role: self.role,
            task_id: self.task_id.clone(),
            error,
        });
    }
}

#[async_trait]
impl TaskObserver for ReconcilingObserver {
    async fn on_progress(&self, progress: ProgressData) {
        self.presenter.handle_progress(&progress);
        let snapshot = self.presenter.snapshot();
        let message = snapshot.display_message();
        self.shared.update_task(self.role, &self.task_id, |task| {
            task.record_progress(progress.percentage, message.clone())
        });
        self.shared.emit(OrchestratorEvent::TaskProgress {
            role: self.role,
            task_id: self.task_id.clone(),
            percentage: snapshot.percentage,
            message,
        });
    }

    async fn on_complete(&self, result: TaskResult) {
        self.presenter.handle_complete(&result);

        let fetched = self.api.fetch_media(&result.uid).await;
        if !self.shared.holds(self.role, &self.task_id) {
            tracing::info!(
                role = %self.role,
                task_id = %self.task_id,
                uid = %result.uid,
                "Task detached while its record loaded, discarding",
            );
            return;
        }

        match fetched {
            Ok(entry) => {
                self.merge(entry.clone()).await;
                self.shared
                    .update_task(self.role, &self.task_id, Task::complete);
                tracing::info!(
                    role = %self.role,
                    task_id = %self.task_id,
                    uid = %entry.uid,
                    "Result merged into history",
                );
                self.shared.emit(OrchestratorEvent::ResultReady {
                    role: self.role,
                    task_id: self.task_id.clone(),
                    entry,
                });
            }
            Err(e) => {
                tracing::error!(
                    task_id = %self.task_id,
                    uid = %result.uid,
                    error = %e,
                    "Failed to load completed record",
                );
                self.fail(format!(
                    "The result could not be loaded: {}",
                    e.user_message()
                ));
            }
        }

        self.shared.clear_role(self.role, &self.task_id);
    }

    async fn on_error(&self, failure: TaskFailure) {
        self.presenter.handle_error(&failure);
        self.fail(failure.to_string());
        self.shared.clear_role(self.role, &self.task_id);
    }
}
