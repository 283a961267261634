use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use texproject_core::{EntityType, UploadedEntity};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;

use super::acceptable::{AcceptancePolicy, DefaultAcceptancePolicy};
use super::conflict::{ConflictSet, detect};
use super::effects::{
    MetadataRefresher, NoopEffects, Telemetry, TelemetryEvent, TracingTelemetry,
};
use super::plan::{
    AdmissionError, BatchReport, BatchState, GENERIC_ERROR, PendingFile, ResolveError,
    UploadError, UploadOutcome, UploadPlan,
};
use super::snapshot::{FileTreeSnapshot, FolderId};
use super::transport::{Transport, TransportFailure, UploadRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Overwrite,
    Cancel,
}

/// Result of admitting a set of files into the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub accepted: usize,
    /// Files dropped by the acceptance policy.
    pub filtered: usize,
    pub state: BatchState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    FileSent { index: usize },
    FileSucceeded { index: usize, entity: UploadedEntity },
    FileFailed { index: usize, error: UploadError },
    Finished(BatchReport),
}

enum DispatchMessage {
    Sent(usize),
    Finished(usize, Result<UploadedEntity, TransportFailure>),
    /// No further files will be sent.
    Closed,
}

/// Owns one upload batch from admission to completion.
///
/// `admit`, `start` and `resolve` spawn onto the current tokio runtime once a
/// batch starts uploading. Dropping the coordinator stops further sends;
/// requests already in flight run to completion and their results are ignored.
pub struct UploadCoordinator {
    config: UploadConfig,
    default_folder: FolderId,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn AcceptancePolicy>,
    telemetry: Arc<dyn Telemetry>,
    refresher: Arc<dyn MetadataRefresher>,
    plan: UploadPlan,
    auto_start: bool,
    cancel: CancellationToken,
    outcomes: Option<mpsc::UnboundedReceiver<DispatchMessage>>,
    dispatch_closed: bool,
    pending: VecDeque<UploadEvent>,
}

impl UploadCoordinator {
    pub fn new(
        config: UploadConfig,
        transport: Arc<dyn Transport>,
        default_folder: FolderId,
    ) -> Self {
        let auto_start = config.auto_start;
        Self {
            config,
            default_folder,
            transport,
            policy: Arc::new(DefaultAcceptancePolicy),
            telemetry: Arc::new(TracingTelemetry),
            refresher: Arc::new(NoopEffects),
            plan: UploadPlan::new(),
            auto_start,
            cancel: CancellationToken::new(),
            outcomes: None,
            dispatch_closed: false,
            pending: VecDeque::new(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AcceptancePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_metadata_refresher(mut self, refresher: Arc<dyn MetadataRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    pub fn state(&self) -> BatchState {
        self.plan.state()
    }

    pub fn files(&self) -> &[PendingFile] {
        self.plan.files()
    }

    pub fn conflicts(&self) -> &ConflictSet {
        self.plan.conflicts()
    }

    pub fn current_error(&self) -> Option<&UploadError> {
        self.plan.current_error()
    }

    pub fn report(&self) -> BatchReport {
        self.plan.report()
    }

    /// Adds files to the batch, enforcing the count and size limits on the whole set.
    ///
    /// With auto-start enabled the first admitted set starts uploading right
    /// away; anything added later waits for [`start`](Self::start).
    pub fn admit(
        &mut self,
        files: Vec<PendingFile>,
        snapshot: &dyn FileTreeSnapshot,
    ) -> Result<Admission, AdmissionError> {
        self.ensure_admitting()?;

        let offered = files.len();
        let files: Vec<PendingFile> = files
            .into_iter()
            .filter(|file| {
                self.policy
                    .is_acceptable(&file.name, file.relative_path.as_deref())
            })
            .collect();
        let filtered = offered - files.len();

        let attempted = self.plan.files().len() + files.len();
        if attempted > self.config.max_number_of_files {
            warn!(
                attempted,
                max = self.config.max_number_of_files,
                "rejecting files: too many"
            );
            return Err(AdmissionError::TooManyFiles {
                max: self.config.max_number_of_files,
                attempted,
            });
        }
        if let Some(max) = self.config.max_file_size
            && let Some(file) = files.iter().find(|file| file.size_bytes > max)
        {
            warn!(name = %file.name, size = file.size_bytes, max, "rejecting files: too large");
            return Err(AdmissionError::FileTooLarge {
                name: file.name.clone(),
                size: file.size_bytes,
                max,
            });
        }

        let accepted = files.len();
        self.plan.push_files(files);
        debug!(accepted, filtered, total = self.plan.files().len(), "files admitted");

        let state = if self.auto_start && accepted > 0 {
            self.auto_start = false;
            self.start(snapshot)?
        } else {
            self.plan.state()
        };
        Ok(Admission {
            accepted,
            filtered,
            state,
        })
    }

    /// Checks for conflicts and, if there are none, submits every file.
    pub fn start(
        &mut self,
        snapshot: &dyn FileTreeSnapshot,
    ) -> Result<BatchState, AdmissionError> {
        self.ensure_admitting()?;
        self.auto_start = false;
        if self.plan.files().is_empty() {
            return Err(AdmissionError::EmptyBatch);
        }

        if !self.plan.overwrite() {
            let conflicts = detect(self.plan.files(), snapshot, &self.default_folder);
            if !conflicts.is_empty() {
                info!(conflicts = conflicts.len(), "upload waiting for conflict resolution");
                self.plan.await_resolution(conflicts);
                return Ok(self.plan.state());
            }
        }

        self.dispatch();
        Ok(self.plan.state())
    }

    pub fn resolve(&mut self, decision: ConflictDecision) -> Result<BatchState, ResolveError> {
        let state = self.plan.state();
        if state != BatchState::AwaitingConflictResolution {
            return Err(ResolveError::NotAwaitingResolution(state));
        }

        match decision {
            ConflictDecision::Cancel => {
                info!("upload cancelled at conflict prompt");
                self.cancel.cancel();
                self.plan.cancel();
            }
            ConflictDecision::Overwrite => {
                info!("overwriting conflicting entries");
                self.plan.set_overwrite();
                self.dispatch();
            }
        }
        Ok(self.plan.state())
    }

    /// Waits for the next change in the uploading batch.
    ///
    /// Returns `None` once the batch is no longer uploading and every event
    /// has been handed out.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.plan.state() != BatchState::Uploading {
                return None;
            }

            let message = match self.outcomes.as_mut() {
                Some(outcomes) => outcomes.recv().await,
                None => None,
            };
            match message {
                Some(message) => self.apply(message),
                None => {
                    // Every sender is gone, so nothing in flight can report back.
                    self.dispatch_closed = true;
                    self.plan
                        .fail_in_flight(UploadError::ServerError(GENERIC_ERROR.to_string()));
                }
            }
            self.settle();
        }
    }

    pub async fn run_to_completion(&mut self) -> BatchReport {
        while self.next_event().await.is_some() {}
        self.plan.report()
    }

    /// Forgets a finished batch so the coordinator can take a new one.
    pub fn clear(&mut self) -> Result<(), AdmissionError> {
        let state = self.plan.state();
        if state.is_active() {
            return Err(AdmissionError::BatchInProgress(state));
        }
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.plan = UploadPlan::new();
        self.outcomes = None;
        self.dispatch_closed = false;
        self.pending.clear();
        Ok(())
    }

    /// Tears the batch down; nothing new is sent afterwards.
    pub fn discard(self) {}

    fn ensure_admitting(&self) -> Result<(), AdmissionError> {
        match self.plan.state() {
            BatchState::Admitting => Ok(()),
            state if state.is_active() => Err(AdmissionError::BatchInProgress(state)),
            state => Err(AdmissionError::AlreadyFinished(state)),
        }
    }

    fn dispatch(&mut self) {
        self.plan.begin_upload();
        self.dispatch_closed = false;

        let requests: Vec<UploadRequest> = self
            .plan
            .files()
            .iter()
            .map(|file| UploadRequest {
                name: file.name.clone(),
                relative_path: file.relative_path.clone(),
                folder_id: file.effective_folder(&self.default_folder).clone(),
                content: file.content.clone(),
            })
            .collect();
        info!(
            files = requests.len(),
            concurrency = self.config.concurrency_limit.max(1),
            overwrite = self.plan.overwrite(),
            "upload batch started"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes = Some(rx);
        let limit = Arc::new(Semaphore::new(self.config.concurrency_limit.max(1)));
        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            for (index, request) in requests.into_iter().enumerate() {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = Arc::clone(&limit).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                if cancel.is_cancelled() || tx.send(DispatchMessage::Sent(index)).is_err() {
                    break;
                }

                let transport = Arc::clone(&transport);
                let cancel = cancel.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = transport.upload(request).await;
                    if let Err(failure) = &result
                        && failure.aborts_batch()
                    {
                        cancel.cancel();
                    }
                    let _ = tx.send(DispatchMessage::Finished(index, result));
                    drop(permit);
                });
            }
            let _ = tx.send(DispatchMessage::Closed);
        });
    }

    fn apply(&mut self, message: DispatchMessage) {
        match message {
            DispatchMessage::Sent(index) => {
                if self.plan.mark_sent(index) {
                    debug!(index, "file sent");
                    self.pending.push_back(UploadEvent::FileSent { index });
                }
            }
            DispatchMessage::Finished(index, Ok(entity)) => {
                if self.plan.record_outcome(index, UploadOutcome::from(entity.clone())) {
                    self.on_success(index, &entity);
                    self.pending
                        .push_back(UploadEvent::FileSucceeded { index, entity });
                }
            }
            DispatchMessage::Finished(index, Err(failure)) => {
                let error = failure.to_upload_error();
                warn!(index, %failure, %error, "file upload failed");
                if failure.aborts_batch() {
                    self.cancel.cancel();
                }
                if self.plan.record_outcome(
                    index,
                    UploadOutcome::Failure {
                        reason: error.clone(),
                    },
                ) {
                    self.pending.push_back(UploadEvent::FileFailed { index, error });
                }
            }
            DispatchMessage::Closed => self.dispatch_closed = true,
        }
    }

    fn on_success(&self, index: usize, entity: &UploadedEntity) {
        let Some(file) = self.plan.files().get(index) else {
            return;
        };
        debug!(index, name = %file.name, entity_id = %entity.entity_id, "file uploaded");
        self.telemetry
            .record(TelemetryEvent::file_uploaded(file.extension()));

        if entity.entity_type == EntityType::Doc {
            schedule_metadata_refresh(
                Arc::clone(&self.refresher),
                entity.entity_id.clone(),
                self.config.metadata_refresh_delay,
            );
        }
    }

    fn settle(&mut self) {
        if let Some(state) = self.plan.finish_if_settled(self.dispatch_closed) {
            let report = self.plan.report();
            info!(
                %state,
                succeeded = report.succeeded(),
                failed = report.failed(),
                "upload batch finished"
            );
            self.outcomes = None;
            self.pending.push_back(UploadEvent::Finished(report));
        }
    }
}

impl Drop for UploadCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// Gives the server time to settle before it re-reads the new doc.
fn schedule_metadata_refresh(
    refresher: Arc<dyn MetadataRefresher>,
    entity_id: String,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        refresher.refresh(entity_id).await;
    });
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
