use std::fmt;
use std::path::PathBuf;

use texproject_core::{EntityType, UploadedEntity};
use thiserror::Error;
use tracing::{debug, warn};

pub use texproject_core::UploadContent as ContentHandle;

use super::conflict::ConflictSet;
use super::snapshot::FolderId;

/// Fallback message when a failed upload carries no server-provided reason.
pub const GENERIC_ERROR: &str = "generic_something_went_wrong";

/// One file selected or dropped by the user, waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub name: String,
    /// Set only for files dropped as part of a folder; the first segment is the folder root.
    pub relative_path: Option<String>,
    pub target_folder_id: Option<FolderId>,
    pub size_bytes: u64,
    pub content: ContentHandle,
}

impl PendingFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            relative_path: None,
            target_folder_id: None,
            size_bytes: bytes.len() as u64,
            content: ContentHandle::Bytes(bytes),
        }
    }

    pub fn from_path(name: impl Into<String>, path: PathBuf, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            relative_path: None,
            target_folder_id: None,
            size_bytes,
            content: ContentHandle::Path(path),
        }
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    pub fn with_target_folder(mut self, folder_id: FolderId) -> Self {
        self.target_folder_id = Some(folder_id);
        self
    }

    pub fn effective_folder<'a>(&'a self, default: &'a FolderId) -> &'a FolderId {
        self.target_folder_id.as_ref().unwrap_or(default)
    }

    /// First segment of the relative path, ignoring one leading `/`.
    ///
    /// An empty path or root segment means the file was not part of a folder.
    pub fn root_segment(&self) -> Option<&str> {
        let path = self.relative_path.as_deref()?;
        let path = path.strip_prefix('/').unwrap_or(path);
        path.split('/').next().filter(|root| !root.is_empty())
    }

    /// Text after the last `.`, or empty when the name has no `.` at all.
    pub fn extension(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Admitting,
    AwaitingConflictResolution,
    Uploading,
    Completed,
    FinishedWithErrors,
    Aborted,
}

impl BatchState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::AwaitingConflictResolution | Self::Uploading)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Admitting => "admitting",
            Self::AwaitingConflictResolution => "awaiting conflict resolution",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::FinishedWithErrors => "finished with errors",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("too many files: {attempted} exceeds the limit of {max}")]
    TooManyFiles { max: usize, attempted: usize },
    #[error("{name} is {size} bytes, over the {max} byte limit")]
    FileTooLarge { name: String, size: u64, max: u64 },
    #[error("an upload batch is already {0}")]
    BatchInProgress(BatchState),
    #[error("upload batch already {0}; clear it before adding files")]
    AlreadyFinished(BatchState),
    #[error("no files to upload")]
    EmptyBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("upload batch is {0}, not awaiting conflict resolution")]
    NotAwaitingResolution(BatchState),
}

/// Why a single file failed. The display strings are the editor's message keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("rate-limit-hit")]
    RateLimited,
    #[error("not-logged-in")]
    NotAuthenticated,
    #[error("{0}")]
    ServerError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success {
        entity_id: String,
        entity_type: EntityType,
    },
    Failure {
        reason: UploadError,
    },
}

impl From<UploadedEntity> for UploadOutcome {
    fn from(entity: UploadedEntity) -> Self {
        Self::Success {
            entity_id: entity.entity_id,
            entity_type: entity.entity_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Queued,
    Sent,
    Done(UploadOutcome),
    /// Never sent because the batch was aborted first.
    Skipped,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub name: String,
    pub relative_path: Option<String>,
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub state: BatchState,
    pub files: Vec<FileReport>,
    pub current_error: Option<UploadError>,
    /// Every file succeeded, or the user cancelled: the upload surface should be dismissed.
    pub close_requested: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Done(UploadOutcome::Success { .. })))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Done(UploadOutcome::Failure { .. })))
            .count()
    }
}

/// Mutable state of one upload batch.
#[derive(Debug)]
pub struct UploadPlan {
    files: Vec<PendingFile>,
    statuses: Vec<FileStatus>,
    conflicts: ConflictSet,
    overwrite: bool,
    state: BatchState,
    current_error: Option<UploadError>,
    close_requested: bool,
}

impl Default for UploadPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadPlan {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            statuses: Vec::new(),
            conflicts: ConflictSet::default(),
            overwrite: false,
            state: BatchState::Admitting,
            current_error: None,
            close_requested: false,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn files(&self) -> &[PendingFile] {
        &self.files
    }

    pub fn status(&self, index: usize) -> Option<&FileStatus> {
        self.statuses.get(index)
    }

    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn current_error(&self) -> Option<&UploadError> {
        self.current_error.as_ref()
    }

    pub fn push_files(&mut self, files: Vec<PendingFile>) {
        debug_assert_eq!(self.state, BatchState::Admitting);
        self.statuses
            .extend(std::iter::repeat_n(FileStatus::Queued, files.len()));
        self.files.extend(files);
    }

    pub fn await_resolution(&mut self, conflicts: ConflictSet) {
        debug!(
            file_conflicts = conflicts.file_conflicts().len(),
            folder_conflicts = conflicts.folder_conflicts().len(),
            "upload batch paused on conflicts"
        );
        self.conflicts = conflicts;
        self.state = BatchState::AwaitingConflictResolution;
    }

    /// Overwrite is sticky for the lifetime of the batch.
    pub fn set_overwrite(&mut self) {
        self.overwrite = true;
    }

    pub fn begin_upload(&mut self) {
        self.conflicts = ConflictSet::default();
        self.state = BatchState::Uploading;
    }

    /// User cancelled: nothing more is uploaded and the surface can be dismissed.
    pub fn cancel(&mut self) {
        for status in self.statuses.iter_mut().filter(|s| !s.is_terminal()) {
            *status = FileStatus::Skipped;
        }
        self.state = BatchState::Aborted;
        self.close_requested = true;
    }

    pub fn mark_sent(&mut self, index: usize) -> bool {
        match self.statuses.get_mut(index) {
            Some(status) if *status == FileStatus::Queued => {
                *status = FileStatus::Sent;
                true
            }
            other => {
                warn!(index, status = ?other, "ignoring send event for file not queued");
                false
            }
        }
    }

    /// Records a terminal outcome for a sent file. Failures replace the current error.
    pub fn record_outcome(&mut self, index: usize, outcome: UploadOutcome) -> bool {
        let Some(status) = self.statuses.get_mut(index) else {
            return false;
        };
        if *status != FileStatus::Sent {
            warn!(index, status = ?status, "ignoring outcome for file not in flight");
            return false;
        }
        if let UploadOutcome::Failure { reason } = &outcome {
            self.current_error = Some(reason.clone());
        }
        *status = FileStatus::Done(outcome);
        true
    }

    /// Fails every file still in flight, used when their outcomes can no longer arrive.
    pub fn fail_in_flight(&mut self, reason: UploadError) {
        let mut failed = false;
        for status in self
            .statuses
            .iter_mut()
            .filter(|s| **s == FileStatus::Sent)
        {
            *status = FileStatus::Done(UploadOutcome::Failure {
                reason: reason.clone(),
            });
            failed = true;
        }
        if failed {
            self.current_error = Some(reason);
        }
    }

    /// Settles the batch once dispatching has stopped and nothing is in flight.
    pub fn finish_if_settled(&mut self, dispatch_closed: bool) -> Option<BatchState> {
        if self.state != BatchState::Uploading {
            return None;
        }
        if self.statuses.contains(&FileStatus::Sent) {
            return None;
        }
        let unsent = self.statuses.contains(&FileStatus::Queued);
        if unsent && !dispatch_closed {
            return None;
        }

        // Only files cut off before sending make the batch aborted.
        if unsent {
            for status in self
                .statuses
                .iter_mut()
                .filter(|s| **s == FileStatus::Queued)
            {
                *status = FileStatus::Skipped;
            }
            self.state = BatchState::Aborted;
        } else if self.current_error.is_some() {
            self.state = BatchState::FinishedWithErrors;
        } else {
            self.state = BatchState::Completed;
            self.close_requested = true;
        }
        Some(self.state)
    }

    pub fn report(&self) -> BatchReport {
        BatchReport {
            state: self.state,
            files: self
                .files
                .iter()
                .zip(&self.statuses)
                .map(|(file, status)| FileReport {
                    name: file.name.clone(),
                    relative_path: file.relative_path.clone(),
                    status: status.clone(),
                })
                .collect(),
            current_error: self.current_error.clone(),
            close_requested: self.close_requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(id: &str) -> UploadOutcome {
        UploadOutcome::Success {
            entity_id: id.to_string(),
            entity_type: EntityType::Doc,
        }
    }

    fn plan_with(names: &[&str]) -> UploadPlan {
        let mut plan = UploadPlan::new();
        plan.push_files(
            names
                .iter()
                .map(|name| PendingFile::from_bytes(*name, b"x".to_vec()))
                .collect(),
        );
        plan.begin_upload();
        plan
    }

    #[test]
    fn extension_follows_last_dot() {
        assert_eq!(PendingFile::from_bytes("main.tex", vec![]).extension(), "tex");
        assert_eq!(
            PendingFile::from_bytes("archive.tar.gz", vec![]).extension(),
            "gz"
        );
        assert_eq!(PendingFile::from_bytes("Makefile", vec![]).extension(), "");
        assert_eq!(PendingFile::from_bytes(".latexmkrc", vec![]).extension(), "latexmkrc");
    }

    #[test]
    fn root_segment_ignores_leading_slash() {
        let plain = PendingFile::from_bytes("a.tex", vec![]).with_relative_path("proj/a.tex");
        let rooted = PendingFile::from_bytes("a.tex", vec![]).with_relative_path("/proj/a.tex");
        let bare = PendingFile::from_bytes("proj", vec![]).with_relative_path("proj");
        assert_eq!(plain.root_segment(), Some("proj"));
        assert_eq!(rooted.root_segment(), Some("proj"));
        assert_eq!(bare.root_segment(), Some("proj"));
        assert_eq!(PendingFile::from_bytes("a.tex", vec![]).root_segment(), None);
        let empty = PendingFile::from_bytes("a.tex", vec![]).with_relative_path("");
        let slash = PendingFile::from_bytes("a.tex", vec![]).with_relative_path("/");
        assert_eq!(empty.root_segment(), None);
        assert_eq!(slash.root_segment(), None);
    }

    #[test]
    fn completes_when_every_file_succeeds() {
        let mut plan = plan_with(&["a.tex", "b.tex"]);
        for index in 0..2 {
            assert!(plan.mark_sent(index));
            assert!(plan.record_outcome(index, success("e")));
        }
        assert_eq!(plan.finish_if_settled(true), Some(BatchState::Completed));
        assert!(plan.report().close_requested);
    }

    #[test]
    fn most_recent_failure_wins() {
        let mut plan = plan_with(&["a.tex", "b.tex"]);
        plan.mark_sent(0);
        plan.mark_sent(1);
        plan.record_outcome(
            0,
            UploadOutcome::Failure {
                reason: UploadError::RateLimited,
            },
        );
        plan.record_outcome(
            1,
            UploadOutcome::Failure {
                reason: UploadError::NotAuthenticated,
            },
        );
        assert_eq!(plan.current_error(), Some(&UploadError::NotAuthenticated));
        assert_eq!(
            plan.finish_if_settled(true),
            Some(BatchState::FinishedWithErrors)
        );
        assert!(!plan.report().close_requested);
    }

    #[test]
    fn does_not_settle_while_files_are_in_flight() {
        let mut plan = plan_with(&["a.tex", "b.tex"]);
        plan.mark_sent(0);
        plan.record_outcome(0, success("e1"));
        assert_eq!(plan.finish_if_settled(false), None);
        plan.mark_sent(1);
        assert_eq!(plan.finish_if_settled(true), None);
    }

    #[test]
    fn rejects_outcome_for_unsent_or_finished_file() {
        let mut plan = plan_with(&["a.tex"]);
        assert!(!plan.record_outcome(0, success("e1")));
        plan.mark_sent(0);
        assert!(plan.record_outcome(0, success("e1")));
        assert!(!plan.record_outcome(0, success("e2")));
        assert!(!plan.mark_sent(0));
    }

    #[test]
    fn closed_dispatch_skips_unsent_files() {
        let mut plan = plan_with(&["a.tex", "b.tex", "c.tex"]);
        plan.mark_sent(0);
        plan.record_outcome(
            0,
            UploadOutcome::Failure {
                reason: UploadError::ServerError(GENERIC_ERROR.to_string()),
            },
        );
        assert_eq!(plan.finish_if_settled(false), None);
        assert_eq!(plan.finish_if_settled(true), Some(BatchState::Aborted));

        let report = plan.report();
        assert_eq!(report.files[1].status, FileStatus::Skipped);
        assert_eq!(report.files[2].status, FileStatus::Skipped);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn failure_on_last_file_finishes_with_errors() {
        let mut plan = plan_with(&["a.tex", "b.tex"]);
        plan.mark_sent(0);
        plan.record_outcome(0, success("e1"));
        plan.mark_sent(1);
        plan.record_outcome(
            1,
            UploadOutcome::Failure {
                reason: UploadError::ServerError(GENERIC_ERROR.to_string()),
            },
        );
        assert_eq!(
            plan.finish_if_settled(true),
            Some(BatchState::FinishedWithErrors)
        );
        assert!(!plan.report().close_requested);
    }

    #[test]
    fn cancel_marks_everything_skipped() {
        let mut plan = UploadPlan::new();
        plan.push_files(vec![PendingFile::from_bytes("a.tex", vec![])]);
        plan.cancel();
        assert_eq!(plan.state(), BatchState::Aborted);
        assert_eq!(plan.status(0), Some(&FileStatus::Skipped));
        assert!(plan.report().close_requested);
    }

    #[test]
    fn lost_in_flight_files_become_failures() {
        let mut plan = plan_with(&["a.tex", "b.tex"]);
        plan.mark_sent(0);
        plan.fail_in_flight(UploadError::ServerError(GENERIC_ERROR.to_string()));
        assert_eq!(
            plan.finish_if_settled(true),
            Some(BatchState::Aborted)
        );
        assert_eq!(plan.report().failed(), 1);
    }
}
