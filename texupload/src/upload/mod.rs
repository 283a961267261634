pub mod acceptable;
pub mod conflict;
pub mod coordinator;
pub mod effects;
pub mod plan;
pub mod snapshot;
pub mod transport;

pub use acceptable::{AcceptancePolicy, DefaultAcceptancePolicy};
pub use conflict::{ConflictSet, detect};
pub use coordinator::{Admission, ConflictDecision, UploadCoordinator, UploadEvent};
pub use effects::{
    HttpEffects, MetadataRefresher, NoopEffects, Telemetry, TelemetryEvent, TracingTelemetry,
};
pub use plan::{
    AdmissionError, BatchReport, BatchState, ContentHandle, FileReport, FileStatus, PendingFile,
    ResolveError, UploadError, UploadOutcome, UploadPlan,
};
pub use snapshot::{EntityKind, FileTreeEntity, FileTreeSnapshot, FolderId, ProjectTree};
pub use transport::{HttpTransport, Transport, TransportFailure, UploadRequest};
