use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use texproject_core::{
    FailureClass, ProjectApiError, ProjectClient, UploadSource, UploadedEntity,
};
use thiserror::Error;

use super::plan::{ContentHandle, GENERIC_ERROR, UploadError};
use super::snapshot::FolderId;

/// Everything the transport needs to send one file.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub name: String,
    pub relative_path: Option<String>,
    pub folder_id: FolderId,
    pub content: ContentHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    #[error("server returned {status}")]
    Status { status: u16, error: Option<String> },
    /// No HTTP response at all.
    #[error("network failure: {0}")]
    Network(String),
    /// Unreadable source file or malformed response body.
    #[error("upload failed: {0}")]
    Local(String),
}

impl TransportFailure {
    pub fn to_upload_error(&self) -> UploadError {
        match self {
            TransportFailure::Status { status: 429, .. } => UploadError::RateLimited,
            TransportFailure::Status { status: 403, .. } => UploadError::NotAuthenticated,
            TransportFailure::Status { error, .. } => UploadError::ServerError(
                error.clone().unwrap_or_else(|| GENERIC_ERROR.to_string()),
            ),
            TransportFailure::Network(_) | TransportFailure::Local(_) => {
                UploadError::ServerError(GENERIC_ERROR.to_string())
            }
        }
    }

    /// Only a lost connection stops the batch; HTTP errors, 403 included, fail just their file.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, TransportFailure::Network(_))
    }
}

impl From<ProjectApiError> for TransportFailure {
    fn from(err: ProjectApiError) -> Self {
        if let Some(status) = err.status() {
            let error = match err.classification() {
                Some(FailureClass::Other) => err.server_message(),
                _ => None,
            };
            return TransportFailure::Status {
                status: status.as_u16(),
                error,
            };
        }
        match &err {
            ProjectApiError::Request(inner)
                if inner.is_connect() || inner.is_timeout() || inner.is_request() =>
            {
                TransportFailure::Network(err.to_string())
            }
            _ => TransportFailure::Local(err.to_string()),
        }
    }
}

/// Sends one file to the project and reports the created entity.
pub trait Transport: Send + Sync + 'static {
    fn upload(
        &self,
        request: UploadRequest,
    ) -> BoxFuture<'static, Result<UploadedEntity, TransportFailure>>;
}

/// [`Transport`] backed by the project web API.
#[derive(Clone)]
pub struct HttpTransport {
    client: ProjectClient,
    project_id: String,
}

impl HttpTransport {
    pub fn new(client: ProjectClient, project_id: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
        }
    }
}

impl Transport for HttpTransport {
    fn upload(
        &self,
        request: UploadRequest,
    ) -> BoxFuture<'static, Result<UploadedEntity, TransportFailure>> {
        let client = self.client.clone();
        let project_id = self.project_id.clone();
        async move {
            let source = UploadSource {
                name: request.name,
                relative_path: request.relative_path,
                content: request.content,
            };
            client
                .upload_file(&project_id, Some(request.folder_id.as_str()), source)
                .await
                .map_err(TransportFailure::from)
        }
        .boxed()
    }
}
