use std::io;
use std::path::PathBuf;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

const CSRF_HEADER: &str = "X-CSRF-TOKEN";
// Field name inherited from the legacy FineUploader widget; the server still expects it.
const UPLOAD_FIELD: &str = "qqfile";

#[derive(Debug, Error)]
pub enum ProjectApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    NotAuthenticated,
    Other,
}

#[derive(Clone)]
pub struct ProjectClient {
    http: Client,
    base_url: Url,
    csrf_token: String,
}

/// Content of one file handed to [`ProjectClient::upload_file`].
#[derive(Debug, Clone)]
pub enum UploadContent {
    /// Streamed from disk at send time.
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct UploadSource {
    pub name: String,
    pub relative_path: Option<String>,
    pub content: UploadContent,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Doc,
    File,
    Folder,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UploadedEntity {
    pub entity_id: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

impl ProjectClient {
    pub fn with_base_url(
        base_url: &str,
        csrf_token: impl Into<String>,
    ) -> Result<Self, ProjectApiError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            csrf_token: csrf_token.into(),
        })
    }

    /// Uploads one file into `folder_id` (the project root folder when `None`).
    pub async fn upload_file(
        &self,
        project_id: &str,
        folder_id: Option<&str>,
        source: UploadSource,
    ) -> Result<UploadedEntity, ProjectApiError> {
        let url = self.upload_endpoint(project_id, folder_id)?;
        let part = match source.content {
            UploadContent::Bytes(bytes) => Part::bytes(bytes),
            UploadContent::Path(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let len = file.metadata().await?.len();
                Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
            }
        }
        .file_name(source.name.clone());

        let mut form = Form::new().text("name", source.name).part(UPLOAD_FIELD, part);
        if let Some(relative_path) = source.relative_path {
            form = form.text("relativePath", relative_path);
        }

        let response = self
            .http
            .post(url)
            .header(CSRF_HEADER, &self.csrf_token)
            .multipart(form)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn refresh_doc_metadata(
        &self,
        project_id: &str,
        doc_id: &str,
    ) -> Result<(), ProjectApiError> {
        let url = self.endpoint(&format!("/project/{project_id}/doc/{doc_id}/metadata"))?;
        let response = self
            .http
            .post(url)
            .header(CSRF_HEADER, &self.csrf_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::handle_empty_response(response).await
    }

    pub async fn send_event<P: Serialize + ?Sized>(
        &self,
        key: &str,
        payload: &P,
    ) -> Result<(), ProjectApiError> {
        let url = self.endpoint(&format!("/event/{key}"))?;
        let response = self
            .http
            .post(url)
            .header(CSRF_HEADER, &self.csrf_token)
            .json(payload)
            .send()
            .await?;
        Self::handle_empty_response(response).await
    }

    fn upload_endpoint(
        &self,
        project_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Url, ProjectApiError> {
        let mut url = self.endpoint(&format!("/project/{project_id}/upload"))?;
        if let Some(folder_id) = folder_id.filter(|id| !id.is_empty()) {
            url.query_pairs_mut().append_pair("folder_id", folder_id);
        }
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProjectApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProjectApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ProjectApiError::Api { status, body })
        }
    }

    async fn handle_empty_response(response: reqwest::Response) -> Result<(), ProjectApiError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ProjectApiError::Api { status, body })
        }
    }
}

impl ProjectApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProjectApiError::Api { status, .. } => Some(*status),
            ProjectApiError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<FailureClass> {
        self.status().map(classify_api_status)
    }

    /// The `error` field of a JSON failure body, when the server sent one.
    pub fn server_message(&self) -> Option<String> {
        match self {
            ProjectApiError::Api { body, .. } => serde_json::from_str::<ErrorBody>(body)
                .ok()
                .and_then(|parsed| parsed.error)
                .filter(|message| !message.is_empty()),
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> FailureClass {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FailureClass::RateLimited,
        StatusCode::FORBIDDEN => FailureClass::NotAuthenticated,
        _ => FailureClass::Other,
    }
}
