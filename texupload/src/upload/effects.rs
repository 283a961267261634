use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use texproject_core::ProjectClient;
use tracing::{debug, info, warn};

const NEW_FILE_CREATED: &str = "new-file-created";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    #[serde(skip)]
    pub key: &'static str,
    pub method: &'static str,
    pub extension: String,
}

impl TelemetryEvent {
    pub fn file_uploaded(extension: impl Into<String>) -> Self {
        Self {
            key: NEW_FILE_CREATED,
            method: "upload",
            extension: extension.into(),
        }
    }
}

pub trait Telemetry: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Asks the server to re-scan a freshly created doc for labels and packages.
pub trait MetadataRefresher: Send + Sync {
    fn refresh(&self, entity_id: String) -> BoxFuture<'static, ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEffects;

impl Telemetry for NoopEffects {
    fn record(&self, _event: TelemetryEvent) {}
}

impl MetadataRefresher for NoopEffects {
    fn refresh(&self, _entity_id: String) -> BoxFuture<'static, ()> {
        async {}.boxed()
    }
}

/// Telemetry that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        info!(
            key = event.key,
            method = event.method,
            extension = %event.extension,
            "telemetry event"
        );
    }
}

/// Sends telemetry and metadata refreshes to the project web API, fire-and-forget.
#[derive(Clone)]
pub struct HttpEffects {
    client: ProjectClient,
    project_id: String,
}

impl HttpEffects {
    pub fn new(client: ProjectClient, project_id: impl Into<String>) -> Self {
        Self {
            client,
            project_id: project_id.into(),
        }
    }
}

impl Telemetry for HttpEffects {
    fn record(&self, event: TelemetryEvent) {
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.send_event(event.key, &event).await {
                warn!(key = event.key, error = %err, "failed to send telemetry event");
            }
        });
    }
}

impl MetadataRefresher for HttpEffects {
    fn refresh(&self, entity_id: String) -> BoxFuture<'static, ()> {
        let client = self.client.clone();
        let project_id = self.project_id.clone();
        async move {
            match client.refresh_doc_metadata(&project_id, &entity_id).await {
                Ok(()) => debug!(%entity_id, "doc metadata refreshed"),
                Err(err) => warn!(%entity_id, error = %err, "doc metadata refresh failed"),
            }
        }
        .boxed()
    }
}
