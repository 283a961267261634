mod client;

pub use client::{
    EntityType, FailureClass, ProjectApiError, ProjectClient, UploadContent, UploadSource,
    UploadedEntity,
};
