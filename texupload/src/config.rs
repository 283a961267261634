use std::time::Duration;

use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://localhost";
const DEFAULT_MAX_FILES: u64 = 180;
const DEFAULT_CONCURRENCY: u64 = 1;
const DEFAULT_METADATA_DELAY_MS: u64 = 250;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Limits and pacing for one upload coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub max_number_of_files: usize,
    /// Per-file limit in bytes; `None` disables the check.
    pub max_file_size: Option<u64>,
    pub concurrency_limit: usize,
    /// Start uploading the first admitted set without an explicit `start`.
    pub auto_start: bool,
    pub metadata_refresh_delay: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_number_of_files: DEFAULT_MAX_FILES as usize,
            max_file_size: None,
            concurrency_limit: DEFAULT_CONCURRENCY as usize,
            auto_start: true,
            metadata_refresh_delay: Duration::from_millis(DEFAULT_METADATA_DELAY_MS),
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            max_number_of_files: read_u64(&lookup, "TEXUPLOAD_MAX_FILES", DEFAULT_MAX_FILES)
                as usize,
            max_file_size: lookup("TEXUPLOAD_MAX_FILE_SIZE")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|value| *value > 0),
            concurrency_limit: read_u64(&lookup, "TEXUPLOAD_CONCURRENCY", DEFAULT_CONCURRENCY)
                as usize,
            auto_start: read_bool(&lookup, "TEXUPLOAD_AUTO_START", true),
            metadata_refresh_delay: Duration::from_millis(read_u64(
                &lookup,
                "TEXUPLOAD_METADATA_DELAY_MS",
                DEFAULT_METADATA_DELAY_MS,
            )),
        }
    }
}

/// Where uploads go and how requests authenticate against CSRF checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub base_url: String,
    pub project_id: Option<String>,
    pub csrf_token: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty =
            |name: &str| lookup(name).filter(|value: &String| !value.trim().is_empty());
        Ok(Self {
            base_url: non_empty("TEXUPLOAD_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            project_id: non_empty("TEXUPLOAD_PROJECT_ID"),
            csrf_token: non_empty("TEXUPLOAD_CSRF_TOKEN")
                .ok_or(ConfigError::Missing("TEXUPLOAD_CSRF_TOKEN"))?,
        })
    }
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
