use reqwest::Client;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Shared client for URL-list and fixed-remote fetches
    pub http: Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub work_dir: String,
}

/// The fixed-remote source as currently configured
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemoteSourcesResponse {
    pub base_url: String,
    pub files: Vec<String>,
}

/// Error body for requests rejected before a session starts
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
