// Clinical SQL - load clinical trial tables into SQLite and query them in natural language

pub mod config;
pub mod models;
pub mod types;
pub mod sources;   // File acquisition: upload, folder, URL list, fixed remote
pub mod decode;    // CSV, XLSX and SAS transport decoders
pub mod store;     // Single-table SQLite stores and session workspaces
pub mod agents;    // SQL agent over a read-only store
pub mod llm;
pub mod pipeline;
pub mod routes;
pub mod middleware;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
