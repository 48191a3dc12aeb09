//! Streaming top-N value counts for large delimited text files.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

use services::controller::AnalysisController;

// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
    pub controller: Arc<AnalysisController>,
}

impl AppState {
    pub fn new(config: config::Config) -> Self {
        let controller = Arc::new(AnalysisController::new(config.clone()));
        Self { config, controller }
    }
}
