use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Level;

use crate::config::Config;
use crate::error::AppError;
use crate::logging::{LogSink, SessionLog};
use crate::models::{RunOutcome, RunPhase, RunRequest};
use crate::services::cancellation::CancellationToken;
use crate::services::file_processor::{process_csv_file, validate_chunk_size, validate_top_n};
use crate::services::report::{default_log_filename, default_report_filename, save_text};
use crate::services::sniffer::DetectedEncoding;

#[derive(Debug, Default)]
struct ControllerState {
    running: bool,
    last_request: Option<RunRequest>,
    last_outcome: Option<RunOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub status: String,
    /// Terminal phase of the last run; `None` while a run is active.
    pub phase: Option<RunPhase>,
    pub file: Option<String>,
    pub top_n: Option<usize>,
    pub chunk_size: Option<usize>,
}

/// Front door for a presentation layer: one run at a time, on a blocking worker.
pub struct AnalysisController {
    config: Config,
    cancel: CancellationToken,
    log: Arc<SessionLog>,
    state: Mutex<ControllerState>,
}

impl AnalysisController {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            log: Arc::new(SessionLog::new()),
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_log(&self) -> Arc<SessionLog> {
        Arc::clone(&self.log)
    }

    /// Validates raw inputs and starts a run on the blocking pool.
    ///
    /// Fails with [`AppError::Conflict`] while another run is active.
    pub fn start(
        self: &Arc<Self>,
        path: impl Into<PathBuf>,
        top_n: &str,
        chunk_size: &str,
    ) -> Result<JoinHandle<()>, AppError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(AppError::InvalidInput("Please select a CSV file first.".to_string()));
        }

        let request = {
            let mut state = self.state.lock();
            if state.running {
                return Err(AppError::Conflict("A run is already in progress".to_string()));
            }
            // Each run starts with a fresh log and a clear flag.
            self.log.clear();
            self.cancel.reset();
            let request = RunRequest {
                path,
                top_n: validate_top_n(top_n, &self.config, self.log.as_ref()),
                chunk_size: validate_chunk_size(chunk_size, &self.config, self.log.as_ref()),
            };
            state.running = true;
            state.last_request = Some(request.clone());
            state.last_outcome = None;
            request
        };

        self.log.log(Level::INFO, &format!("File selected: {}", request.path.display()));

        let controller = Arc::clone(self);
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                process_csv_file(request, &controller.config, &controller.cancel, controller.log.as_ref())
            }))
            .unwrap_or_else(|_| {
                let message = "Processing aborted unexpectedly".to_string();
                controller.log.log(Level::ERROR, &message);
                RunOutcome::Failed { message }
            });
            let mut state = controller.state.lock();
            state.running = false;
            state.last_outcome = Some(outcome);
        });

        Ok(handle)
    }

    /// Asks the active run to stop at the next chunk boundary.
    pub fn stop(&self) -> bool {
        if !self.state.lock().running {
            return false;
        }
        self.cancel.cancel();
        self.log.log(Level::WARN, "Stop request sent.");
        self.log.status("Stopping...");
        true
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state.lock();
        let phase = match (&state.last_outcome, state.running) {
            (_, true) => None,
            (Some(outcome), false) => Some(outcome.phase()),
            (None, false) => Some(RunPhase::Idle),
        };
        StatusSnapshot {
            running: state.running,
            status: self.log.current_status(),
            phase,
            file: state.last_request.as_ref().map(|r| r.path.display().to_string()),
            top_n: state.last_request.as_ref().map(|r| r.top_n),
            chunk_size: state.last_request.as_ref().map(|r| r.chunk_size),
        }
    }

    /// Text of the last finished run, if any.
    pub fn report_text(&self) -> Option<String> {
        self.state.lock().last_outcome.as_ref().map(RunOutcome::report_text)
    }

    pub fn log_text(&self) -> String {
        self.log.contents()
    }

    /// Saves the last completed report, in the detected encoding unless `utf8` is set.
    ///
    /// With no `path`, the default report file name is used under `output_dir`.
    pub fn save_report(&self, path: Option<&Path>, utf8: bool) -> Result<PathBuf, AppError> {
        let (content, encoding, target) = {
            let state = self.state.lock();
            let (result, request) = match (&state.last_outcome, &state.last_request) {
                (Some(RunOutcome::Completed(result)), Some(request)) => (result, request),
                _ => return Err(AppError::NotFound("No completed report to save".to_string())),
            };
            if result.report.trim().is_empty() {
                return Err(AppError::NotFound("Report is empty".to_string()));
            }
            let target = match path {
                Some(p) => p.to_path_buf(),
                None => self.config.output_dir.join(default_report_filename(
                    &request.path,
                    request.top_n,
                    Local::now().naive_local(),
                )),
            };
            let encoding: DetectedEncoding = result.encoding;
            (result.report.clone(), encoding, target)
        };

        let encoding = if utf8 { None } else { Some(encoding.encoding) };
        match save_text(&target, &content, encoding) {
            Ok(()) => {
                self.log.log(Level::INFO, &format!("Report saved to: {}", target.display()));
                Ok(target)
            }
            Err(e) => {
                self.log.log(Level::ERROR, &format!("Failed to save report: {}", e));
                Err(e)
            }
        }
    }

    /// Saves the session log as UTF-8.
    pub fn save_log(&self, path: Option<&Path>) -> Result<PathBuf, AppError> {
        let content = self.log.contents();
        if content.trim().is_empty() {
            return Err(AppError::NotFound("Log is empty".to_string()));
        }
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let source = self.state.lock().last_request.as_ref().map(|r| r.path.clone());
                self.config.output_dir.join(default_log_filename(
                    source.as_deref(),
                    Local::now().naive_local(),
                ))
            }
        };

        save_text(&target, &content, None)?;
        self.log.log(Level::INFO, &format!("Log file saved to: {}", target.display()));
        Ok(target)
    }
}
