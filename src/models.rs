use serde::Serialize;
use std::path::PathBuf;

use crate::services::aggregator::FrequencyAggregator;
use crate::services::cancellation::CancellationToken;
use crate::services::estimator::ChunkEstimate;
use crate::services::report::{failed_report, STOPPED_REPORT};
use crate::services::sniffer::DetectedEncoding;

/// Validated parameters of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub path: PathBuf,
    pub top_n: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Sniffing,
    Estimating,
    Reading { chunk: u64 },
    Reporting,
    Done,
    Cancelled,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Cancelled | RunPhase::Failed)
    }
}

/// Everything a single run owns. Built at run start and dropped at run end.
#[derive(Debug)]
pub struct RunState {
    pub request: RunRequest,
    pub encoding: DetectedEncoding,
    pub estimate: Option<ChunkEstimate>,
    pub chunk_index: u64,
    pub cancel: CancellationToken,
    pub aggregator: FrequencyAggregator,
    pub phase: RunPhase,
}

impl RunState {
    pub fn new(request: RunRequest, cancel: CancellationToken, aggregator: FrequencyAggregator) -> Self {
        Self {
            request,
            encoding: DetectedEncoding::default(),
            estimate: None,
            chunk_index: 0,
            cancel,
            aggregator,
            phase: RunPhase::Idle,
        }
    }

    pub fn enter(&mut self, phase: RunPhase) {
        tracing::debug!("Run phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

#[derive(Debug)]
pub struct AnalysisResult {
    pub report: String,
    pub encoding: DetectedEncoding,
    pub estimate: ChunkEstimate,
    pub chunks_processed: u64,
    pub rows_processed: u64,
    pub aggregator: FrequencyAggregator,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(AnalysisResult),
    Stopped { chunks_processed: u64, rows_processed: u64 },
    Failed { message: String },
}

impl RunOutcome {
    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::Completed(_) => RunPhase::Done,
            RunOutcome::Stopped { .. } => RunPhase::Cancelled,
            RunOutcome::Failed { .. } => RunPhase::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    /// Text shown in the report pane for this outcome.
    pub fn report_text(&self) -> String {
        match self {
            RunOutcome::Completed(result) => result.report.clone(),
            RunOutcome::Stopped { .. } => STOPPED_REPORT.to_string(),
            RunOutcome::Failed { message } => failed_report(message),
        }
    }
}
