use std::collections::HashSet;
use std::num::IntErrorKind;
use tracing::Level;

use crate::config::Config;
use crate::error::AppError;
use crate::logging::LogSink;
use crate::models::{AnalysisResult, RunOutcome, RunPhase, RunRequest, RunState};
use crate::services::aggregator::FrequencyAggregator;
use crate::services::cancellation::CancellationToken;
use crate::services::chunked_reader::{ChunkedReader, ReaderOptions};
use crate::services::estimator;
use crate::services::report::generate_report;
use crate::services::sniffer::{detect_encoding, read_sample, sniff_delimiter};

/// Parses the requested top-N, falling back to the configured default with a warning.
pub fn validate_top_n(raw: &str, config: &Config, sink: &dyn LogSink) -> usize {
    match raw.trim().parse::<usize>() {
        Ok(top_n) if top_n > 0 => top_n,
        // Larger than any column can hold, so every value is listed.
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => usize::MAX,
        _ => {
            sink.log(
                Level::WARN,
                &format!("Top N '{}' is invalid. Using default: {}.", raw, config.default_top_n),
            );
            config.default_top_n
        }
    }
}

/// Parses the requested chunk size, falling back to the configured default with a warning.
pub fn validate_chunk_size(raw: &str, config: &Config, sink: &dyn LogSink) -> usize {
    match raw.trim().parse::<usize>() {
        Ok(chunk_size) if chunk_size >= config.min_chunk_size => chunk_size,
        _ => {
            sink.log(
                Level::WARN,
                &format!(
                    "Chunk size '{}' is invalid (minimum {}). Using default: {}.",
                    raw, config.min_chunk_size, config.default_chunk_size
                ),
            );
            config.default_chunk_size
        }
    }
}

/// Runs one complete analysis of `request.path`.
///
/// Never returns an error: failures become [`RunOutcome::Failed`] after being
/// logged to `sink`, and a set `cancel` token yields [`RunOutcome::Stopped`].
pub fn process_csv_file(
    request: RunRequest,
    config: &Config,
    cancel: &CancellationToken,
    sink: &dyn LogSink,
) -> RunOutcome {
    let start = std::time::Instant::now();
    let aggregator = FrequencyAggregator::new(config.schema_policy);
    let mut state = RunState::new(request, cancel.clone(), aggregator);

    match execute(&mut state, config, sink) {
        Ok(outcome) => {
            state.enter(outcome.phase());
            tracing::info!("Run finished as {:?} in {:?}", state.phase, start.elapsed());
            outcome
        }
        Err(e) => {
            state.enter(RunPhase::Failed);
            let message = format!("An error occurred during processing: {}", e);
            sink.log(Level::ERROR, &message);
            sink.status("Error during processing. Check logs.");
            RunOutcome::Failed { message }
        }
    }
}

fn execute(state: &mut RunState, config: &Config, sink: &dyn LogSink) -> Result<RunOutcome, AppError> {
    let path = state.request.path.clone();
    let chunk_size = state.request.chunk_size;

    state.enter(RunPhase::Sniffing);
    sink.status("Detecting file encoding and estimating size...");
    let file_size = std::fs::metadata(&path)
        .map_err(|e| AppError::FileProcessingError(format!("Failed to read {}: {}", path.display(), e)))?
        .len();
    let sample = read_sample(&path, config.sample_size)?;
    state.encoding = detect_encoding(&sample);
    let delimiter = sniff_delimiter(&sample, &state.encoding);

    state.enter(RunPhase::Estimating);
    let estimate = estimator::estimate(&sample, file_size, chunk_size, config.fallback_row_size);
    state.estimate = Some(estimate);
    drop(sample);

    sink.log(Level::INFO, &format!("Detected encoding: {}", state.encoding.label));
    sink.log(Level::INFO, &format!("Estimated average row size: {:.2} bytes.", estimate.avg_row_size));
    sink.log(Level::INFO, &format!("Estimated total chunks: {}", estimate.total_chunks));
    sink.status(&format!("Processing chunk 1 of ~{}...", estimate.total_chunks));

    let options = ReaderOptions {
        chunk_size,
        delimiter,
        na_values: config.na_values.iter().cloned().collect::<HashSet<_>>(),
        schema_policy: config.schema_policy,
    };
    let mut reader = ChunkedReader::open(&path, &state.encoding, options)?;
    state.aggregator.seed_columns(reader.columns());
    tracing::debug!("Reading {} with delimiter {:?}", path.display(), delimiter as char);

    let mut warned_replacements = false;
    loop {
        if state.cancel.is_cancelled() {
            return Ok(stopped(state, sink));
        }
        let chunk = match reader.next_chunk()? {
            Some(chunk) => chunk,
            None => break,
        };
        // A chunk that finished reading after the stop request is discarded.
        if state.cancel.is_cancelled() {
            return Ok(stopped(state, sink));
        }

        state.chunk_index += 1;
        state.enter(RunPhase::Reading { chunk: state.chunk_index });
        sink.status(&format!(
            "Processing chunk {} of ~{}...",
            state.chunk_index, estimate.total_chunks
        ));
        sink.log(Level::INFO, &format!("Analyzing chunk {}...", state.chunk_index));

        if chunk.ragged_rows > 0 {
            sink.log(
                Level::WARN,
                &format!(
                    "Chunk {}: {} rows had more fields than the header; extra fields were ignored.",
                    state.chunk_index, chunk.ragged_rows
                ),
            );
        }
        if !warned_replacements && reader.had_replacements() {
            warned_replacements = true;
            sink.log(
                Level::WARN,
                &format!(
                    "Some bytes could not be decoded as {} and were replaced.",
                    state.encoding.label
                ),
            );
        }

        state.aggregator.update(&chunk.frame)?;
    }

    state.enter(RunPhase::Reporting);
    sink.status("Analysis complete. Generating report...");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let report = generate_report(
        &state.aggregator,
        state.request.top_n,
        &file_name,
        chrono::Local::now().naive_local(),
    );
    sink.status("Report generated successfully.");
    sink.log(
        Level::INFO,
        &format!(
            "Processed {} rows in {} chunks.",
            state.aggregator.rows_seen(),
            state.chunk_index
        ),
    );

    Ok(RunOutcome::Completed(AnalysisResult {
        report,
        encoding: state.encoding,
        estimate,
        chunks_processed: state.chunk_index,
        rows_processed: state.aggregator.rows_seen(),
        aggregator: std::mem::take(&mut state.aggregator),
    }))
}

fn stopped(state: &RunState, sink: &dyn LogSink) -> RunOutcome {
    sink.log(Level::WARN, "Processing stopped by user.");
    sink.status("Processing stopped.");
    RunOutcome::Stopped {
        chunks_processed: state.chunk_index,
        rows_processed: state.aggregator.rows_seen(),
    }
}
