use chrono::NaiveDateTime;
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::AppError;
use crate::services::aggregator::FrequencyAggregator;

pub const STOPPED_REPORT: &str = "Processing was stopped before completion.";

static FORBIDDEN_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("static regex"));

/// Formats the top `top_n` values of every column.
pub fn generate_report(
    aggregator: &FrequencyAggregator,
    top_n: usize,
    file_name: &str,
    timestamp: NaiveDateTime,
) -> String {
    let mut report = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(report, "--- CSV Analysis Report ---");
    let _ = writeln!(report, "File: {}", file_name);
    let _ = writeln!(report, "Analysis Date: {}", timestamp.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(report, "Top {} values:", top_n);
    let _ = writeln!(report, "{}\n", "=".repeat(40));

    for (idx, (column, counts)) in aggregator.iter().enumerate() {
        let _ = writeln!(report, "--- Column {}: '{}' ---", idx + 1, column);
        if counts.is_empty() {
            let _ = writeln!(report, "No values found.\n");
            continue;
        }
        for (value, count) in counts.top_n(top_n) {
            let _ = writeln!(report, "  - Value: '{}' | Count: {}", value, count);
        }
        report.push('\n');
    }

    report
}

pub fn failed_report(message: &str) -> String {
    format!("ERROR:\n\n{}", message)
}

/// Strips characters that are not allowed in file names on common platforms.
pub fn sanitize_filename(name: &str) -> String {
    FORBIDDEN_FILENAME_CHARS.replace_all(name, "").into_owned()
}

fn source_stem(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string())
}

/// `Report_{name}_Top{n}_{YYYYmmdd_HHMMSS}.txt`
pub fn default_report_filename(source: &Path, top_n: usize, timestamp: NaiveDateTime) -> String {
    format!(
        "Report_{}_Top{}_{}.txt",
        sanitize_filename(&source_stem(source)),
        top_n,
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// `Log_{name}_{YYYYmmdd_HHMMSS}.log`; `session` stands in when no file was chosen.
pub fn default_log_filename(source: Option<&Path>, timestamp: NaiveDateTime) -> String {
    let stem = source.map(source_stem).unwrap_or_else(|| "session".to_string());
    format!(
        "Log_{}_{}.log",
        sanitize_filename(&stem),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// Writes `content` to `path`, encoded as `encoding` (UTF-8 when `None`).
///
/// Characters the target encoding cannot represent are replaced.
pub fn save_text(path: &Path, content: &str, encoding: Option<&'static Encoding>) -> Result<(), AppError> {
    let encoding = encoding.unwrap_or(encoding_rs::UTF_8);
    let (bytes, used, unmappable) = encoding.encode(content);
    if unmappable {
        tracing::warn!(
            "Some characters could not be represented in {} while saving {}",
            used.name(),
            path.display()
        );
    }
    std::fs::write(path, &bytes).map_err(|e| {
        AppError::FileProcessingError(format!("Failed to write {}: {}", path.display(), e))
    })
}
