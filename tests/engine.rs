use std::io::Write;
use std::path::Path;

use csv_top_values::config::Config;
use csv_top_values::logging::{LogSink, SessionLog};
use csv_top_values::models::{AnalysisResult, RunOutcome, RunRequest};
use csv_top_values::services::aggregator::SchemaPolicy;
use csv_top_values::services::cancellation::CancellationToken;
use csv_top_values::services::file_processor::process_csv_file;
use tracing::Level;

fn write_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn request(path: &Path, top_n: usize, chunk_size: usize) -> RunRequest {
    RunRequest {
        path: path.to_path_buf(),
        top_n,
        chunk_size,
    }
}

fn run(path: &Path, top_n: usize, chunk_size: usize, config: &Config, log: &SessionLog) -> AnalysisResult {
    match process_csv_file(request(path, top_n, chunk_size), config, &CancellationToken::new(), log) {
        RunOutcome::Completed(result) => result,
        other => panic!("expected a completed run, got {:?}\nlog:\n{}", other, log.contents()),
    }
}

/// `rows` rows over region/status/code with known counts.
fn synthetic_csv(rows: usize) -> String {
    let regions = ["north", "south", "east", "west", "south", "south"];
    let mut csv = String::from("region,status,code\n");
    for i in 0..rows {
        let status = match i % 10 {
            0..=5 => "OK",
            6 | 7 => "FAIL",
            8 => "WARN",
            _ => "",
        };
        csv.push_str(&format!("{},{},{}\n", regions[i % regions.len()], status, i % 7));
    }
    csv
}

#[test]
fn status_example_reports_top_two() {
    let mut csv = String::from("id,Status,Owner\n");
    let statuses = std::iter::repeat("OK")
        .take(15)
        .chain(std::iter::repeat("FAIL").take(7))
        .chain(std::iter::repeat("WARN").take(3));
    for (i, status) in statuses.enumerate() {
        csv.push_str(&format!("{},{},team{}\n", i, status, i % 2));
    }
    let file = write_file(csv.as_bytes());
    let log = SessionLog::new();

    let result = run(file.path(), 2, 500, &Config::default(), &log);

    let ok = result.report.find("  - Value: 'OK' | Count: 15").unwrap();
    let fail = result.report.find("  - Value: 'FAIL' | Count: 7").unwrap();
    assert!(ok < fail);
    assert!(!result.report.contains("'WARN'"));
    assert!(result.report.contains("--- Column 2: 'Status' ---"));
    assert!(result.report.contains("Top 2 values:"));
    assert_eq!(result.rows_processed, 25);
    assert_eq!(result.chunks_processed, 1);
}

#[test]
fn chunk_size_does_not_change_the_counts() {
    let file = write_file(synthetic_csv(5_000).as_bytes());
    let config = Config::default();

    let small = run(file.path(), 10, 500, &config, &SessionLog::new());
    let large = run(file.path(), 10, 10_000, &config, &SessionLog::new());

    assert_eq!(small.chunks_processed, 10);
    assert_eq!(large.chunks_processed, 1);
    assert_eq!(small.aggregator.columns(), large.aggregator.columns());
    for column in small.aggregator.columns() {
        let a: Vec<(&str, u64)> = small.aggregator.frequencies(column).unwrap().iter().collect();
        let b: Vec<(&str, u64)> = large.aggregator.frequencies(column).unwrap().iter().collect();
        assert_eq!(a, b, "column {}", column);
    }
}

#[test]
fn counts_add_up_to_rows_minus_missing_cells() {
    let file = write_file(synthetic_csv(2_345).as_bytes());
    let result = run(file.path(), 3, 500, &Config::default(), &SessionLog::new());

    assert_eq!(result.rows_processed, 2_345);
    let region = result.aggregator.frequencies("region").unwrap();
    let code = result.aggregator.frequencies("code").unwrap();
    let status = result.aggregator.frequencies("status").unwrap();
    assert_eq!(region.total(), 2_345);
    assert_eq!(code.total(), 2_345);
    // every tenth status is blank and therefore missing
    let blanks = (0..2_345).filter(|i| i % 10 == 9).count() as u64;
    assert_eq!(status.total(), 2_345 - blanks);

    assert_eq!(region.top_n(1), vec![("south", region.get("south").unwrap())]);
    let top_status: Vec<&str> = status.top_n(3).into_iter().map(|(v, _)| v).collect();
    assert_eq!(top_status, vec!["OK", "FAIL", "WARN"]);
}

#[test]
fn ties_are_ranked_by_first_occurrence() {
    let file = write_file(b"letter\nc\na\nb\na\nc\nb\nd\n");
    let result = run(file.path(), 3, 500, &Config::default(), &SessionLog::new());
    let ranked = result.aggregator.frequencies("letter").unwrap().top_n(3);
    assert_eq!(ranked, vec![("c", 2), ("a", 2), ("b", 2)]);
}

struct CancelOnStatus {
    token: CancellationToken,
    trigger: &'static str,
    log: SessionLog,
}

impl LogSink for CancelOnStatus {
    fn log(&self, level: Level, message: &str) {
        self.log.log(level, message);
    }

    fn status(&self, message: &str) {
        if message.starts_with(self.trigger) {
            self.token.cancel();
        }
        self.log.status(message);
    }
}

#[test]
fn cancelling_mid_run_stops_after_the_current_chunk() {
    let file = write_file(synthetic_csv(2_000).as_bytes());
    let token = CancellationToken::new();
    let sink = CancelOnStatus {
        token: token.clone(),
        trigger: "Processing chunk 2 of",
        log: SessionLog::new(),
    };

    let outcome = process_csv_file(request(file.path(), 10, 500), &Config::default(), &token, &sink);

    match outcome {
        RunOutcome::Stopped { chunks_processed, rows_processed } => {
            assert_eq!(chunks_processed, 2);
            assert_eq!(rows_processed, 1_000);
        }
        other => panic!("expected a stopped run, got {:?}", other),
    }
    assert!(sink.log.contents().contains("Processing stopped by user."));
    assert!(!sink.log.contents().contains("Analyzing chunk 3"));
    assert_eq!(
        outcome_text(&token, file.path()),
        "Processing was stopped before completion."
    );
}

fn outcome_text(token: &CancellationToken, path: &Path) -> String {
    // token is still set, so a new run stops before reading anything
    process_csv_file(request(path, 10, 500), &Config::default(), token, &SessionLog::new()).report_text()
}

#[test]
fn cancelled_before_start_consumes_no_chunk() {
    let file = write_file(synthetic_csv(600).as_bytes());
    let token = CancellationToken::new();
    token.cancel();

    let outcome = process_csv_file(request(file.path(), 10, 500), &Config::default(), &token, &SessionLog::new());
    assert!(matches!(
        outcome,
        RunOutcome::Stopped { chunks_processed: 0, rows_processed: 0 }
    ));
}

#[test]
fn ascii_file_is_read_without_replacements() {
    let file = write_file(synthetic_csv(50).as_bytes());
    let log = SessionLog::new();
    let result = run(file.path(), 5, 500, &Config::default(), &log);

    assert_eq!(result.encoding.label, "ascii");
    assert!(!result.report.contains('\u{FFFD}'));
    assert!(log.contents().contains("Detected encoding: ascii"));
    assert!(!log.contents().contains("were replaced"));
}

#[test]
fn latin1_file_is_decoded() {
    let text = "city,n\nSão Paulo,1\nSão Paulo,2\nZürich,3\nGenève,4\nMálaga,5\nKöln,6\nA Coruña,7\n";
    let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(text);
    let file = write_file(&bytes);
    let result = run(file.path(), 5, 500, &Config::default(), &SessionLog::new());

    assert_eq!(result.encoding.encoding, encoding_rs::WINDOWS_1252);
    assert!(result.report.contains("  - Value: 'São Paulo' | Count: 2"));
    assert!(result.report.contains("  - Value: 'Zürich' | Count: 1"));
}

#[test]
fn cyrillic_windows_1251_file_is_decoded() {
    let text = "город,n\nМосква,1\nМосква,2\nПривет мир,3\nСанкт-Петербург,4\nНовосибирск,5\nЕкатеринбург,6\n";
    let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode(text);
    let file = write_file(&bytes);
    let log = SessionLog::new();

    let result = run(file.path(), 5, 500, &Config::default(), &log);

    assert_eq!(result.encoding.encoding, encoding_rs::WINDOWS_1251);
    assert!(result.report.contains("--- Column 1: 'город' ---"));
    assert!(result.report.contains("  - Value: 'Москва' | Count: 2"));
    assert!(log.contents().contains("Detected encoding: windows-1251"));
}

#[test]
fn strict_policy_fails_on_rows_wider_than_the_header() {
    let file = write_file(b"a,b\n1,2,EXTRA\n3,4\n");
    let strict = Config {
        schema_policy: SchemaPolicy::Strict,
        ..Config::default()
    };

    let outcome = process_csv_file(request(file.path(), 5, 500), &strict, &CancellationToken::new(), &SessionLog::new());
    match outcome {
        RunOutcome::Failed { message } => assert!(message.contains("3 fields"), "{}", message),
        other => panic!("expected a failed run, got {:?}", other),
    }

    // The default policy keeps going and only warns.
    let log = SessionLog::new();
    let result = run(file.path(), 5, 500, &Config::default(), &log);
    assert_eq!(result.rows_processed, 2);
    assert!(log.contents().contains("extra fields were ignored"));
}

#[test]
fn malformed_bytes_past_the_sample_are_replaced() {
    let mut bytes = b"name\n".to_vec();
    for _ in 0..100 {
        bytes.extend_from_slice(b"alpha\n");
    }
    bytes.extend_from_slice(b"bad\xFFbyte\n");
    let file = write_file(&bytes);
    let config = Config {
        sample_size: 64,
        ..Config::default()
    };
    let log = SessionLog::new();

    let result = run(file.path(), 5, 500, &config, &log);

    assert_eq!(result.rows_processed, 101);
    assert_eq!(result.aggregator.frequencies("name").unwrap().get("bad\u{FFFD}byte"), Some(1));
    assert!(log.contents().contains("were replaced"));
}

#[test]
fn semicolon_files_are_split_on_semicolons() {
    let file = write_file(b"a;b\n1;x\n1;y\n2;x\n");
    let result = run(file.path(), 5, 500, &Config::default(), &SessionLog::new());
    assert_eq!(result.aggregator.columns(), ["a", "b"]);
    assert_eq!(result.aggregator.frequencies("a").unwrap().get("1"), Some(2));
}

#[test]
fn header_only_file_reports_placeholders() {
    let file = write_file(b"a,b\n");
    let result = run(file.path(), 5, 500, &Config::default(), &SessionLog::new());
    assert_eq!(result.rows_processed, 0);
    assert_eq!(result.chunks_processed, 0);
    assert!(result.report.contains("--- Column 1: 'a' ---\nNo values found.\n"));
    assert!(result.report.contains("--- Column 2: 'b' ---\nNo values found.\n"));
}

#[test]
fn estimate_is_advisory_only() {
    // 3 000 short rows with a tiny sample: the estimate is off but every row is still read.
    let file = write_file(synthetic_csv(3_000).as_bytes());
    let config = Config {
        sample_size: 16,
        ..Config::default()
    };
    let result = run(file.path(), 5, 500, &config, &SessionLog::new());
    assert_eq!(result.rows_processed, 3_000);
    assert_eq!(result.chunks_processed, 6);
    assert!(result.estimate.total_chunks >= 1);
}

#[test]
fn failed_run_leaves_no_state_behind() {
    let log = SessionLog::new();
    let missing = process_csv_file(
        request(Path::new("/no/such/file.csv"), 5, 500),
        &Config::default(),
        &CancellationToken::new(),
        &log,
    );
    assert!(matches!(missing, RunOutcome::Failed { .. }));
    assert!(missing.report_text().starts_with("ERROR:\n\n"));

    let file = write_file(b"a\nx\n");
    let result = run(file.path(), 5, 500, &Config::default(), &log);
    assert_eq!(result.rows_processed, 1);
}
