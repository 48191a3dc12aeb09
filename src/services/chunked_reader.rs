use encoding_rs::{CoderResult, Decoder};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::AppError;
use crate::services::aggregator::SchemaPolicy;
use crate::services::sniffer::DetectedEncoding;

const DECODE_BUFFER_SIZE: usize = 16 * 1024;
const MAX_PREALLOCATED_ROWS: usize = 64 * 1024;

/// Streams bytes of any supported encoding out as UTF-8.
///
/// Malformed input is replaced with U+FFFD instead of failing the read.
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    input_start: usize,
    input_end: usize,
    output: Vec<u8>,
    output_start: usize,
    output_end: usize,
    eof: bool,
    finished: bool,
    had_replacements: bool,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &DetectedEncoding) -> Self {
        Self {
            inner,
            decoder: encoding.encoding.new_decoder_with_bom_removal(),
            input: vec![0; DECODE_BUFFER_SIZE],
            input_start: 0,
            input_end: 0,
            output: vec![0; DECODE_BUFFER_SIZE],
            output_start: 0,
            output_end: 0,
            eof: false,
            finished: false,
            had_replacements: false,
        }
    }

    /// True once any malformed sequence has been replaced.
    pub fn had_replacements(&self) -> bool {
        self.had_replacements
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.output_start < self.output_end {
                let n = buf.len().min(self.output_end - self.output_start);
                buf[..n].copy_from_slice(&self.output[self.output_start..self.output_start + n]);
                self.output_start += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }

            if self.input_start == self.input_end && !self.eof {
                let n = self.inner.read(&mut self.input)?;
                self.input_start = 0;
                self.input_end = n;
                self.eof = n == 0;
            }

            let (result, read, written, had_errors) = self.decoder.decode_to_utf8(
                &self.input[self.input_start..self.input_end],
                &mut self.output,
                self.eof,
            );
            self.input_start += read;
            self.output_start = 0;
            self.output_end = written;
            self.had_replacements |= had_errors;

            if self.eof && result == CoderResult::InputEmpty {
                self.finished = true;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub chunk_size: usize,
    pub delimiter: u8,
    pub na_values: HashSet<String>,
    /// `Strict` rejects rows wider than the header instead of truncating them.
    pub schema_policy: SchemaPolicy,
}

/// One batch of rows, always carrying the full header schema.
#[derive(Debug)]
pub struct Chunk {
    pub frame: DataFrame,
    /// Rows that had more fields than the header and were truncated.
    pub ragged_rows: usize,
}

/// Lazy, finite sequence of fixed-row-count chunks over a delimited file.
pub struct ChunkedReader {
    reader: csv::Reader<DecodingReader<BufReader<File>>>,
    columns: Vec<String>,
    options: ReaderOptions,
    record: csv::StringRecord,
    rows_read: u64,
    done: bool,
}

impl ChunkedReader {
    pub fn open(path: &Path, encoding: &DetectedEncoding, options: ReaderOptions) -> Result<Self, AppError> {
        if options.chunk_size == 0 {
            return Err(AppError::InvalidInput("Chunk size must be positive".to_string()));
        }

        let file = File::open(path).map_err(|e| {
            AppError::FileProcessingError(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let decoded = DecodingReader::new(BufReader::new(file), encoding);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(decoded);

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(AppError::FileProcessingError(
                "No columns to parse from file".to_string(),
            ));
        }
        let columns = normalize_headers(headers.iter());
        tracing::debug!("Header parsed with {} columns", columns.len());

        Ok(Self {
            reader,
            columns,
            options,
            record: csv::StringRecord::new(),
            rows_read: 0,
            done: false,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn had_replacements(&self) -> bool {
        self.reader.get_ref().had_replacements()
    }

    /// Reads the next chunk, or `None` at end of file.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, AppError> {
        if self.done {
            return Ok(None);
        }

        let width = self.columns.len();
        let mut values: Vec<Vec<Option<String>>> = (0..width)
            .map(|_| Vec::with_capacity(self.options.chunk_size.min(MAX_PREALLOCATED_ROWS)))
            .collect();
        let mut height = 0;
        let mut ragged_rows = 0;

        while height < self.options.chunk_size {
            if !self.reader.read_record(&mut self.record)? {
                self.done = true;
                break;
            }
            if self.record.len() > width {
                if self.options.schema_policy == SchemaPolicy::Strict {
                    self.done = true;
                    let line = self.record.position().map(|p| p.line()).unwrap_or_default();
                    return Err(AppError::SchemaMismatch(format!(
                        "Row on line {} has {} fields but the header has {}",
                        line,
                        self.record.len(),
                        width
                    )));
                }
                ragged_rows += 1;
            }
            for (idx, column) in values.iter_mut().enumerate() {
                let cell = self
                    .record
                    .get(idx)
                    .filter(|v| !self.options.na_values.contains(*v))
                    .map(str::to_string);
                column.push(cell);
            }
            height += 1;
        }

        if height == 0 {
            return Ok(None);
        }
        self.rows_read += height as u64;

        let series: Vec<Series> = self
            .columns
            .iter()
            .zip(values)
            .map(|(name, column)| Series::new(name, column))
            .collect();
        let frame = DataFrame::new(series)?;

        Ok(Some(Chunk { frame, ragged_rows }))
    }
}

impl Iterator for ChunkedReader {
    type Item = Result<Chunk, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Blank names become `Unnamed: {i}`, repeats become `name.1`, `name.2`, ...
pub fn normalize_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut existing_names = HashSet::new();
    headers
        .enumerate()
        .map(|(idx, raw)| {
            let base = if raw.trim().is_empty() {
                format!("Unnamed: {}", idx)
            } else {
                raw.to_string()
            };

            let mut name = base.clone();
            let mut counter = 1;
            while !existing_names.insert(name.clone()) {
                name = format!("{}.{}", base, counter);
                counter += 1;
            }
            name
        })
        .collect()
}
