use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::AppError;

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedEncoding {
    pub encoding: &'static Encoding,
    /// Name shown to the user. `ascii` is reported separately even though it decodes as UTF-8.
    pub label: &'static str,
    pub had_bom: bool,
}

impl DetectedEncoding {
    fn of(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            label: encoding.name(),
            had_bom: false,
        }
    }
}

impl Default for DetectedEncoding {
    fn default() -> Self {
        Self::of(UTF_8)
    }
}

/// Reads up to `size` bytes from the start of `path`.
pub fn read_sample(path: &Path, size: usize) -> Result<Vec<u8>, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::FileProcessingError(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut sample = Vec::with_capacity(size);
    file.take(size as u64).read_to_end(&mut sample)?;
    Ok(sample)
}

/// Guesses the text encoding of `sample`. Never fails; UTF-8 is the fallback.
///
/// BOM, plain ASCII and valid UTF-8 are settled directly. Anything else goes
/// through a statistical detector over the legacy single and multi-byte encodings.
pub fn detect_encoding(sample: &[u8]) -> DetectedEncoding {
    if sample.is_empty() {
        return DetectedEncoding::default();
    }

    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return DetectedEncoding {
            encoding,
            label: encoding.name(),
            had_bom: true,
        };
    }

    if sample.is_ascii() {
        return DetectedEncoding {
            encoding: UTF_8,
            label: "ascii",
            had_bom: false,
        };
    }

    match std::str::from_utf8(sample) {
        Ok(_) => DetectedEncoding::of(UTF_8),
        // The sample may cut a multi-byte sequence in half.
        Err(e) if e.error_len().is_none() => DetectedEncoding::of(UTF_8),
        Err(_) => {
            let mut detector = EncodingDetector::new();
            detector.feed(sample, true);
            DetectedEncoding::of(detector.guess(None, false))
        }
    }
}

/// Picks the field delimiter from the first decoded line.
///
/// A comma outside quotes always wins; otherwise the most frequent candidate does.
pub fn sniff_delimiter(sample: &[u8], encoding: &DetectedEncoding) -> u8 {
    let (text, _) = encoding.encoding.decode_with_bom_removal(sample);
    let first_line = text.lines().next().unwrap_or_default();

    if count_unquoted(first_line, b',') > 0 {
        return b',';
    }

    let mut best = (b',', 0usize);
    for candidate in DELIMITER_CANDIDATES {
        let count = count_unquoted(first_line, candidate);
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

fn count_unquoted(line: &str, candidate: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for byte in line.bytes() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b if b == candidate && !in_quotes => count += 1,
            _ => {}
        }
    }
    count
}
