//! Rough chunk-count estimate used only for progress text.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkEstimate {
    pub avg_row_size: f64,
    pub total_chunks: u64,
}

/// Average bytes per record in `sample`, or `fallback` when it holds no newline.
pub fn average_row_size(sample: &[u8], fallback: f64) -> f64 {
    let newlines = sample.iter().filter(|&&b| b == b'\n').count();
    if newlines == 0 {
        fallback
    } else {
        sample.len() as f64 / newlines as f64
    }
}

/// `ceil(file_size / (chunk_size * avg_row_size))`, never below 1.
pub fn estimate_total_chunks(file_size: u64, chunk_size: usize, avg_row_size: f64) -> u64 {
    let chunk_bytes = chunk_size as f64 * avg_row_size;
    if !chunk_bytes.is_finite() || chunk_bytes <= 0.0 {
        return 1;
    }
    let chunks = (file_size as f64 / chunk_bytes).ceil();
    if chunks.is_finite() && chunks >= 1.0 {
        chunks as u64
    } else {
        1
    }
}

pub fn estimate(sample: &[u8], file_size: u64, chunk_size: usize, fallback: f64) -> ChunkEstimate {
    let avg_row_size = average_row_size(sample, fallback);
    ChunkEstimate {
        avg_row_size,
        total_chunks: estimate_total_chunks(file_size, chunk_size, avg_row_size),
    }
}
