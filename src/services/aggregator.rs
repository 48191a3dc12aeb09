use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::AppError;

/// How `update` treats chunks whose columns differ from the first chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Unknown columns are ignored and missing known columns are skipped.
    #[default]
    Lenient,
    /// Any difference from the first chunk's columns is an error, and so is a
    /// row with more fields than the header.
    Strict,
}

/// Value counts for one column, remembering the order values were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyMap {
    index: HashMap<String, usize>,
    entries: Vec<(String, u64)>,
    total: u64,
}

impl FrequencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: &str, count: u64) {
        match self.index.get(value) {
            Some(&pos) => self.entries[pos].1 += count,
            None => {
                self.index.insert(value.to_string(), self.entries.len());
                self.entries.push((value.to_string(), count));
            }
        }
        self.total += count;
    }

    /// Adds every count of `other`; new values keep `other`'s first-seen order.
    pub fn merge(&mut self, other: &FrequencyMap) {
        for (value, count) in &other.entries {
            self.add(value, *count);
        }
    }

    pub fn get(&self, value: &str) -> Option<u64> {
        self.index.get(value).map(|&pos| self.entries[pos].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Values in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(v, c)| (v.as_str(), *c))
    }

    /// Up to `n` values by descending count; ties keep first-seen order.
    pub fn top_n(&self, n: usize) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self.iter().collect();
        // stable
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

/// Cumulative per-column frequency maps built chunk by chunk.
#[derive(Debug, Clone, Default)]
pub struct FrequencyAggregator {
    columns: Vec<String>,
    maps: HashMap<String, FrequencyMap>,
    policy: SchemaPolicy,
    chunks_seen: u64,
    rows_seen: u64,
}

impl FrequencyAggregator {
    pub fn new(policy: SchemaPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Fixes the column list up front, e.g. from a header row. No-op once columns are known.
    pub fn seed_columns(&mut self, columns: &[String]) {
        if self.columns.is_empty() {
            self.columns = columns.to_vec();
        }
    }

    /// Merges the value counts of `chunk` into the running totals.
    ///
    /// The first chunk fixes the column list. Call exactly once per chunk:
    /// feeding the same chunk twice counts it twice.
    pub fn update(&mut self, chunk: &DataFrame) -> Result<(), AppError> {
        let chunk_columns: Vec<String> = chunk
            .get_column_names()
            .iter()
            .map(|&s| s.to_string())
            .collect();

        if self.columns.is_empty() {
            self.columns = chunk_columns.clone();
        } else if self.policy == SchemaPolicy::Strict {
            self.check_schema(&chunk_columns)?;
        }

        // Compute every column before touching the totals so a failure leaves them unchanged.
        let mut local = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            if !chunk_columns.contains(name) {
                tracing::debug!("Column '{}' absent from chunk {}, skipping", name, self.chunks_seen + 1);
                continue;
            }
            let series = chunk.column(name)?;
            local.push((name.clone(), count_series(series)?));
        }

        for (name, counts) in local {
            self.maps.entry(name).or_default().merge(&counts);
        }
        self.chunks_seen += 1;
        self.rows_seen += chunk.height() as u64;
        Ok(())
    }

    fn check_schema(&self, chunk_columns: &[String]) -> Result<(), AppError> {
        if let Some(unknown) = chunk_columns.iter().find(|c| !self.columns.contains(c)) {
            return Err(AppError::SchemaMismatch(format!(
                "Column '{}' was not present in the first chunk",
                unknown
            )));
        }
        if let Some(missing) = self.columns.iter().find(|c| !chunk_columns.contains(c)) {
            return Err(AppError::SchemaMismatch(format!(
                "Column '{}' is missing from chunk {}",
                missing,
                self.chunks_seen + 1
            )));
        }
        Ok(())
    }

    /// Columns in the order of the first chunk.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn frequencies(&self, column: &str) -> Option<&FrequencyMap> {
        self.maps.get(column)
    }

    /// Columns paired with their maps; columns never counted get an empty map.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FrequencyMap)> + '_ {
        static EMPTY: once_cell::sync::Lazy<FrequencyMap> = once_cell::sync::Lazy::new(FrequencyMap::new);
        self.columns
            .iter()
            .map(|name| (name.as_str(), self.maps.get(name).unwrap_or(&*EMPTY)))
    }

    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }
}

/// Chunk-local counts of the non-null values in `series`.
fn count_series(series: &Series) -> Result<FrequencyMap, AppError> {
    let as_text = match series.dtype() {
        DataType::String => series.clone(),
        _ => series.cast(&DataType::String)?,
    };

    let mut counts = FrequencyMap::new();
    for value in as_text.str()?.into_iter().flatten() {
        counts.add(value, 1);
    }
    Ok(counts)
}
