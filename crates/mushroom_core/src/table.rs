//! Tabular data exchanged between stages
//!
//! `RawTable` is the categorical dataset exactly as extracted from the
//! archive. `LabeledTable` is the integer feature table plus binary target
//! written by transformation and training.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;

use crate::encoder::{normalize_column_name, EncodedFrame};
use crate::errors::{PipelineError, Result};

/// Name of the target column in every table
pub const TARGET_COLUMN: &str = "class";

/// Placeholder the source dataset uses for unknown values
pub const MISSING_MARKER: &str = "?";

/// A single raw observation: column name to categorical code.
pub type RawRecord = BTreeMap<String, String>;

/// Categorical table with string cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Build a table; headers must stay unique once normalized.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(normalize_column_name(column)) {
                return Err(PipelineError::Transformation(format!(
                    "column '{column}' duplicates another header once normalized"
                )));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(PipelineError::Serialization(format!(
                    "row {}: expected {} cells, got {}",
                    i + 1,
                    columns.len(),
                    row.len()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// One-row table built from a record, columns in key order.
    pub fn from_record(record: &RawRecord) -> Result<Self> {
        let columns = record.keys().cloned().collect();
        let row = record.values().cloned().collect();
        Self::new(columns, vec![row])
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        if columns.is_empty() {
            return Err(PipelineError::Serialization("table has no header".to_string()));
        }

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Self::new(columns, rows)
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| row[index].as_str())
    }

    /// Remove `name` from the table and return its values.
    pub fn take_column(&mut self, name: &str) -> Option<Vec<String>> {
        let index = self.column_index(name)?;
        self.columns.remove(index);
        Some(self.rows.iter_mut().map(|row| row.remove(index)).collect())
    }

    /// Drop the named columns; unknown names are ignored.
    pub fn drop_columns(&mut self, names: &[String]) {
        let keep: Vec<bool> = self.columns.iter().map(|c| !names.contains(c)).collect();
        self.columns = retain_by_mask(std::mem::take(&mut self.columns), &keep);
        for row in &mut self.rows {
            *row = retain_by_mask(std::mem::take(row), &keep);
        }
    }

    /// Keep only rows whose mask entry is true.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let rows = std::mem::take(&mut self.rows);
        self.rows = rows
            .into_iter()
            .zip(keep.iter().copied().chain(std::iter::repeat(true)))
            .filter_map(|(row, k)| k.then_some(row))
            .collect();
    }
}

fn retain_by_mask<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, &k)| k.then_some(item))
        .collect()
}

/// Integer features plus a binary target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledTable {
    pub columns: Vec<String>,
    pub features: Vec<Vec<i64>>,
    pub targets: Vec<u8>,
}

impl LabeledTable {
    pub fn new(columns: Vec<String>, features: Vec<Vec<i64>>, targets: Vec<u8>) -> Result<Self> {
        if features.len() != targets.len() {
            return Err(PipelineError::Serialization(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        if let Some(row) = features.iter().find(|row| row.len() != columns.len()) {
            return Err(PipelineError::Serialization(format!(
                "feature row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            features,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.columns.len()
    }

    /// Rows at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
        }
    }

    /// Feature columns as an encoded frame, ready for schema reconciliation.
    pub fn to_frame(&self) -> EncodedFrame {
        EncodedFrame::new(self.columns.clone(), self.features.clone())
    }

    /// Read a table whose `class` column may sit anywhere in the header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let header: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let target_idx = header
            .iter()
            .position(|c| c == TARGET_COLUMN)
            .ok_or_else(|| {
                PipelineError::Serialization(format!("table has no '{TARGET_COLUMN}' column"))
            })?;
        let columns: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target_idx)
            .map(|(_, c)| c.clone())
            .collect();

        let mut features = Vec::new();
        let mut targets = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record?;
            let mut row = Vec::with_capacity(columns.len());
            for (i, cell) in record.iter().enumerate() {
                if i == target_idx {
                    targets.push(parse_target(cell, line + 2)?);
                } else {
                    row.push(parse_integer(cell, line + 2, &header[i])?);
                }
            }
            features.push(row);
        }

        Self::new(columns, features, targets)
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Serialize with the target as the last column.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        header.push(TARGET_COLUMN);
        writer.write_record(&header)?;

        for (row, target) in self.features.iter().zip(&self.targets) {
            let mut cells: Vec<String> = row.iter().map(i64::to_string).collect();
            cells.push(target.to_string());
            writer.write_record(&cells)?;
        }

        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| PipelineError::Serialization(e.to_string()))
    }
}

fn parse_integer(cell: &str, line: usize, column: &str) -> Result<i64> {
    if let Ok(v) = cell.parse::<i64>() {
        return Ok(v);
    }
    match cell.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.is_finite() => Ok(v as i64),
        _ => Err(PipelineError::Serialization(format!(
            "line {line}, column '{column}': '{cell}' is not an integer"
        ))),
    }
}

fn parse_target(cell: &str, line: usize) -> Result<u8> {
    match parse_integer(cell, line, TARGET_COLUMN)? {
        0 => Ok(0),
        1 => Ok(1),
        other => Err(PipelineError::Serialization(format!(
            "line {line}: target {other} is not a binary label"
        ))),
    }
}
