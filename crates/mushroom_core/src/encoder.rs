//! Feature encoding contract shared by training and inference
//!
//! One-hot encoding is fit fresh on whatever it is given, so the columns it
//! produces depend on the data: a full training batch yields one column per
//! observed category value, a single inference record yields one column per
//! field. The `FeatureSchema` is the persisted list of columns a model was fit
//! on, and `FeatureSchema::reconcile` is the only way to obtain a
//! `FeatureMatrix`, the input type the classifier accepts. Missing expected
//! columns are synthesized as zero, unexpected ones are dropped, and the
//! column order always follows the schema, whatever the row count.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};
use crate::table::{RawRecord, RawTable};

/// Columns the shipped mushroom model was fit on.
pub const EXPECTED_FEATURES: [&str; 19] = [
    "bruises_f",
    "bruises_t",
    "odor_f",
    "odor_n",
    "gill_spacing_w",
    "gill_size_b",
    "gill_size_n",
    "gill_color_b",
    "stalk_surface_above_ring_k",
    "stalk_surface_above_ring_s",
    "stalk_surface_below_ring_k",
    "stalk_surface_below_ring_s",
    "ring_type_l",
    "ring_type_p",
    "spore_print_color_h",
    "spore_print_color_k",
    "spore_print_color_n",
    "spore_print_color_w",
    "population_v",
];

/// Hyphens become underscores so dataset headers and API field names agree.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().replace('-', "_")
}

/// Integer frame produced by an encoder; columns are data-dependent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    columns: Vec<String>,
    rows: Vec<Vec<i64>>,
}

impl EncodedFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<i64>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<i64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<i64>>) {
        (self.columns, self.rows)
    }
}

/// Categories learned per column, sorted lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    categories: Vec<(String, Vec<String>)>,
}

impl OneHotEncoder {
    /// Learn the categories present in `table`.
    ///
    /// Two headers that normalize to the same name are rejected; encoding
    /// both under one name would drop one column's values.
    pub fn fit(table: &RawTable) -> Result<Self> {
        let mut categories: Vec<(String, Vec<String>)> = Vec::with_capacity(table.columns().len());
        let mut seen = HashSet::new();
        for (idx, column) in table.columns().iter().enumerate() {
            let name = normalize_column_name(column);
            if !seen.insert(name.clone()) {
                return Err(PipelineError::Transformation(format!(
                    "columns normalize to the same name '{name}'"
                )));
            }
            let values: BTreeSet<&str> = table.column_values(idx).collect();
            categories.push((name, values.into_iter().map(str::to_string).collect()));
        }
        Ok(Self { categories })
    }

    /// Output column names, `<column>_<value>`.
    pub fn feature_names(&self) -> Vec<String> {
        self.categories
            .iter()
            .flat_map(|(column, values)| values.iter().map(move |v| format!("{column}_{v}")))
            .collect()
    }

    /// Encode `table`; values not seen during `fit` encode as all zeros.
    pub fn transform(&self, table: &RawTable) -> Result<EncodedFrame> {
        let by_name: HashMap<String, usize> = table
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (normalize_column_name(c), i))
            .collect();

        let mut plan = Vec::with_capacity(self.categories.len());
        for (column, values) in &self.categories {
            let idx = by_name.get(column).copied().ok_or_else(|| {
                PipelineError::Transformation(format!("column '{column}' missing from input"))
            })?;
            let positions: HashMap<&str, usize> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (v.as_str(), i))
                .collect();
            plan.push((idx, values.len(), positions));
        }

        let width: usize = plan.iter().map(|(_, n, _)| n).sum();
        let rows = table
            .rows()
            .iter()
            .map(|row| {
                let mut encoded = vec![0i64; width];
                let mut offset = 0;
                for (idx, n, positions) in &plan {
                    if let Some(&pos) = positions.get(row[*idx].as_str()) {
                        encoded[offset + pos] = 1;
                    }
                    offset += n;
                }
                encoded
            })
            .collect();

        Ok(EncodedFrame::new(self.feature_names(), rows))
    }

    pub fn fit_transform(table: &RawTable) -> Result<EncodedFrame> {
        Self::fit(table)?.transform(table)
    }
}

/// Ordered list of encoded columns a model was fit on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema; names are normalized and must be unique.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns: Vec<String> = columns
            .into_iter()
            .map(|c| normalize_column_name(c.as_ref()))
            .collect();

        let mut seen = HashSet::new();
        for column in &columns {
            if column.is_empty() {
                return Err(PipelineError::Config("feature schema has an empty column".into()));
            }
            if !seen.insert(column.as_str()) {
                return Err(PipelineError::Config(format!(
                    "feature schema lists '{column}' twice"
                )));
            }
        }
        Ok(Self { columns })
    }

    /// The hardcoded schema of the shipped model.
    pub fn mushroom_default() -> Self {
        Self {
            columns: EXPECTED_FEATURES.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// BLAKE3 over the ordered column names, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for column in &self.columns {
            hasher.update(column.as_bytes());
            hasher.update(&[0u8]);
        }
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Project an encoded frame onto this schema.
    pub fn reconcile(&self, frame: &EncodedFrame) -> FeatureMatrix {
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (i, column) in frame.columns().iter().enumerate() {
            by_name.entry(normalize_column_name(column)).or_insert(i);
        }
        let sources: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| by_name.get(c).copied())
            .collect();

        let rows = frame
            .rows()
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .map(|src| src.map(|i| row[i]).unwrap_or(0))
                    .collect()
            })
            .collect();

        FeatureMatrix {
            fingerprint: self.fingerprint(),
            columns: self.columns.clone(),
            rows,
        }
    }
}

/// Rows laid out exactly as a `FeatureSchema` prescribes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMatrix {
    fingerprint: String,
    columns: Vec<String>,
    rows: Vec<Vec<i64>>,
}

impl FeatureMatrix {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<i64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<i64> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| r[col])
    }
}

/// Encode one raw record into the space described by `schema`.
pub fn encode_record(record: &RawRecord, schema: &FeatureSchema) -> Result<FeatureMatrix> {
    let table = RawTable::from_record(record)?;
    let frame = OneHotEncoder::fit_transform(&table)?;
    Ok(schema.reconcile(&frame))
}
