//! Immutable, named dataset values.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique snapshot identity. Two snapshots never share an id even
/// when their contents are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(u64);

impl SnapshotId {
    fn next() -> Self {
        Self(NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Semantic column type shown to users; independent of the physical dtype width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Integer,
    Float,
    String,
    Boolean,
    Datetime,
    Categorical,
}

impl SemanticType {
    pub fn from_dtype(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Self::Integer,
            DataType::Float32 | DataType::Float64 => Self::Float,
            DataType::Boolean => Self::Boolean,
            DataType::Date | DataType::Datetime(_, _) | DataType::Time | DataType::Duration(_) => {
                Self::Datetime
            }
            DataType::Categorical(..) | DataType::Enum(..) => Self::Categorical,
            _ => Self::String,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Categorical => "categorical",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub semantic_type: SemanticType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

/// Columns of a frame in order, with inferred semantic types.
pub fn columns_of(df: &DataFrame) -> Vec<ColumnInfo> {
    df.get_columns()
        .iter()
        .map(|c| ColumnInfo::new(c.name().as_str(), SemanticType::from_dtype(c.dtype())))
        .collect()
}

/// Read-only metadata about a stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDescription {
    pub row_count: usize,
    pub column_types: BTreeMap<String, SemanticType>,
    pub missing_counts: BTreeMap<String, usize>,
    pub memory_estimate: usize,
}

/// A named tabular value. Cloning is cheap; the frame is shared.
#[derive(Debug, Clone)]
pub struct Snapshot {
    id: SnapshotId,
    name: String,
    frame: Arc<DataFrame>,
}

impl Snapshot {
    /// Wrap a frame, normalizing float NaN to null so every engine sees the
    /// same missing values.
    pub fn new(name: impl Into<String>, df: DataFrame) -> PolarsResult<Self> {
        let df = normalize_missing(df)?;
        Ok(Self::from_normalized(name, df))
    }

    /// Wrap engine output that was produced from normalized inputs.
    pub(crate) fn from_normalized(name: impl Into<String>, df: DataFrame) -> Self {
        Self {
            id: SnapshotId::next(),
            name: name.into(),
            frame: Arc::new(df),
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn columns(&self) -> Vec<ColumnInfo> {
        columns_of(&self.frame)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Same contents under a new name and a fresh identity.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            id: SnapshotId::next(),
            name: name.into(),
            frame: Arc::clone(&self.frame),
        }
    }

    /// Same snapshot under another name. Used when a dataset is renamed, so
    /// history links by id stay valid.
    pub(crate) fn relabeled(&self, name: impl Into<String>) -> Self {
        Self {
            id: self.id,
            name: name.into(),
            frame: Arc::clone(&self.frame),
        }
    }

    pub fn describe(&self) -> SnapshotDescription {
        let mut column_types = BTreeMap::new();
        let mut missing_counts = BTreeMap::new();
        for c in self.frame.get_columns() {
            let name = c.name().to_string();
            column_types.insert(name.clone(), SemanticType::from_dtype(c.dtype()));
            missing_counts.insert(name, c.null_count());
        }
        SnapshotDescription {
            row_count: self.frame.height(),
            column_types,
            missing_counts,
            memory_estimate: self.frame.estimated_size(),
        }
    }
}

fn normalize_missing(df: DataFrame) -> PolarsResult<DataFrame> {
    let float_cols: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| matches!(c.dtype(), DataType::Float32 | DataType::Float64))
        .map(|c| c.name().to_string())
        .collect();
    if float_cols.is_empty() {
        return Ok(df);
    }
    let exprs: Vec<Expr> = float_cols
        .iter()
        .map(|name| col(name.as_str()).fill_nan(lit(NULL)))
        .collect();
    df.lazy().with_columns(exprs).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_types() {
        let df = df!(
            "i" => [1i64, 2],
            "f" => [1.5f64, 2.5],
            "s" => ["a", "b"],
            "b" => [true, false]
        )
        .unwrap();
        let snap = Snapshot::new("t", df).unwrap();
        let types: Vec<SemanticType> = snap.columns().iter().map(|c| c.semantic_type).collect();
        assert_eq!(
            types,
            vec![
                SemanticType::Integer,
                SemanticType::Float,
                SemanticType::String,
                SemanticType::Boolean
            ]
        );
    }

    #[test]
    fn test_nan_normalized_to_null() {
        let df = df!("x" => [1.0f64, f64::NAN, 3.0]).unwrap();
        let snap = Snapshot::new("t", df).unwrap();
        let desc = snap.describe();
        assert_eq!(desc.missing_counts.get("x"), Some(&1));
        assert_eq!(desc.row_count, 3);
    }

    #[test]
    fn test_ids_are_unique() {
        let df = df!("x" => [1i64]).unwrap();
        let a = Snapshot::new("t", df).unwrap();
        let b = a.renamed("u");
        assert_ne!(a.id(), b.id());
        assert_eq!(b.name(), "u");
        assert_eq!(b.row_count(), 1);
    }
}
