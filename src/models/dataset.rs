use serde::{Deserialize, Serialize};
use std::fmt;

/// Inferred semantic type of a column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Datetime,
    Text,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical",
            ColumnKind::Datetime => "datetime",
            ColumnKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// Statistics for a single column in the dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    /// Storage type as reported by the frame
    pub dtype: String,
    pub null_count: usize,
    pub unique_count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std_dev: Option<f64>,
    pub percentile_25: Option<f64>,
    pub percentile_75: Option<f64>,
    /// Most frequent values, count descending
    pub top_values: Vec<ValueCount>,
    /// First/last value for datetime columns, ISO formatted
    pub first_date: Option<String>,
    pub last_date: Option<String>,
}

impl ColumnProfile {
    pub fn new(name: impl Into<String>, kind: ColumnKind, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            dtype: dtype.into(),
            null_count: 0,
            unique_count: 0,
            min: None,
            max: None,
            mean: None,
            median: None,
            std_dev: None,
            percentile_25: None,
            percentile_75: None,
            top_values: Vec::new(),
            first_date: None,
            last_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Pearson correlation between two numeric columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationPair {
    pub left: String,
    pub right: String,
    pub coefficient: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Spreadsheet,
}

/// Everything derived from a loaded dataset. Rebuilt from scratch on every upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetMetadata {
    pub file_name: String,
    pub file_type: FileType,
    /// All sheets in the workbook; empty for CSV
    pub sheet_names: Vec<String>,
    pub active_sheet: Option<String>,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub correlations: Vec<CorrelationPair>,
}

impl DatasetMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn columns_of(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Numeric)
    }

    pub fn datetime_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Datetime)
    }

    pub fn categorical_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Categorical)
    }

    pub fn is_kind(&self, name: &str, kind: ColumnKind) -> bool {
        self.column(name).map(|c| c.kind == kind).unwrap_or(false)
    }
}
