use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{info, warn};
use polars::io::json::{JsonFormat, JsonWriter};
use polars::prelude::*;
use std::collections::HashMap;
use std::io::Cursor;

use crate::error::AnalysisError;
use crate::models::dataset::{
    ColumnKind, ColumnProfile, CorrelationPair, DatasetMetadata, FileType, ValueCount,
};
use crate::services::analytics::calculate_correlation;

/// Text columns with at most this many distinct values are categorical
const CATEGORICAL_MAX_UNIQUE: usize = 20;
/// ...or when distinct values make up at most this share of non-null rows
const CATEGORICAL_MAX_RATIO: f64 = 0.5;
const TOP_VALUES: usize = 10;

static EMPTY_CELL: Data = Data::Empty;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// A loaded table together with everything derived from it.
/// Never mutated after construction; a new upload builds a new `Dataset`.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
    metadata: DatasetMetadata,
}

impl Dataset {
    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Column values cast to f64; non-numeric cells become `None`.
    pub fn numeric_values(&self, column: &str) -> Result<Vec<Option<f64>>> {
        let series = self
            .frame
            .column(column)
            .with_context(|| format!("Unknown column '{}'", column))?;
        let casted = series.cast(&DataType::Float64)?;
        Ok(casted.f64()?.into_iter().collect())
    }

    pub fn text_values(&self, column: &str) -> Result<Vec<Option<String>>> {
        let series = self
            .frame
            .column(column)
            .with_context(|| format!("Unknown column '{}'", column))?;
        text_of(series)
    }

    pub fn datetime_values(&self, column: &str) -> Result<Vec<Option<NaiveDateTime>>> {
        Ok(self
            .text_values(column)?
            .into_iter()
            .map(|v| v.as_deref().and_then(parse_datetime))
            .collect())
    }

    /// First `rows` rows as a JSON array of records
    pub fn preview(&self, rows: usize) -> Result<serde_json::Value> {
        let mut head = self.frame.head(Some(rows));
        let mut buf = Vec::new();
        JsonWriter::new(&mut buf)
            .with_json_format(JsonFormat::Json)
            .finish(&mut head)
            .context("Failed to write DataFrame to JSON")?;
        serde_json::from_slice(&buf).context("Failed to parse JSON string into Value")
    }
}

/// Turns uploaded bytes into a profiled `Dataset`
#[derive(Clone, Debug, Default)]
pub struct DatasetProcessor;

impl DatasetProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Parse and profile an upload. Nothing is returned unless the whole file
    /// parsed, so callers never see a partial dataset.
    pub fn load(&self, file_name: &str, data: &[u8], sheet: Option<&str>) -> Result<Dataset, AnalysisError> {
        if data.is_empty() {
            return Err(AnalysisError::Parse("the file is empty".to_string()));
        }

        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        let (frame, file_type, sheet_names, active_sheet) = match extension.as_str() {
            "csv" => {
                let frame = self
                    .parse_csv_data(data)
                    .map_err(|e| AnalysisError::Parse(format!("{:#}", e)))?;
                (frame, FileType::Csv, Vec::new(), None)
            }
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => {
                let (frame, names, active) = self
                    .parse_spreadsheet_data(data, sheet)
                    .map_err(|e| AnalysisError::Parse(format!("{:#}", e)))?;
                (frame, FileType::Spreadsheet, names, Some(active))
            }
            _ => {
                return Err(AnalysisError::Parse(format!(
                    "unsupported file type '{}', expected CSV or Excel",
                    file_name
                )))
            }
        };

        if frame.width() == 0 {
            return Err(AnalysisError::Parse("no columns found".to_string()));
        }
        if frame.height() == 0 {
            return Err(AnalysisError::Parse("no data rows found".to_string()));
        }

        let metadata = self
            .generate_metadata(&frame, file_name, file_type, sheet_names, active_sheet)
            .map_err(|e| AnalysisError::Parse(format!("{:#}", e)))?;

        info!(
            "📊 Loaded '{}': {} rows, {} columns",
            file_name, metadata.row_count, metadata.column_count
        );
        Ok(Dataset { frame, metadata })
    }

    /// Parse raw CSV bytes into a `DataFrame`
    fn parse_csv_data(&self, csv_data: &[u8]) -> Result<DataFrame> {
        let cursor = Cursor::new(csv_data);
        let df = CsvReader::new(cursor)
            .infer_schema(Some(100))
            .has_header(true)
            .with_try_parse_dates(true)
            .finish()
            .context("Failed to parse CSV data")?;
        Ok(df)
    }

    /// Read one sheet (the named one, or the first) into a `DataFrame`.
    fn parse_spreadsheet_data(
        &self,
        data: &[u8],
        sheet: Option<&str>,
    ) -> Result<(DataFrame, Vec<String>, String)> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
            .context("Failed to open spreadsheet")?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        let active = match sheet {
            Some(name) if sheet_names.iter().any(|s| s == name) => name.to_string(),
            Some(name) => return Err(anyhow!("sheet '{}' not found", name)),
            None => sheet_names
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("spreadsheet contains no sheets"))?,
        };

        let range = workbook
            .worksheet_range(&active)
            .with_context(|| format!("Failed to read sheet '{}'", active))?;

        let mut rows = range
            .rows()
            .skip_while(|row| row.iter().all(|c| matches!(c, Data::Empty)));
        let header = rows.next().ok_or_else(|| anyhow!("sheet '{}' is empty", active))?;
        let names = header_names(header);

        let body: Vec<&[Data]> = rows
            .filter(|row| !row.iter().all(|c| matches!(c, Data::Empty)))
            .collect();

        let mut columns = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            let cells: Vec<&Data> = body.iter().map(|row| row.get(idx).unwrap_or(&EMPTY_CELL)).collect();
            columns.push(sheet_column(name, &cells));
        }

        let frame = DataFrame::new(columns).context("Failed to build table from sheet")?;
        Ok((frame, sheet_names, active))
    }

    /// Per-column profiles plus pairwise correlations
    fn generate_metadata(
        &self,
        df: &DataFrame,
        file_name: &str,
        file_type: FileType,
        sheet_names: Vec<String>,
        active_sheet: Option<String>,
    ) -> Result<DatasetMetadata> {
        let mut columns = Vec::with_capacity(df.width());
        let mut numeric: Vec<(String, Vec<Option<f64>>)> = Vec::new();

        for s in df.get_columns() {
            let profile = profile_column(s)?;
            if profile.kind == ColumnKind::Numeric {
                let casted = s.cast(&DataType::Float64)?;
                numeric.push((profile.name.clone(), casted.f64()?.into_iter().collect()));
            }
            columns.push(profile);
        }

        let mut correlations = Vec::new();
        for i in 0..numeric.len() {
            for j in (i + 1)..numeric.len() {
                let (left, lv) = &numeric[i];
                let (right, rv) = &numeric[j];
                match calculate_correlation(lv, rv) {
                    Ok((coefficient, observations)) => correlations.push(CorrelationPair {
                        left: left.clone(),
                        right: right.clone(),
                        coefficient,
                        observations,
                    }),
                    Err(e) => warn!("Skipping correlation {}-{}: {}", left, right, e),
                }
            }
        }

        Ok(DatasetMetadata {
            file_name: file_name.to_string(),
            file_type,
            sheet_names,
            active_sheet,
            row_count: df.height(),
            column_count: df.width(),
            columns,
            correlations,
        })
    }
}

fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn text_of(series: &Series) -> Result<Vec<Option<String>>> {
    let casted = series.cast(&DataType::Utf8)?;
    Ok(casted
        .utf8()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

fn profile_column(s: &Series) -> Result<ColumnProfile> {
    let name = s.name().to_string();
    let dtype = format!("{}", s.dtype());
    let null_count = s.null_count();

    let mut profile = if is_numeric_dtype(s.dtype()) {
        let mut profile = ColumnProfile::new(&name, ColumnKind::Numeric, dtype);
        let casted = s.cast(&DataType::Float64)?;
        let ca = casted.f64()?;
        profile.min = ca.min();
        profile.max = ca.max();
        profile.mean = ca.mean();
        profile.median = ca.median();
        profile.std_dev = ca.std(1);
        profile.percentile_25 = ca.quantile(0.25, QuantileInterpolOptions::Linear)?;
        profile.percentile_75 = ca.quantile(0.75, QuantileInterpolOptions::Linear)?;
        profile
    } else {
        let values = text_of(s)?;
        let kind = match s.dtype() {
            DataType::Date | DataType::Datetime(_, _) => ColumnKind::Datetime,
            DataType::Boolean => ColumnKind::Categorical,
            _ => infer_text_kind(&values),
        };
        let mut profile = ColumnProfile::new(&name, kind, dtype);
        match kind {
            ColumnKind::Categorical => profile.top_values = top_values(&values),
            ColumnKind::Datetime => {
                let mut dates: Vec<NaiveDateTime> = values.iter().flatten().filter_map(|v| parse_datetime(v)).collect();
                dates.sort();
                profile.first_date = dates.first().map(|d| d.to_string());
                profile.last_date = dates.last().map(|d| d.to_string());
            }
            _ => {}
        }
        profile
    };

    profile.null_count = null_count;
    profile.unique_count = s.n_unique().unwrap_or(0);
    Ok(profile)
}

fn infer_text_kind(values: &[Option<String>]) -> ColumnKind {
    let present: Vec<&str> = values.iter().flatten().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
    if present.is_empty() {
        return ColumnKind::Text;
    }
    if present.iter().all(|v| parse_datetime(v).is_some()) {
        return ColumnKind::Datetime;
    }

    let mut distinct: Vec<&str> = present.clone();
    distinct.sort_unstable();
    distinct.dedup();
    let ratio = distinct.len() as f64 / present.len() as f64;
    if distinct.len() <= CATEGORICAL_MAX_UNIQUE || ratio <= CATEGORICAL_MAX_RATIO {
        ColumnKind::Categorical
    } else {
        ColumnKind::Text
    }
}

fn top_values(values: &[Option<String>]) -> Vec<ValueCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values.iter().flatten() {
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount {
            value: value.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    ranked.truncate(TOP_VALUES);
    ranked
}

/// Accepts ISO dates/datetimes, a few common date layouts, and `YYYY-MM`.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    // Month granularity, e.g. 2023-07
    if raw.len() == 7 {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d") {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn header_names(header: &[Data]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let base = match cell {
                Data::Empty => format!("column_{}", idx + 1),
                other => {
                    let text = other.to_string().trim().to_string();
                    if text.is_empty() {
                        format!("column_{}", idx + 1)
                    } else {
                        text
                    }
                }
            };
            let n = seen.entry(base.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                base
            } else {
                format!("{}_{}", base, n)
            }
        })
        .collect()
}

/// Excel serial date (1900 system) to a timestamp
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::seconds(seconds))
}

fn sheet_column(name: &str, cells: &[&Data]) -> Series {
    let present: Vec<&&Data> = cells
        .iter()
        .filter(|c| !matches!(c, Data::Empty | Data::Error(_)))
        .collect();

    let all_numeric = !present.is_empty() && present.iter().all(|c| matches!(c, Data::Float(_) | Data::Int(_)));
    let all_bool = !present.is_empty() && present.iter().all(|c| matches!(c, Data::Bool(_)));

    if all_numeric {
        let values: Vec<Option<f64>> = cells
            .iter()
            .map(|c| match c {
                Data::Float(f) => Some(*f),
                Data::Int(i) => Some(*i as f64),
                _ => None,
            })
            .collect();
        return Series::new(name, values);
    }

    if all_bool {
        let values: Vec<Option<bool>> = cells
            .iter()
            .map(|c| match c {
                Data::Bool(b) => Some(*b),
                _ => None,
            })
            .collect();
        return Series::new(name, values);
    }

    let values: Vec<Option<String>> = cells
        .iter()
        .map(|c| match c {
            Data::Empty | Data::Error(_) => None,
            Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()).map(|d| d.to_string()),
            Data::String(s) if s.trim().is_empty() => None,
            other => Some(other.to_string()),
        })
        .collect();
    Series::new(name, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALES_CSV: &str = "date,region,sales,units\n\
2023-01-01,north,100.5,10\n\
2023-02-01,south,110.0,12\n\
2023-03-01,north,120.0,13\n\
2023-04-01,east,,15\n\
2023-05-01,south,140.0,16\n";

    #[test]
    fn test_csv_profile_infers_kinds() {
        let dataset = DatasetProcessor::new()
            .load("sales.csv", SALES_CSV.as_bytes(), None)
            .unwrap();
        let meta = dataset.metadata();

        assert_eq!(meta.row_count, 5);
        assert_eq!(meta.column_count, 4);
        assert_eq!(meta.file_type, FileType::Csv);
        assert!(meta.is_kind("date", ColumnKind::Datetime));
        assert!(meta.is_kind("region", ColumnKind::Categorical));
        assert!(meta.is_kind("sales", ColumnKind::Numeric));
        assert!(meta.is_kind("units", ColumnKind::Numeric));

        let sales = meta.column("sales").unwrap();
        assert_eq!(sales.null_count, 1);
        assert_eq!(sales.max, Some(140.0));
        assert_eq!(sales.min, Some(100.5));

        let region = meta.column("region").unwrap();
        assert_eq!(region.top_values[0].value, "north");
        assert_eq!(region.top_values[0].count, 2);

        let date = meta.column("date").unwrap();
        assert!(date.first_date.as_deref().unwrap().starts_with("2023-01-01"));
        assert!(date.last_date.as_deref().unwrap().starts_with("2023-05-01"));
    }

    #[test]
    fn test_correlations_cover_numeric_pairs() {
        let dataset = DatasetProcessor::new()
            .load("sales.csv", SALES_CSV.as_bytes(), None)
            .unwrap();
        let corr = &dataset.metadata().correlations;
        assert_eq!(corr.len(), 1);
        assert_eq!(corr[0].left, "sales");
        assert_eq!(corr[0].right, "units");
        assert_eq!(corr[0].observations, 4);
        assert!(corr[0].coefficient > 0.9);
    }

    #[test]
    fn test_datetime_values_parse_dates() {
        let dataset = DatasetProcessor::new()
            .load("sales.csv", SALES_CSV.as_bytes(), None)
            .unwrap();
        let dates = dataset.datetime_values("date").unwrap();
        assert_eq!(dates.len(), 5);
        assert!(dates.iter().all(|d| d.is_some()));
    }

    #[test]
    fn test_empty_file_is_parse_error() {
        let err = DatasetProcessor::new().load("empty.csv", b"", None).unwrap_err();
        assert!(matches!(err, AnalysisError::Parse(_)));
    }

    #[test]
    fn test_header_only_is_parse_error() {
        let err = DatasetProcessor::new().load("h.csv", b"a,b\n", None).unwrap_err();
        assert!(matches!(err, AnalysisError::Parse(_)));
    }

    #[test]
    fn test_unsupported_extension_is_parse_error() {
        let err = DatasetProcessor::new().load("notes.txt", b"hello", None).unwrap_err();
        assert!(matches!(err, AnalysisError::Parse(msg) if msg.contains("unsupported")));
    }

    /// Two-sheet workbook: a notes sheet first, then dated sales
    fn workbook() -> Vec<u8> {
        use rust_xlsxwriter::{Format, Workbook};

        let mut workbook = Workbook::new();
        let date = Format::new().set_num_format("yyyy-mm-dd");

        let notes = workbook.add_worksheet();
        notes.set_name("Notes").unwrap();
        notes.write_string(0, 0, "note").unwrap();
        notes.write_string(1, 0, "see the Sales sheet").unwrap();

        let sales = workbook.add_worksheet();
        sales.set_name("Sales").unwrap();
        for (col, header) in ["date", "region", "sales"].iter().enumerate() {
            sales.write_string(0, col as u16, *header).unwrap();
        }
        // Excel serials for 2023-01-01, 2023-02-01 and 2023-03-01
        let rows = [(44927.0, "north", 100.0), (44958.0, "south", 110.5), (44986.0, "north", 120.0)];
        for (i, (serial, region, amount)) in rows.iter().enumerate() {
            let row = i as u32 + 1;
            sales.write_number_with_format(row, 0, *serial, &date).unwrap();
            sales.write_string(row, 1, *region).unwrap();
            sales.write_number(row, 2, *amount).unwrap();
        }
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_workbook_defaults_to_first_sheet() {
        let dataset = DatasetProcessor::new().load("book.xlsx", &workbook(), None).unwrap();
        let meta = dataset.metadata();
        assert_eq!(meta.file_type, FileType::Spreadsheet);
        assert_eq!(meta.sheet_names, vec!["Notes", "Sales"]);
        assert_eq!(meta.active_sheet.as_deref(), Some("Notes"));
        assert_eq!(meta.row_count, 1);
        assert_eq!(meta.columns[0].name, "note");
    }

    #[test]
    fn test_workbook_named_sheet_with_excel_dates() {
        let dataset = DatasetProcessor::new()
            .load("book.xlsx", &workbook(), Some("Sales"))
            .unwrap();
        let meta = dataset.metadata();
        assert_eq!(meta.active_sheet.as_deref(), Some("Sales"));
        assert_eq!(meta.sheet_names.len(), 2);
        assert_eq!(meta.row_count, 3);
        assert!(meta.is_kind("date", ColumnKind::Datetime));
        assert!(meta.is_kind("sales", ColumnKind::Numeric));

        let date = meta.column("date").unwrap();
        assert!(date.first_date.as_deref().unwrap().starts_with("2023-01-01"));
        assert!(date.last_date.as_deref().unwrap().starts_with("2023-03-01"));

        let dates = dataset.datetime_values("date").unwrap();
        assert_eq!(
            dates[1],
            NaiveDate::from_ymd_opt(2023, 2, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(dataset.numeric_values("sales").unwrap()[1], Some(110.5));
    }

    #[test]
    fn test_workbook_unknown_sheet_is_parse_error() {
        let err = DatasetProcessor::new()
            .load("book.xlsx", &workbook(), Some("Budget"))
            .unwrap_err();
        match err {
            AnalysisError::Parse(msg) => assert!(msg.contains("sheet 'Budget' not found"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_spreadsheet_is_parse_error() {
        let err = DatasetProcessor::new()
            .load("book.xlsx", b"definitely not a zip archive", None)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Parse(_)));
    }

    #[test]
    fn test_preview_returns_records() {
        let dataset = DatasetProcessor::new()
            .load("sales.csv", SALES_CSV.as_bytes(), None)
            .unwrap();
        let preview = dataset.preview(2).unwrap();
        let rows = preview.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["region"], "north");
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2023-07-15").is_some());
        assert!(parse_datetime("2023-07").is_some());
        assert!(parse_datetime("2023-07-15 08:30:00").is_some());
        assert!(parse_datetime("07/15/2023").is_some());
        assert!(parse_datetime("north").is_none());
        assert!(parse_datetime("42").is_none());
    }

    #[test]
    fn test_header_names_fill_and_dedupe() {
        let header = vec![
            Data::String("a".to_string()),
            Data::Empty,
            Data::String("a".to_string()),
        ];
        assert_eq!(header_names(&header), vec!["a", "column_2", "a_2"]);
    }

    #[test]
    fn test_sheet_column_types() {
        let cells = [Data::Float(1.0), Data::Int(2), Data::Empty];
        let refs: Vec<&Data> = cells.iter().collect();
        let s = sheet_column("n", &refs);
        assert_eq!(s.dtype(), &DataType::Float64);
        assert_eq!(s.null_count(), 1);

        let cells = [Data::String("x".to_string()), Data::Float(3.0)];
        let refs: Vec<&Data> = cells.iter().collect();
        assert_eq!(sheet_column("m", &refs).dtype(), &DataType::Utf8);
    }

    #[test]
    fn test_excel_serial_conversion() {
        let dt = excel_serial_to_datetime(45_000.5).unwrap();
        assert_eq!(dt.to_string(), "2023-03-15 12:00:00");
    }
}
