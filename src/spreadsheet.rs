//! Spreadsheet export discovery and reading.
//!
//! Exports are CSV files or Excel workbooks named `<statement_type>.<ext>` or
//! `<SYMBOL>_<statement_type>.<ext>`. Rows are read verbatim (ragged rows included)
//! so the normalizer can decide what to keep. Workbooks are read from their first
//! worksheet.

use calamine::{open_workbook_auto, Data, Reader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{PayloadSource, RawPayload, RawTable, StatementType};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("cannot read workbook {path}: {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("workbook {0} has no worksheets")]
    NoWorksheet(PathBuf),
    #[error("no statement exports found in {0}")]
    NoExports(PathBuf),
}

const WORKBOOK_EXTENSIONS: [&str; 4] = ["xlsx", "xlsm", "xlsb", "xls"];

/// On-disk layout of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExportFormat {
    Csv,
    Workbook,
}

/// A recognised export file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExportFile {
    pub path: PathBuf,
    pub symbol: Option<String>,
    pub statement_type: StatementType,
    pub format: ExportFormat,
}

/// Work out symbol and statement type from a file stem
pub fn classify_export(path: &Path) -> Option<ExportFile> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let format = if extension == "csv" {
        ExportFormat::Csv
    } else if WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
        ExportFormat::Workbook
    } else {
        return None;
    };
    let stem = path.file_stem()?.to_str()?;

    if let Ok(statement_type) = stem.parse::<StatementType>() {
        return Some(ExportFile {
            path: path.to_path_buf(),
            symbol: None,
            statement_type,
            format,
        });
    }

    let (symbol, rest) = stem.split_once('_')?;
    let statement_type = rest.parse::<StatementType>().ok()?;
    let symbol = symbol.trim().to_ascii_uppercase();
    (!symbol.is_empty()).then(|| ExportFile {
        path: path.to_path_buf(),
        symbol: Some(symbol),
        statement_type,
        format,
    })
}

/// List every export in a directory, sorted by path
pub fn discover_exports(dir: &Path) -> Result<Vec<ExportFile>, ImportError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ImportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut exports = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ImportError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if !path.is_file() {
            continue;
        }
        match classify_export(&path) {
            Some(export) => exports.push(export),
            None => warn!("Skipping unrecognised file {}", path.display()),
        }
    }

    if exports.is_empty() {
        return Err(ImportError::NoExports(dir.to_path_buf()));
    }
    exports.sort();
    info!("📂 Found {} statement exports in {}", exports.len(), dir.display());
    Ok(exports)
}

/// Read one export. The first non-blank row is the header row.
pub fn read_export(export: &ExportFile) -> Result<RawPayload, ImportError> {
    let (headers, rows) = match export.format {
        ExportFormat::Csv => read_csv(&export.path)?,
        ExportFormat::Workbook => read_workbook(&export.path)?,
    };

    Ok(RawPayload {
        symbol: export.symbol.clone(),
        statement_type: export.statement_type,
        source: PayloadSource::Spreadsheet(export.path.clone()),
        table: RawTable::new(headers, rows),
    })
}

fn is_blank_row(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().trim_start_matches('\u{feff}').is_empty())
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), ImportError> {
    let csv_error = |source| ImportError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;

    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        if headers.is_none() {
            if is_blank_row(&cells) {
                continue;
            }
            headers = Some(cells);
        } else {
            rows.push(cells);
        }
    }
    Ok((headers.unwrap_or_default(), rows))
}

/// Cell text as a CSV export of the same sheet would show it. Dates stay Excel
/// serial numbers, which the normalizer already understands.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().trunc().to_string(),
    }
}

fn used_width(cells: &[String]) -> usize {
    cells.iter().rposition(|c| !c.is_empty()).map_or(0, |i| i + 1)
}

fn read_workbook(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), ImportError> {
    let workbook_error = |source| ImportError::Workbook {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook = open_workbook_auto(path).map_err(workbook_error)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::NoWorksheet(path.to_path_buf()))?
        .map_err(workbook_error)?;

    let mut sheet_rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .skip_while(|cells| is_blank_row(cells));
    let Some(mut headers) = sheet_rows.next() else {
        return Ok((Vec::new(), Vec::new()));
    };

    // The used range is rectangular; trailing padding is not part of a row
    let width = used_width(&headers);
    headers.truncate(width);
    let rows = sheet_rows
        .map(|mut cells| {
            let keep = used_width(&cells).max(width);
            cells.truncate(keep);
            cells
        })
        .collect();
    Ok((headers, rows))
}
