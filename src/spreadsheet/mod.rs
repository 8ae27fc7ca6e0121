//! Single-sheet `.xlsx` codec for form ledgers.
//!
//! A ledger is a header row followed by one row per submitted form. Rows are
//! keyed by column name, so submissions with differing fields can share a file:
//! unknown keys widen the header, missing keys become empty cells.

use calamine::{Data, Reader, Xlsx};
use indexmap::IndexMap;
use rust_xlsxwriter::Workbook;
use std::io::Cursor;
use thiserror::Error;

/// One submitted form: column name to cell text, in submission order.
pub type Row = IndexMap<String, String>;

/// Excel's column limit (XFD).
const MAX_COLUMNS: usize = 16_384;

/// Excel's row limit minus the header row.
const MAX_DATA_ROWS: u32 = 1_048_575;

/// Workbook-level name holding the number of data rows. Cells cannot carry
/// an all-empty row, so the count is stored alongside them.
const ROW_COUNT_NAME: &str = "LedgerRows";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("Failed to read spreadsheet: {0}")]
    Read(#[from] calamine::XlsxError),

    #[error("Failed to write spreadsheet: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),

    #[error("Too many columns: {0} (max {MAX_COLUMNS})")]
    TooManyColumns(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Sheet {
    #[must_use]
    pub const fn new(headers: Vec<String>, rows: Vec<Row>) -> Self {
        Self { headers, rows }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    /// Appends `incoming` after the existing rows.
    ///
    /// Existing columns keep their position; keys not seen before are added
    /// in first-seen order. No de-duplication of rows.
    pub fn merge(&mut self, incoming: Vec<Row>) {
        for row in &incoming {
            for key in row.keys() {
                if !self.headers.iter().any(|header| header == key) {
                    self.headers.push(key.clone());
                }
            }
        }
        self.rows.extend(incoming);
    }
}

/// Reads the first worksheet of a ledger. Row 1 is the header row.
///
/// Trailing rows whose cells are all empty are restored from the row count
/// `encode` stores in the workbook.
pub fn decode(bytes: &[u8]) -> Result<Sheet, SheetError> {
    read_sheet(bytes, true)
}

/// Reads the first worksheet from cell contents alone, ignoring any stored
/// row count. For spreadsheets that did not come from `encode`.
pub fn decode_cells(bytes: &[u8]) -> Result<Sheet, SheetError> {
    read_sheet(bytes, false)
}

fn read_sheet(bytes: &[u8], use_stored_rows: bool) -> Result<Sheet, SheetError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;

    let stored_rows = if use_stored_rows {
        stored_row_count(workbook.defined_names())
    } else {
        None
    };

    let Some(range) = workbook.worksheet_range_at(0) else {
        return Ok(Sheet::default());
    };
    let range = range?;

    let (last_row, last_col) = match range.end() {
        Some((row, col)) => (Some(row), Some(col)),
        None => (None, None),
    };

    // Positions are absolute so leading blank rows/columns keep their place
    let cell = |row: u32, col: u32| -> String {
        range
            .get_value((row, col))
            .map(cell_text)
            .unwrap_or_default()
    };

    let headers: Vec<String> = match last_col {
        Some(last_col) => (0..=last_col).map(|col| cell(0, col)).collect(),
        None => Vec::new(),
    };

    let cell_rows = last_row.unwrap_or(0);
    let row_count = stored_rows.map_or(cell_rows, |stored| stored.max(cell_rows));

    let rows = (1..=row_count)
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .map(|(col, header)| {
                    let col = u32::try_from(col).unwrap_or(u32::MAX);
                    (header.clone(), cell(row, col))
                })
                .collect::<Row>()
        })
        .collect();

    Ok(Sheet { headers, rows })
}

/// Data row count from the `LedgerRows` defined name, capped at the sheet's
/// row limit.
fn stored_row_count(names: &[(String, String)]) -> Option<u32> {
    names
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(ROW_COUNT_NAME))
        .and_then(|(_, value)| value.trim().trim_start_matches('=').parse::<u32>().ok())
        .map(|rows| rows.min(MAX_DATA_ROWS))
}

/// Writes `sheet` as a single-worksheet workbook.
pub fn encode(sheet: &Sheet) -> Result<Vec<u8>, SheetError> {
    if sheet.headers.len() > MAX_COLUMNS {
        return Err(SheetError::TooManyColumns(sheet.headers.len()));
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, header) in sheet.headers.iter().enumerate() {
        let col = u16::try_from(col).map_err(|_| SheetError::TooManyColumns(col))?;
        worksheet.write_string(0, col, header)?;
    }

    for (index, row) in sheet.rows.iter().enumerate() {
        let row_num = u32::try_from(index + 1)
            .map_err(|_| rust_xlsxwriter::XlsxError::RowColumnLimitError)?;
        for (col, header) in sheet.headers.iter().enumerate() {
            let col = u16::try_from(col).map_err(|_| SheetError::TooManyColumns(col))?;
            let value = row.get(header).map_or("", String::as_str);
            if !value.is_empty() {
                worksheet.write_string(row_num, col, value)?;
            }
        }
    }

    workbook.define_name(ROW_COUNT_NAME, &format!("={}", sheet.rows.len()))?;

    Ok(workbook.save_to_buffer()?)
}

fn cell_text(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Bool(b) => b.to_string(),
        Data::Int(i) => i.to_string(),
        // f64 Display already drops a trailing ".0"
        Data::Float(f) => f.to_string(),
        other => other.to_string(),
    }
}
