//! In-memory workbook model
//!
//! Every store operation is an open-modify-save cycle: the whole workbook is
//! read into a grid of cell text with calamine, edited, and written back out
//! with rust_xlsxwriter. Nothing is cached between calls.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader, Xlsx, open_workbook};
use chrono::{Duration, NaiveDate};
use rust_xlsxwriter::Workbook as XlsxWorkbook;

/// A worksheet as rows of cell text. Row 0 is physical row 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    /// Create a sheet with a single header row
    pub fn with_header(name: impl Into<String>, header: &[&str]) -> Self {
        let mut sheet = Sheet::new(name);
        sheet
            .rows
            .push(header.iter().map(|h| h.to_string()).collect());
        sheet
    }

    /// Cell text, empty when the cell was never written
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn set_cell(&mut self, row: usize, col: usize, value: impl Into<String>) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = value.into();
    }

    pub fn row_is_empty(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .is_none_or(|cells| cells.iter().all(|c| c.trim().is_empty()))
    }

    /// Widest populated row
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(|r| {
                r.iter()
                    .rposition(|c| !c.trim().is_empty())
                    .map_or(0, |i| i + 1)
            })
            .max()
            .unwrap_or(0)
    }

    /// Find a column in `header_row` by case-insensitive, trimmed name
    pub fn column_index(&self, header_row: usize, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.rows.get(header_row).and_then(|cells| {
            cells
                .iter()
                .position(|c| c.trim().eq_ignore_ascii_case(wanted))
        })
    }

    /// Find a column by name, appending it to the header row when missing
    pub fn ensure_column(&mut self, header_row: usize, name: &str) -> usize {
        if let Some(col) = self.column_index(header_row, name) {
            return col;
        }
        let col = self
            .rows
            .get(header_row)
            .map(|cells| {
                cells
                    .iter()
                    .rposition(|c| !c.trim().is_empty())
                    .map_or(0, |i| i + 1)
            })
            .unwrap_or(0);
        self.set_cell(header_row, col, name);
        col
    }

    /// Index of the last row holding any content, plus one
    pub fn used_rows(&self) -> usize {
        self.rows
            .iter()
            .rposition(|r| r.iter().any(|c| !c.trim().is_empty()))
            .map_or(0, |i| i + 1)
    }

    pub fn push_row(&mut self, cells: Vec<String>) -> usize {
        let at = self.used_rows();
        self.rows.truncate(at);
        self.rows.push(cells);
        at
    }

    pub fn insert_row(&mut self, at: usize, cells: Vec<String>) {
        if at >= self.rows.len() {
            self.rows.resize_with(at, Vec::new);
            self.rows.push(cells);
        } else {
            self.rows.insert(at, cells);
        }
    }

    pub fn remove_row(&mut self, at: usize) -> Option<Vec<String>> {
        (at < self.rows.len()).then(|| self.rows.remove(at))
    }
}

/// A workbook as an ordered list of sheets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Read every sheet of an .xlsx file
    pub fn open(path: &Path) -> Result<Self> {
        let mut xlsx: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("Failed to open Excel file: {}", path.display()))?;
        Self::read_all(&mut xlsx)
            .with_context(|| format!("Failed to read Excel file: {}", path.display()))
    }

    /// Open the workbook when it exists, otherwise start an empty one
    pub fn open_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Ok(Workbook::default())
        }
    }

    /// Decode a workbook from an in-memory .xlsx buffer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut xlsx =
            Xlsx::new(Cursor::new(bytes.to_vec())).context("Buffer is not a valid .xlsx workbook")?;
        Self::read_all(&mut xlsx)
    }

    fn read_all<RS: Read + Seek>(xlsx: &mut Xlsx<RS>) -> Result<Self> {
        let names = xlsx.sheet_names();
        let mut sheets = Vec::with_capacity(names.len());

        for name in names {
            let range = xlsx
                .worksheet_range(&name)
                .with_context(|| format!("Failed to read sheet: {}", name))?;

            let mut sheet = Sheet::new(name);
            // Ranges start at the first used cell, not at A1
            if let Some((start_row, start_col)) = range.start() {
                for (r, row) in range.rows().enumerate() {
                    for (c, cell) in row.iter().enumerate() {
                        let text = cell_text(cell);
                        if !text.is_empty() {
                            sheet.set_cell(
                                start_row as usize + r,
                                start_col as usize + c,
                                text,
                            );
                        }
                    }
                }
            }
            sheets.push(sheet);
        }

        Ok(Workbook { sheets })
    }

    /// Write the workbook to disk, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.sheets.is_empty() {
            bail!("Refusing to save workbook without sheets: {}", path.display());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut workbook = XlsxWorkbook::new();
        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet
                .set_name(&sheet.name)
                .with_context(|| format!("Invalid sheet name: {}", sheet.name))?;

            for (r, cells) in sheet.rows.iter().enumerate() {
                for (c, value) in cells.iter().enumerate() {
                    if value.is_empty() {
                        continue;
                    }
                    worksheet.write_string(r as u32, c as u16, value)?;
                }
            }
        }

        workbook
            .save(path)
            .with_context(|| format!("Failed to save Excel file: {}", path.display()))?;

        Ok(())
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Sheet position by exact name, falling back to a case-insensitive match
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name == name)
            .or_else(|| {
                self.sheets
                    .iter()
                    .position(|s| s.name.trim().eq_ignore_ascii_case(name.trim()))
            })
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheet_index(name).map(|i| &self.sheets[i])
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheet_index(name).map(move |i| &mut self.sheets[i])
    }

    pub fn require_sheet(&self, name: &str) -> Result<&Sheet> {
        match self.sheet(name) {
            Some(sheet) => Ok(sheet),
            None => bail!("Sheet '{}' not found", name),
        }
    }

    pub fn require_sheet_mut(&mut self, name: &str) -> Result<&mut Sheet> {
        match self.sheet_index(name) {
            Some(i) => Ok(&mut self.sheets[i]),
            None => bail!("Sheet '{}' not found", name),
        }
    }

    /// Get a sheet by name, appending an empty one when missing
    pub fn sheet_or_insert(&mut self, name: &str) -> &mut Sheet {
        let index = match self.sheet_index(name) {
            Some(i) => i,
            None => {
                self.sheets.push(Sheet::new(name));
                self.sheets.len() - 1
            }
        };
        &mut self.sheets[index]
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::DateTime(dt) => excel_serial_to_text(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

/// Render an Excel date serial as `YYYY-MM-DD`, adding the time when present
fn excel_serial_to_text(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return serial.to_string();
    };
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    let Some(datetime) = epoch
        .and_hms_opt(0, 0, 0)
        .and_then(|d| d.checked_add_signed(Duration::days(days) + Duration::seconds(seconds)))
    else {
        return serial.to_string();
    };

    if seconds == 0 {
        datetime.format("%Y-%m-%d").to_string()
    } else {
        datetime.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
