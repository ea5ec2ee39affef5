//! Document sinks receiving rendered cells.
//!
//! [`CellSink`] is the narrow per-cell capability the renderers and the
//! stream row buffer write through. [`DocumentSink`] adds sheet-level
//! operations. Two sinks are provided:
//!
//! - [`XlsxDocument`]: a `rust_xlsxwriter` workbook, in-memory or
//!   constant-memory per sheet.
//! - [`GridDocument`]: plain cell grids, used for CSV export and inspection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Seek, Write};
use std::path::Path;

use rust_xlsxwriter::{Format, Workbook, Worksheet};
use tracing::debug;

use crate::conf::N_NCOLS_EXCEL_MAX;
use crate::error::{ReportError, Result};
use crate::spec::{EnumCellContent, EnumCellValue, SpecCellStyle};
use crate::style::derive_rust_xlsx_format;
use crate::util::{cast_col_num, cast_row_num, derive_unique_sheet_name};

/// How a sheet buffers its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumSheetMode {
    /// Random-access sheet held fully in memory.
    #[default]
    InMemory,
    /// Rows are written in increasing order and flushed as they complete.
    Streaming,
}

/// Per-cell write capability of the current sheet.
pub trait CellSink {
    /// Write a value or formula with a resolved style.
    fn write_cell(
        &mut self,
        row: usize,
        col: usize,
        content: &EnumCellContent,
        style: &SpecCellStyle,
    ) -> Result<()>;

    /// Merge `col_first..=col_last` on `row` and write `text` into it.
    fn merge_cells(
        &mut self,
        row: usize,
        col_first: usize,
        col_last: usize,
        text: &str,
        style: &SpecCellStyle,
    ) -> Result<()>;

    /// Set a row height in points.
    fn set_row_height(&mut self, row: usize, height: f64) -> Result<()>;
}

/// Sheet-level operations on top of [`CellSink`].
pub trait DocumentSink: CellSink {
    /// Start a new sheet and make it current. Returns the final sheet name.
    fn add_sheet(&mut self, name: &str, mode: EnumSheetMode) -> Result<String>;

    /// Hide a row of the current sheet.
    fn set_row_hidden(&mut self, row: usize) -> Result<()>;

    /// Set a column width in character units.
    fn set_column_width(&mut self, col: usize, width: f64) -> Result<()>;

    /// Apply an autofilter over a rectangular range.
    fn set_autofilter(
        &mut self,
        row_first: usize,
        col_first: usize,
        row_last: usize,
        col_last: usize,
    ) -> Result<()>;

    /// Make every cell of the current sheet unlocked by default.
    fn unlock_all_cells(&mut self) -> Result<()>;

    /// Enable protection on the current sheet.
    fn protect_sheet(&mut self) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////
// #region XlsxDocument

/// `rust_xlsxwriter` workbook sink with a format cache.
pub struct XlsxDocument {
    workbook: Workbook,
    n_sheets: usize,
    n_idx_sheet: Option<usize>,
    dict_formats: HashMap<SpecCellStyle, Format>,
    set_sheet_names_existing: BTreeSet<String>,
}

impl Default for XlsxDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl XlsxDocument {
    /// Empty workbook.
    pub fn new() -> Self {
        Self {
            workbook: Workbook::new(),
            n_sheets: 0,
            n_idx_sheet: None,
            dict_formats: HashMap::new(),
            set_sheet_names_existing: BTreeSet::new(),
        }
    }

    /// Number of distinct formats created so far.
    pub fn n_formats(&self) -> usize {
        self.dict_formats.len()
    }

    /// Serialize the workbook into XLSX bytes.
    pub fn save_to_buffer(&mut self) -> Result<Vec<u8>> {
        Ok(self.workbook.save_to_buffer()?)
    }

    /// Serialize the workbook to `path`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.workbook.save(path)?;
        Ok(())
    }

    /// Serialize the workbook into `writer` and hand it back.
    pub fn save_to_writer<W: Write + Seek + Send>(&mut self, mut writer: W) -> Result<W> {
        self.workbook.save_to_writer(&mut writer)?;
        Ok(writer)
    }

    fn worksheet(&mut self) -> Result<&mut Worksheet> {
        let Some(n_idx) = self.n_idx_sheet else {
            return Err(ReportError::Layout("No current worksheet.".to_string()));
        };
        Ok(self.workbook.worksheet_from_index(n_idx)?)
    }

    fn worksheet_with_format(
        &mut self,
        style: &SpecCellStyle,
    ) -> Result<(&mut Worksheet, &Format)> {
        let Some(n_idx) = self.n_idx_sheet else {
            return Err(ReportError::Layout("No current worksheet.".to_string()));
        };
        if !self.dict_formats.contains_key(style) {
            self.dict_formats
                .insert(style.clone(), derive_rust_xlsx_format(style));
        }
        let format = &self.dict_formats[style];
        let worksheet = self.workbook.worksheet_from_index(n_idx)?;
        Ok((worksheet, format))
    }
}

impl CellSink for XlsxDocument {
    fn write_cell(
        &mut self,
        row: usize,
        col: usize,
        content: &EnumCellContent,
        style: &SpecCellStyle,
    ) -> Result<()> {
        let (n_row, n_col) = (cast_row_num(row)?, cast_col_num(col)?);
        let (worksheet, format) = self.worksheet_with_format(style)?;
        match content {
            EnumCellContent::Formula(c_formula) => {
                worksheet.write_formula_with_format(n_row, n_col, c_formula.as_str(), format)?;
            }
            EnumCellContent::Value(EnumCellValue::None) => {
                worksheet.write_blank(n_row, n_col, format)?;
            }
            EnumCellContent::Value(EnumCellValue::String(val)) => {
                worksheet.write_string_with_format(n_row, n_col, val, format)?;
            }
            EnumCellContent::Value(EnumCellValue::Number(val)) => {
                worksheet.write_number_with_format(n_row, n_col, *val, format)?;
            }
            EnumCellContent::Value(EnumCellValue::Bool(val)) => {
                worksheet.write_boolean_with_format(n_row, n_col, *val, format)?;
            }
        }
        Ok(())
    }

    fn merge_cells(
        &mut self,
        row: usize,
        col_first: usize,
        col_last: usize,
        text: &str,
        style: &SpecCellStyle,
    ) -> Result<()> {
        let n_row = cast_row_num(row)?;
        let (n_col_first, n_col_last) = (cast_col_num(col_first)?, cast_col_num(col_last)?);
        let (worksheet, format) = self.worksheet_with_format(style)?;
        if n_col_last <= n_col_first {
            worksheet.write_string_with_format(n_row, n_col_first, text, format)?;
        } else {
            worksheet.merge_range(n_row, n_col_first, n_row, n_col_last, text, format)?;
        }
        Ok(())
    }

    fn set_row_height(&mut self, row: usize, height: f64) -> Result<()> {
        let n_row = cast_row_num(row)?;
        self.worksheet()?.set_row_height(n_row, height)?;
        Ok(())
    }
}

impl DocumentSink for XlsxDocument {
    fn add_sheet(&mut self, name: &str, mode: EnumSheetMode) -> Result<String> {
        let c_name = derive_unique_sheet_name(name, &mut self.set_sheet_names_existing);
        let worksheet = match mode {
            EnumSheetMode::InMemory => self.workbook.add_worksheet(),
            EnumSheetMode::Streaming => self.workbook.add_worksheet_with_constant_memory(),
        };
        worksheet.set_name(&c_name)?;

        self.n_idx_sheet = Some(self.n_sheets);
        self.n_sheets += 1;
        debug!(sheet = %c_name, ?mode, "worksheet added");
        Ok(c_name)
    }

    fn set_row_hidden(&mut self, row: usize) -> Result<()> {
        let n_row = cast_row_num(row)?;
        self.worksheet()?.set_row_hidden(n_row)?;
        Ok(())
    }

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<()> {
        let n_col = cast_col_num(col)?;
        self.worksheet()?.set_column_width(n_col, width)?;
        Ok(())
    }

    fn set_autofilter(
        &mut self,
        row_first: usize,
        col_first: usize,
        row_last: usize,
        col_last: usize,
    ) -> Result<()> {
        let (n_row_first, n_row_last) = (cast_row_num(row_first)?, cast_row_num(row_last)?);
        let (n_col_first, n_col_last) = (cast_col_num(col_first)?, cast_col_num(col_last)?);
        self.worksheet()?
            .autofilter(n_row_first, n_col_first, n_row_last, n_col_last)?;
        Ok(())
    }

    fn unlock_all_cells(&mut self) -> Result<()> {
        let fmt_unlocked = Format::new().set_unlocked();
        let worksheet = self.worksheet()?;
        for n_idx_col in 0..N_NCOLS_EXCEL_MAX {
            worksheet.set_column_format(cast_col_num(n_idx_col)?, &fmt_unlocked)?;
        }
        Ok(())
    }

    fn protect_sheet(&mut self) -> Result<()> {
        self.worksheet()?.protect();
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region GridDocument

/// One written grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecGridCell {
    /// Written content.
    pub content: EnumCellContent,
    /// Resolved style.
    pub style: SpecCellStyle,
}

impl SpecGridCell {
    /// Display text: values as text, formulas with a leading `=`.
    pub fn to_text(&self) -> String {
        match &self.content {
            EnumCellContent::Value(value) => value.to_text(),
            EnumCellContent::Formula(c_formula) => format!("={c_formula}"),
        }
    }
}

/// One in-memory sheet of a [`GridDocument`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecGridSheet {
    /// Sheet name.
    pub name: String,
    /// Buffering mode requested for the sheet.
    pub mode: EnumSheetMode,
    /// Written cells keyed by `(row, col)`.
    pub dict_cells: BTreeMap<(usize, usize), SpecGridCell>,
    /// Merged ranges as `(row, col_first, col_last)`.
    pub l_merges: Vec<(usize, usize, usize)>,
    /// Hidden rows.
    pub set_rows_hidden: BTreeSet<usize>,
    /// Row heights.
    pub dict_row_heights: BTreeMap<usize, f64>,
    /// Column widths.
    pub dict_col_widths: BTreeMap<usize, f64>,
    /// Autofilter range as `(row_first, col_first, row_last, col_last)`.
    pub autofilter: Option<(usize, usize, usize, usize)>,
    /// Every cell unlocked by default.
    pub if_unlocked_all: bool,
    /// Sheet protection enabled.
    pub if_protected: bool,
}

impl SpecGridSheet {
    /// Cell at `(row, col)`.
    pub fn cell(&self, row: usize, col: usize) -> Option<&SpecGridCell> {
        self.dict_cells.get(&(row, col))
    }

    /// Display text at `(row, col)`; empty when unwritten.
    pub fn text(&self, row: usize, col: usize) -> String {
        self.cell(row, col)
            .map(SpecGridCell::to_text)
            .unwrap_or_default()
    }

    /// `(rows, cols)` spanned by written cells.
    pub fn extent(&self) -> (usize, usize) {
        let n_rows = self
            .dict_cells
            .keys()
            .map(|(n_row, _)| n_row + 1)
            .max()
            .unwrap_or(0);
        let n_cols = self
            .dict_cells
            .keys()
            .map(|(_, n_col)| n_col + 1)
            .max()
            .unwrap_or(0);
        (n_rows, n_cols)
    }
}

/// In-memory sink keeping every sheet as a cell grid.
#[derive(Debug, Clone, Default)]
pub struct GridDocument {
    l_sheets: Vec<SpecGridSheet>,
    set_sheet_names_existing: BTreeSet<String>,
}

impl GridDocument {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sheets in creation order.
    pub fn sheets(&self) -> &[SpecGridSheet] {
        &self.l_sheets
    }

    /// Sheet by name.
    pub fn sheet(&self, name: &str) -> Option<&SpecGridSheet> {
        self.l_sheets.iter().find(|sheet| sheet.name == name)
    }

    /// Write the sheet at `n_idx_sheet` as CSV rows.
    pub fn write_csv<W: Write>(&self, n_idx_sheet: usize, writer: W) -> Result<()> {
        let Some(sheet) = self.l_sheets.get(n_idx_sheet) else {
            return Err(ReportError::Config(format!(
                "Sheet index {n_idx_sheet} does not exist."
            )));
        };

        let (n_rows, n_cols) = sheet.extent();
        let mut csv_writer = csv::WriterBuilder::new()
            .flexible(false)
            .from_writer(writer);
        for n_idx_row in 0..n_rows {
            let l_record: Vec<String> = (0..n_cols)
                .map(|n_idx_col| sheet.text(n_idx_row, n_idx_col))
                .collect();
            csv_writer.write_record(&l_record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    fn sheet_current(&mut self) -> Result<&mut SpecGridSheet> {
        self.l_sheets
            .last_mut()
            .ok_or_else(|| ReportError::Layout("No current worksheet.".to_string()))
    }
}

impl CellSink for GridDocument {
    fn write_cell(
        &mut self,
        row: usize,
        col: usize,
        content: &EnumCellContent,
        style: &SpecCellStyle,
    ) -> Result<()> {
        cast_row_num(row)?;
        cast_col_num(col)?;
        self.sheet_current()?.dict_cells.insert(
            (row, col),
            SpecGridCell {
                content: content.clone(),
                style: style.clone(),
            },
        );
        Ok(())
    }

    fn merge_cells(
        &mut self,
        row: usize,
        col_first: usize,
        col_last: usize,
        text: &str,
        style: &SpecCellStyle,
    ) -> Result<()> {
        self.write_cell(
            row,
            col_first,
            &EnumCellContent::Value(EnumCellValue::from(text)),
            style,
        )?;
        if col_last > col_first {
            self.sheet_current()?.l_merges.push((row, col_first, col_last));
        }
        Ok(())
    }

    fn set_row_height(&mut self, row: usize, height: f64) -> Result<()> {
        self.sheet_current()?.dict_row_heights.insert(row, height);
        Ok(())
    }
}

impl DocumentSink for GridDocument {
    fn add_sheet(&mut self, name: &str, mode: EnumSheetMode) -> Result<String> {
        let c_name = derive_unique_sheet_name(name, &mut self.set_sheet_names_existing);
        self.l_sheets.push(SpecGridSheet {
            name: c_name.clone(),
            mode,
            ..Default::default()
        });
        Ok(c_name)
    }

    fn set_row_hidden(&mut self, row: usize) -> Result<()> {
        self.sheet_current()?.set_rows_hidden.insert(row);
        Ok(())
    }

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<()> {
        self.sheet_current()?.dict_col_widths.insert(col, width);
        Ok(())
    }

    fn set_autofilter(
        &mut self,
        row_first: usize,
        col_first: usize,
        row_last: usize,
        col_last: usize,
    ) -> Result<()> {
        self.sheet_current()?.autofilter = Some((row_first, col_first, row_last, col_last));
        Ok(())
    }

    fn unlock_all_cells(&mut self) -> Result<()> {
        self.sheet_current()?.if_unlocked_all = true;
        Ok(())
    }

    fn protect_sheet(&mut self) -> Result<()> {
        self.sheet_current()?.if_protected = true;
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn value(text: &str) -> EnumCellContent {
        EnumCellContent::Value(EnumCellValue::from(text))
    }

    #[test]
    fn writes_without_sheet_fail() {
        let mut document = GridDocument::new();
        let err = document
            .write_cell(0, 0, &value("x"), &SpecCellStyle::default())
            .expect_err("no sheet");
        assert!(matches!(err, ReportError::Layout(_)));

        let mut document = XlsxDocument::new();
        let err = document
            .set_row_height(0, 20.0)
            .expect_err("no sheet");
        assert!(matches!(err, ReportError::Layout(_)));
    }

    #[test]
    fn grid_csv_pads_to_extent_and_prefixes_formulas() {
        let mut document = GridDocument::new();
        document
            .add_sheet("Data", EnumSheetMode::InMemory)
            .expect("sheet");
        let style = SpecCellStyle::default();
        document.merge_cells(0, 0, 2, "Title", &style).expect("merge");
        document.write_cell(1, 0, &value("a"), &style).expect("cell");
        document
            .write_cell(
                1,
                2,
                &EnumCellContent::Formula("IF(A2<>B2,\"DIFF\",\"\")".to_string()),
                &style,
            )
            .expect("cell");

        let sheet = &document.sheets()[0];
        assert_eq!(sheet.l_merges, vec![(0, 0, 2)]);
        assert_eq!(sheet.extent(), (2, 3));

        let mut v_buf = Vec::new();
        document.write_csv(0, &mut v_buf).expect("csv");
        let c_csv = String::from_utf8(v_buf).expect("utf8");
        assert_eq!(c_csv, "Title,,\na,,\"=IF(A2<>B2,\"\"DIFF\"\",\"\"\"\")\"\n");
        assert!(document.write_csv(1, Vec::new()).is_err());
    }

    #[test]
    fn duplicate_sheet_names_are_suffixed() {
        let mut document = GridDocument::new();
        let c_first = document
            .add_sheet("Report", EnumSheetMode::InMemory)
            .expect("sheet");
        let c_second = document
            .add_sheet("Report", EnumSheetMode::Streaming)
            .expect("sheet");
        assert_eq!(c_first, "Report");
        assert_eq!(c_second, "Report__2");
        assert_eq!(document.sheets()[1].mode, EnumSheetMode::Streaming);
    }

    #[test]
    fn xlsx_document_caches_formats_per_style() {
        let mut document = XlsxDocument::new();
        document
            .add_sheet("Data", EnumSheetMode::InMemory)
            .expect("sheet");
        let style_a = SpecCellStyle {
            locked: Some(true),
            ..Default::default()
        };
        let style_b = SpecCellStyle::default();
        for n_idx_row in 0..10 {
            document
                .write_cell(n_idx_row, 0, &value("x"), &style_a)
                .expect("cell");
            document
                .write_cell(n_idx_row, 1, &EnumCellContent::Value(1.5.into()), &style_b)
                .expect("cell");
        }
        document.merge_cells(10, 0, 0, "single", &style_a).expect("merge");
        assert_eq!(document.n_formats(), 2);

        let v_bytes = document.save_to_buffer().expect("bytes");
        assert!(v_bytes.starts_with(b"PK"));
    }
}
