//! Streaming section writer.
//!
//! Sections are written strictly in declaration order. Writing rows to a
//! section renders every section between the cursor and the target first:
//! static sections (no id, bound data or source sections) fully, dynamic ones
//! as title and header only. Rows go through a [`RowBuffer`] and reach the
//! document sink in increasing row order, so constant-memory worksheets can
//! be used.

use std::collections::BTreeMap;
use std::io::{Seek, Write};

use tracing::{debug, info};

use crate::column::resolve_columns;
use crate::conf::N_ROWS_STREAM_FLUSH;
use crate::document::{CellSink, DocumentSink, EnumSheetMode, XlsxDocument};
use crate::error::{ReportError, Result};
use crate::layout::{
    LayoutCursor, PlacementTable, SpecSectionGeometry, SpecSectionPlacement, derive_data_length,
    resolve_sheet_columns,
};
use crate::record::RecordAccessor;
use crate::render::{DictFormatters, SectionEmitter, derive_column_widths};
use crate::spec::{
    EnumCellContent, EnumSectionDirection, SpecCellStyle, SpecColumn, SpecRenderReport,
    SpecSection, SpecSheet, SpecSheetReport, SpecStyleSet,
};
use crate::util::{parse_cell_ref, sanitize_sheet_name};

////////////////////////////////////////////////////////////////////////////////
// #region RowBuffer

#[derive(Debug, Clone)]
enum EnumCellOp {
    Write {
        col: usize,
        content: EnumCellContent,
        style: SpecCellStyle,
    },
    Merge {
        col_first: usize,
        col_last: usize,
        text: String,
        style: SpecCellStyle,
    },
}

#[derive(Debug, Clone, Default)]
struct SpecBufferedRow {
    height: Option<f64>,
    if_hidden: bool,
    l_ops: Vec<EnumCellOp>,
}

/// Pending rows of the current sheet, flushed in increasing row order.
///
/// Rows at or above the last flushed row are rejected.
#[derive(Debug, Clone, Default)]
pub struct RowBuffer {
    dict_rows: BTreeMap<usize, SpecBufferedRow>,
    row_flushed_last: Option<usize>,
}

impl RowBuffer {
    /// Number of buffered rows.
    pub fn n_rows(&self) -> usize {
        self.dict_rows.len()
    }

    /// Mark a buffered row as hidden.
    pub fn hide_row(&mut self, row: usize) -> Result<()> {
        self.row_mut(row)?.if_hidden = true;
        Ok(())
    }

    /// Send every buffered row to `sink`. Returns the number of rows sent.
    pub fn flush<D: DocumentSink + ?Sized>(&mut self, sink: &mut D) -> Result<usize> {
        let n_rows = self.dict_rows.len();
        for (n_row, row) in std::mem::take(&mut self.dict_rows) {
            if let Some(height) = row.height {
                sink.set_row_height(n_row, height)?;
            }
            if row.if_hidden {
                sink.set_row_hidden(n_row)?;
            }
            for op in row.l_ops {
                match op {
                    EnumCellOp::Write {
                        col,
                        content,
                        style,
                    } => sink.write_cell(n_row, col, &content, &style)?,
                    EnumCellOp::Merge {
                        col_first,
                        col_last,
                        text,
                        style,
                    } => sink.merge_cells(n_row, col_first, col_last, &text, &style)?,
                }
            }
            self.row_flushed_last = Some(n_row);
        }
        Ok(n_rows)
    }

    fn row_mut(&mut self, row: usize) -> Result<&mut SpecBufferedRow> {
        if let Some(n_row_flushed) = self.row_flushed_last
            && row <= n_row_flushed
        {
            return Err(ReportError::Layout(format!(
                "Row {row} is at or above the last flushed row {n_row_flushed}."
            )));
        }
        Ok(self.dict_rows.entry(row).or_default())
    }
}

impl CellSink for RowBuffer {
    fn write_cell(
        &mut self,
        row: usize,
        col: usize,
        content: &EnumCellContent,
        style: &SpecCellStyle,
    ) -> Result<()> {
        self.row_mut(row)?.l_ops.push(EnumCellOp::Write {
            col,
            content: content.clone(),
            style: style.clone(),
        });
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
        self.row_mut(row)?.l_ops.push(EnumCellOp::Merge {
            col_first,
            col_last,
            text: text.to_string(),
            style: style.clone(),
        });
        Ok(())
    }

    fn set_row_height(&mut self, row: usize, height: f64) -> Result<()> {
        self.row_mut(row)?.height = Some(height);
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SectionStreamer

/// Lifecycle of a [`SectionStreamer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumStreamState {
    /// Nothing written yet.
    Idle,
    /// Rendering sections between the cursor and a target.
    Advancing,
    /// Target reached; its columns freeze on the first non-empty write.
    AwaitingFirstWrite {
        /// Target section index in the current sheet.
        n_idx_section: usize,
    },
    /// Rows are being appended to a section.
    Writing {
        /// Active section index in the current sheet.
        n_idx_section: usize,
    },
    /// Every remaining section has been rendered.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct SpecActiveSection {
    n_idx_section: usize,
    anchor: (usize, usize),
    n_rows_written: usize,
}

#[derive(Debug)]
struct SheetProgress {
    sheet_name: String,
    cursor: LayoutCursor,
    table: PlacementTable,
    l_columns: Vec<Vec<SpecColumn>>,
    buffer: RowBuffer,
    dict_col_widths: BTreeMap<usize, f64>,
    active: Option<SpecActiveSection>,
    if_uses_lock: bool,
}

/// Order-enforcing section writer over any [`DocumentSink`].
pub struct SectionStreamer<D: DocumentSink> {
    sink: D,
    l_sheets: Vec<SpecSheet>,
    styles_default: SpecStyleSet,
    dict_formatters: DictFormatters,
    n_rows_flush: usize,
    state: EnumStreamState,
    n_idx_sheet: usize,
    n_idx_section: usize,
    progress: Option<SheetProgress>,
    report: SpecRenderReport,
    n_flushes: usize,
}

impl<D: DocumentSink> SectionStreamer<D> {
    /// Streamer over `sheets`, writing into `sink`.
    pub fn new(
        sink: D,
        sheets: Vec<SpecSheet>,
        styles_default: SpecStyleSet,
        dict_formatters: DictFormatters,
    ) -> Self {
        Self {
            sink,
            l_sheets: sheets,
            styles_default,
            dict_formatters,
            n_rows_flush: N_ROWS_STREAM_FLUSH,
            state: EnumStreamState::Idle,
            n_idx_sheet: 0,
            n_idx_section: 0,
            progress: None,
            report: SpecRenderReport::default(),
            n_flushes: 0,
        }
    }

    /// Flush once this many rows are buffered.
    pub fn with_flush_threshold(mut self, n_rows_flush: usize) -> Self {
        self.n_rows_flush = n_rows_flush.max(1);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EnumStreamState {
        self.state
    }

    /// Number of non-empty buffer flushes so far.
    pub fn n_flushes(&self) -> usize {
        self.n_flushes
    }

    /// Summary of the sheets finished so far.
    pub fn report(&self) -> &SpecRenderReport {
        &self.report
    }

    /// Borrow the sink.
    pub fn sink(&self) -> &D {
        &self.sink
    }

    /// Consume the streamer and return the sink.
    pub fn into_sink(self) -> D {
        self.sink
    }

    /// Render the leading static sections and stop before the first section
    /// that waits for streamed rows. The rendered rows are flushed to the
    /// sink. No-op unless idle.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EnumStreamState::Idle {
            return Ok(());
        }

        self.state = EnumStreamState::Advancing;
        while self.n_idx_sheet < self.l_sheets.len() {
            self.ensure_sheet()?;
            let n_idx_section = self.n_idx_section;
            let if_awaits_rows = self.l_sheets[self.n_idx_sheet]
                .sections
                .get(n_idx_section)
                .map(|section| !section.is_static());
            match if_awaits_rows {
                Some(true) => {
                    self.state = EnumStreamState::AwaitingFirstWrite { n_idx_section };
                    return self.flush_all();
                }
                Some(false) => self.render_passed_section()?,
                None => self.finish_sheet()?,
            }
        }
        Ok(())
    }

    /// Append `records` to the section `section_id`.
    ///
    /// Sections declared before the target that have not been rendered yet
    /// are rendered first. Targeting a section the stream has already moved
    /// past is an error. An empty first batch leaves the target awaiting rows.
    pub fn write<R: RecordAccessor>(&mut self, section_id: &str, records: &[R]) -> Result<()> {
        if self.state == EnumStreamState::Closed {
            return Err(ReportError::Binding("Stream is already closed.".to_string()));
        }

        let (n_idx_sheet_target, n_idx_section_target) = self.locate_target(section_id)?;
        let if_continuing = self.n_idx_sheet == n_idx_sheet_target
            && self.state
                == (EnumStreamState::Writing {
                    n_idx_section: n_idx_section_target,
                });

        if !if_continuing {
            self.finish_active()?;
            self.advance_to(n_idx_sheet_target, n_idx_section_target)?;
            self.state = EnumStreamState::AwaitingFirstWrite {
                n_idx_section: n_idx_section_target,
            };
            // Columns freeze on the first non-empty batch.
            if records.is_empty() {
                return self.flush_if_needed();
            }
            self.open_streamed_section(n_idx_section_target, records)?;
        }

        self.emit_streamed_rows(records)?;
        self.flush_if_needed()
    }

    /// Render every remaining section and finish every sheet. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state == EnumStreamState::Closed {
            return Ok(());
        }

        self.finish_active()?;
        self.state = EnumStreamState::Advancing;
        while self.n_idx_sheet < self.l_sheets.len() {
            self.step()?;
        }
        self.state = EnumStreamState::Closed;

        info!(
            n_sheets = self.report.sheets.len(),
            n_flushes = self.n_flushes,
            "stream closed"
        );
        Ok(())
    }

    fn locate_target(&self, section_id: &str) -> Result<(usize, usize)> {
        if let EnumStreamState::Writing { n_idx_section } = self.state
            && self.l_sheets[self.n_idx_sheet].sections[n_idx_section].has_id(section_id)
        {
            return Ok((self.n_idx_sheet, n_idx_section));
        }

        for (n_idx_sheet, sheet) in self.l_sheets.iter().enumerate().skip(self.n_idx_sheet) {
            let n_idx_start = if n_idx_sheet == self.n_idx_sheet {
                self.n_idx_section
            } else {
                0
            };
            for (n_idx_section, section) in sheet.sections.iter().enumerate().skip(n_idx_start) {
                if !section.has_id(section_id) {
                    continue;
                }
                if section.is_static() {
                    return Err(ReportError::Binding(format!(
                        "Section {section_id:?} is static and cannot receive streamed rows."
                    )));
                }
                return Ok((n_idx_sheet, n_idx_section));
            }
        }

        let if_known = self
            .l_sheets
            .iter()
            .flat_map(|sheet| &sheet.sections)
            .any(|section| section.has_id(section_id));
        if if_known {
            Err(ReportError::Binding(format!(
                "Section {section_id:?} was already passed; sections must be written in order."
            )))
        } else {
            Err(ReportError::Binding(format!(
                "Section {section_id:?} does not exist."
            )))
        }
    }

    fn advance_to(&mut self, n_idx_sheet_target: usize, n_idx_section_target: usize) -> Result<()> {
        self.state = EnumStreamState::Advancing;
        loop {
            self.ensure_sheet()?;
            if self.n_idx_sheet == n_idx_sheet_target
                && self.n_idx_section == n_idx_section_target
            {
                return Ok(());
            }
            self.step()?;
        }
    }

    /// Render the next pending section, or finish the sheet when none is left.
    fn step(&mut self) -> Result<()> {
        self.ensure_sheet()?;
        if self.n_idx_section < self.l_sheets[self.n_idx_sheet].sections.len() {
            self.render_passed_section()
        } else {
            self.finish_sheet()
        }
    }

    fn ensure_sheet(&mut self) -> Result<()> {
        if self.progress.is_some() {
            return Ok(());
        }

        let sheet = &self.l_sheets[self.n_idx_sheet];
        let sheet_name = self
            .sink
            .add_sheet(&sanitize_sheet_name(&sheet.name, "_"), EnumSheetMode::Streaming)?;
        let if_uses_lock = sheet.uses_lock();
        if if_uses_lock {
            self.sink.unlock_all_cells()?;
        }

        let l_columns = resolve_sheet_columns(sheet);
        let l_col_anchors = sheet
            .sections
            .iter()
            .map(derive_col_anchor)
            .collect::<Result<Vec<_>>>()?;
        let dict_col_widths = derive_column_widths(sheet, &l_columns, &l_col_anchors);
        for (&n_col, &width) in &dict_col_widths {
            self.sink.set_column_width(n_col, width)?;
        }

        info!(sheet = %sheet_name, "stream sheet started");
        self.n_idx_section = 0;
        self.progress = Some(SheetProgress {
            sheet_name,
            cursor: LayoutCursor::default(),
            table: PlacementTable::default(),
            l_columns,
            buffer: RowBuffer::default(),
            dict_col_widths,
            active: None,
            if_uses_lock,
        });
        Ok(())
    }

    fn finish_sheet(&mut self) -> Result<()> {
        let Some(mut progress) = self.progress.take() else {
            return Ok(());
        };
        if progress.buffer.flush(&mut self.sink)? > 0 {
            self.n_flushes += 1;
        }
        if progress.if_uses_lock {
            self.sink.protect_sheet()?;
        }

        debug!(sheet = %progress.sheet_name, "stream sheet finished");
        self.report.sheets.push(SpecSheetReport {
            sheet_name: progress.sheet_name,
            placements: progress.table.into_placements(),
        });
        self.n_idx_sheet += 1;
        self.n_idx_section = 0;
        Ok(())
    }

    /// Place the next pending section, emit its head and return its anchor.
    fn open_section(
        &mut self,
        columns_frozen: Option<Vec<SpecColumn>>,
    ) -> Result<(usize, usize)> {
        let n_idx = self.n_idx_section;
        let section = &self.l_sheets[self.n_idx_sheet].sections[n_idx];
        let Some(progress) = self.progress.as_mut() else {
            return Err(ReportError::Layout("No sheet in progress.".to_string()));
        };

        if section.direction == EnumSectionDirection::Horizontal {
            return Err(ReportError::Layout(format!(
                "Section {:?} is horizontal; streamed sheets only stack vertically.",
                section.id.as_deref().unwrap_or("")
            )));
        }
        let anchor = progress.cursor.derive_anchor(section)?;
        if anchor.0 < progress.cursor.row_next {
            return Err(ReportError::Layout(format!(
                "Section {:?} is positioned above rows that were already streamed.",
                section.id.as_deref().unwrap_or("")
            )));
        }

        if let Some(columns) = columns_frozen {
            for (n_offset, col) in columns.iter().enumerate() {
                let n_col = anchor.1 + n_offset;
                let width_current = progress.dict_col_widths.get(&n_col).copied().unwrap_or(0.0);
                if col.width > width_current {
                    self.sink.set_column_width(n_col, col.width)?;
                    progress.dict_col_widths.insert(n_col, col.width);
                }
            }
            progress.l_columns[n_idx] = columns;
        }

        let columns = &progress.l_columns[n_idx];
        let geometry = SpecSectionGeometry::derive(section, columns);
        progress
            .table
            .push(SpecSectionPlacement::new(section, columns, anchor, &geometry, 0));

        let emitter = SectionEmitter::new(
            section,
            columns,
            n_idx,
            anchor,
            &self.styles_default,
            &self.dict_formatters,
        )?;
        emitter.emit_head(&mut progress.buffer)?;
        for n_row in emitter.derive_hidden_rows(0) {
            progress.buffer.hide_row(n_row)?;
        }

        self.n_idx_section = n_idx + 1;
        Ok(anchor)
    }

    /// Update the placement and cursors of a section once its rows are known.
    fn close_section(
        &mut self,
        n_idx_section: usize,
        anchor: (usize, usize),
        n_rows_data: usize,
    ) -> Result<()> {
        let section = &self.l_sheets[self.n_idx_sheet].sections[n_idx_section];
        let Some(progress) = self.progress.as_mut() else {
            return Err(ReportError::Layout("No sheet in progress.".to_string()));
        };
        let columns = &progress.l_columns[n_idx_section];

        let emitter = SectionEmitter::new(
            section,
            columns,
            n_idx_section,
            anchor,
            &self.styles_default,
            &self.dict_formatters,
        )?;
        if let Some((n_row_first, n_col_first, n_row_last, n_col_last)) =
            emitter.derive_autofilter_range(n_rows_data)
        {
            self.sink
                .set_autofilter(n_row_first, n_col_first, n_row_last, n_col_last)?;
        }
        if let Some(placement) = progress.table.last_mut() {
            placement.n_rows_data = n_rows_data;
        }
        progress
            .cursor
            .advance(section, anchor, emitter.geometry(), n_rows_data);

        debug!(
            sheet = %progress.sheet_name,
            section = section.id.as_deref().unwrap_or(""),
            rows_data = n_rows_data,
            "stream section closed"
        );
        Ok(())
    }

    /// Render a section the stream moves past: static data, or head only.
    fn render_passed_section(&mut self) -> Result<()> {
        let n_idx = self.n_idx_section;
        let anchor = self.open_section(None)?;

        let section = &self.l_sheets[self.n_idx_sheet].sections[n_idx];
        let Some(progress) = self.progress.as_mut() else {
            return Err(ReportError::Layout("No sheet in progress.".to_string()));
        };
        let mut n_rows_data = 0;
        if section.is_static() {
            let n_rows_expected =
                derive_data_length(section, &progress.table, n_idx, section.n_rows_bound())?;
            let emitter = SectionEmitter::new(
                section,
                &progress.l_columns[n_idx],
                n_idx,
                anchor,
                &self.styles_default,
                &self.dict_formatters,
            )?;
            let records = (0..n_rows_expected).map(|n_idx_row| {
                section
                    .data
                    .as_ref()
                    .and_then(|data| data.get(n_idx_row))
                    .map(|rec| rec.as_ref() as &dyn RecordAccessor)
            });
            n_rows_data =
                emit_records(&emitter, &mut progress.buffer, &progress.table, 0, records)?;
        }

        self.close_section(n_idx, anchor, n_rows_data)?;
        self.flush_if_needed()
    }

    fn open_streamed_section<R: RecordAccessor>(
        &mut self,
        n_idx_section: usize,
        records: &[R],
    ) -> Result<()> {
        let section = &self.l_sheets[self.n_idx_sheet].sections[n_idx_section];
        let columns_frozen = resolve_columns(&section.columns, records);
        let anchor = self.open_section(Some(columns_frozen))?;

        if let Some(progress) = self.progress.as_mut() {
            progress.active = Some(SpecActiveSection {
                n_idx_section,
                anchor,
                n_rows_written: 0,
            });
        }
        self.state = EnumStreamState::Writing { n_idx_section };
        debug!(
            section = self.l_sheets[self.n_idx_sheet].sections[n_idx_section]
                .id
                .as_deref()
                .unwrap_or(""),
            row = anchor.0,
            "stream section opened"
        );
        Ok(())
    }

    fn emit_streamed_rows<R: RecordAccessor>(&mut self, records: &[R]) -> Result<()> {
        let Some(progress) = self.progress.as_mut() else {
            return Err(ReportError::Layout("No sheet in progress.".to_string()));
        };
        let Some(active) = progress.active.as_mut() else {
            return Err(ReportError::Layout("No section is being written.".to_string()));
        };

        let section = &self.l_sheets[self.n_idx_sheet].sections[active.n_idx_section];
        let emitter = SectionEmitter::new(
            section,
            &progress.l_columns[active.n_idx_section],
            active.n_idx_section,
            active.anchor,
            &self.styles_default,
            &self.dict_formatters,
        )?;
        let n_rows = emit_records(
            &emitter,
            &mut progress.buffer,
            &progress.table,
            active.n_rows_written,
            records.iter().map(|rec| Some(rec as &dyn RecordAccessor)),
        )?;
        active.n_rows_written += n_rows;
        if let Some(placement) = progress.table.last_mut() {
            placement.n_rows_data = active.n_rows_written;
        }
        Ok(())
    }

    fn finish_active(&mut self) -> Result<()> {
        let Some(active) = self.progress.as_mut().and_then(|p| p.active.take()) else {
            return Ok(());
        };
        self.close_section(active.n_idx_section, active.anchor, active.n_rows_written)?;
        self.state = EnumStreamState::Advancing;
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        let Some(progress) = self.progress.as_mut() else {
            return Ok(());
        };
        let n_rows = progress.buffer.flush(&mut self.sink)?;
        if n_rows > 0 {
            self.n_flushes += 1;
            debug!(sheet = %progress.sheet_name, n_rows, "stream buffer flushed");
        }
        Ok(())
    }

    fn flush_if_needed(&mut self) -> Result<()> {
        let Some(progress) = self.progress.as_mut() else {
            return Ok(());
        };
        if progress.buffer.n_rows() < self.n_rows_flush {
            return Ok(());
        }
        let n_rows = progress.buffer.flush(&mut self.sink)?;
        self.n_flushes += 1;
        debug!(sheet = %progress.sheet_name, n_rows, "stream buffer flushed");
        Ok(())
    }
}

/// Write data rows through `emitter`; comparison failures are fatal.
fn emit_records<'r>(
    emitter: &SectionEmitter<'_>,
    buffer: &mut RowBuffer,
    table: &PlacementTable,
    n_idx_row_start: usize,
    records: impl Iterator<Item = Option<&'r dyn RecordAccessor>>,
) -> Result<usize> {
    let mut n_rows = 0;
    for (n_offset, record) in records.enumerate() {
        let n_idx_row = n_idx_row_start + n_offset;
        let l_contents = emitter
            .columns()
            .iter()
            .enumerate()
            .map(|(n_idx_col, col)| {
                if col.is_comparison() {
                    emitter.derive_compare_cell(col, n_idx_row, table)
                } else {
                    Ok(emitter.derive_value_cell(n_idx_col, record))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        emitter.emit_row(buffer, n_idx_row, &l_contents)?;
        if emitter.hides_all_rows() {
            buffer.hide_row(emitter.row_data_start() + n_idx_row)?;
        }
        n_rows += 1;
    }
    Ok(n_rows)
}

fn derive_col_anchor(section: &SpecSection) -> Result<usize> {
    match &section.position {
        Some(c_position) => Ok(parse_cell_ref(c_position)?.1),
        None => Ok(0),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region XlsxStreamer

/// Streaming XLSX writer with constant-memory worksheets.
pub struct XlsxStreamer<W: Write + Seek + Send> {
    streamer: SectionStreamer<XlsxDocument>,
    writer: W,
}

impl<W: Write + Seek + Send> XlsxStreamer<W> {
    /// Streamer writing the finished workbook into `writer` on close.
    pub fn new(
        writer: W,
        sheets: Vec<SpecSheet>,
        styles_default: SpecStyleSet,
        dict_formatters: DictFormatters,
    ) -> Self {
        Self {
            streamer: SectionStreamer::new(
                XlsxDocument::new(),
                sheets,
                styles_default,
                dict_formatters,
            ),
            writer,
        }
    }

    /// Flush once this many rows are buffered.
    pub fn with_flush_threshold(mut self, n_rows_flush: usize) -> Self {
        self.streamer = self.streamer.with_flush_threshold(n_rows_flush);
        self
    }

    /// Append `records` to the section `section_id`.
    pub fn write<R: RecordAccessor>(&mut self, section_id: &str, records: &[R]) -> Result<()> {
        self.streamer.write(section_id, records)
    }

    /// Render the leading static sections.
    pub fn start(&mut self) -> Result<()> {
        self.streamer.start()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EnumStreamState {
        self.streamer.state()
    }

    /// Render the remaining sections, save the workbook and return the writer.
    pub fn close(mut self) -> Result<(W, SpecRenderReport)> {
        self.streamer.close()?;
        let report = self.streamer.report().clone();
        let mut document = self.streamer.into_sink();
        let writer = document.save_to_writer(self.writer)?;
        Ok((writer, report))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::conf::derive_default_style_set;
    use crate::document::GridDocument;
    use crate::record::SpecRecordRow;
    use crate::spec::{EnumCellValue, EnumSectionKind, SpecCompareRef};

    fn rows(l_values: &[(&str, i64)]) -> Vec<SpecRecordRow> {
        l_values
            .iter()
            .map(|(c_name, n_value)| {
                SpecRecordRow::new([
                    ("Name", EnumCellValue::from(*c_name)),
                    ("Value", EnumCellValue::from(*n_value)),
                ])
            })
            .collect()
    }

    fn streamer(l_sheets: Vec<SpecSheet>) -> SectionStreamer<GridDocument> {
        SectionStreamer::new(
            GridDocument::new(),
            l_sheets,
            derive_default_style_set(),
            DictFormatters::new(),
        )
    }

    fn sheet_with(name: &str, sections: Vec<SpecSection>) -> SpecSheet {
        SpecSheet {
            name: name.to_string(),
            sections,
        }
    }

    #[test]
    fn writing_a_passed_section_fails() {
        let mut stream = streamer(vec![sheet_with(
            "S",
            vec![SpecSection::new("a", "A"), SpecSection::new("b", "B")],
        )]);

        stream.write("b", &rows(&[("x", 1)])).expect("write b");
        let err = stream.write("a", &rows(&[("y", 2)])).expect_err("a passed");
        assert!(matches!(err, ReportError::Binding(_)));

        let err = stream.write("nope", &rows(&[])).expect_err("unknown");
        assert!(matches!(err, ReportError::Binding(_)));
    }

    #[test]
    fn intervening_sections_render_once_in_order() {
        let mut stream = streamer(vec![sheet_with(
            "S",
            vec![
                SpecSection {
                    id: None,
                    kind: EnumSectionKind::TitleOnly,
                    ..SpecSection::new("", "Banner")
                },
                SpecSection::new("skipped", "Skipped").with_column(SpecColumn::new("Name", "Name")),
                SpecSection {
                    data: Some(
                        rows(&[("m", 7)])
                            .into_iter()
                            .map(|row| Box::new(row) as Box<dyn RecordAccessor>)
                            .collect(),
                    ),
                    ..SpecSection::new("mid", "Mid")
                },
                SpecSection::new("target", "Target"),
            ],
        )]);

        stream
            .write("target", &rows(&[("t1", 1), ("t2", 2)]))
            .expect("write");
        stream.close().expect("close");

        let placements = &stream.report().sheets[0].placements;
        let l_anchors: Vec<usize> = placements.iter().map(|p| p.row_anchor).collect();
        // banner 0, skipped title+header 1..3, mid 3..6, target 6..
        assert_eq!(l_anchors, vec![0, 1, 3, 6]);
        assert_eq!(placements[1].n_rows_data, 0);
        assert_eq!(placements[2].n_rows_data, 1);
        assert_eq!(placements[3].n_rows_data, 2);

        let grid = &stream.sink().sheets()[0];
        assert_eq!(grid.mode, EnumSheetMode::Streaming);
        assert_eq!(grid.text(2, 0), "Name");
        assert_eq!(grid.text(5, 0), "m");
        assert_eq!(grid.text(9, 0), "t2");
        assert_eq!(stream.state(), EnumStreamState::Closed);
    }

    #[test]
    fn head_is_emitted_on_first_write() {
        let mut stream = streamer(vec![sheet_with("S", vec![SpecSection::new("a", "A")])])
            .with_flush_threshold(1);
        assert_eq!(stream.state(), EnumStreamState::Idle);
        assert!(stream.sink().sheets().is_empty());

        stream.start().expect("start");
        assert_eq!(
            stream.state(),
            EnumStreamState::AwaitingFirstWrite { n_idx_section: 0 }
        );
        assert!(stream.sink().sheets()[0].dict_cells.is_empty());

        stream.write("a", &rows(&[("x", 1)])).expect("write");
        assert_eq!(stream.state(), EnumStreamState::Writing { n_idx_section: 0 });
        let grid = &stream.sink().sheets()[0];
        assert_eq!(grid.text(0, 0), "A");
        assert_eq!(grid.text(1, 0), "Name");
        assert_eq!(grid.text(1, 1), "Value");
        assert_eq!(grid.text(2, 0), "x");
    }

    #[test]
    fn empty_first_batch_defers_column_discovery() {
        let mut stream = streamer(vec![sheet_with("S", vec![SpecSection::new("a", "A")])])
            .with_flush_threshold(1);

        stream.write("a", &rows(&[])).expect("empty write");
        assert_eq!(
            stream.state(),
            EnumStreamState::AwaitingFirstWrite { n_idx_section: 0 }
        );
        assert!(stream.sink().sheets()[0].dict_cells.is_empty());

        stream.write("a", &rows(&[("x", 1)])).expect("write");
        assert_eq!(stream.state(), EnumStreamState::Writing { n_idx_section: 0 });
        stream.close().expect("close");

        let grid = &stream.sink().sheets()[0];
        assert_eq!(grid.text(0, 0), "A");
        assert_eq!(grid.text(1, 0), "Name");
        assert_eq!(grid.text(1, 1), "Value");
        assert_eq!(grid.text(2, 0), "x");
        assert_eq!(grid.text(2, 1), "1");
        assert_eq!(stream.report().sheets[0].placements[0].n_rows_data, 1);
    }

    #[test]
    fn section_with_only_empty_batches_renders_head_only() {
        let mut stream = streamer(vec![sheet_with(
            "S",
            vec![SpecSection::new("a", "A"), SpecSection::new("b", "B")],
        )]);

        stream.write("a", &rows(&[])).expect("empty write");
        stream.write("b", &rows(&[("y", 2)])).expect("write b");
        stream.close().expect("close");

        let placements = &stream.report().sheets[0].placements;
        // a: title 0, empty header 1; b: title 2, header 3, data 4
        assert_eq!(placements[0].n_rows_data, 0);
        assert_eq!(placements[1].row_anchor, 2);
        assert_eq!(placements[1].n_rows_data, 1);

        let grid = &stream.sink().sheets()[0];
        assert_eq!(grid.text(0, 0), "A");
        assert_eq!(grid.text(1, 0), "");
        assert_eq!(grid.text(2, 0), "B");
        assert_eq!(grid.text(3, 0), "Name");
        assert_eq!(grid.text(4, 0), "y");
    }

    #[test]
    fn buffer_flushes_at_threshold() {
        let mut stream = streamer(vec![sheet_with("S", vec![SpecSection::new("a", "A")])])
            .with_flush_threshold(3);

        // title + header + one data row
        stream.write("a", &rows(&[("x", 1)])).expect("write");
        assert_eq!(stream.n_flushes(), 1);
        stream.write("a", &rows(&[("y", 2)])).expect("write");
        assert_eq!(stream.n_flushes(), 1);
        stream
            .write("a", &rows(&[("z", 3), ("w", 4)]))
            .expect("write");
        assert_eq!(stream.n_flushes(), 2);

        stream.close().expect("close");
        assert_eq!(stream.n_flushes(), 2);
        assert_eq!(stream.report().sheets[0].placements[0].n_rows_data, 4);
        assert_eq!(stream.sink().sheets()[0].text(5, 0), "w");
    }

    #[test]
    fn comparison_resolves_against_streamed_sections() {
        let column_diff = SpecColumn {
            compare_with: Some(SpecCompareRef::new("before", "Value")),
            compare_against: Some(SpecCompareRef::new("after", "Value")),
            ..SpecColumn::new("Diff", "Diff")
        };
        let mut stream = streamer(vec![sheet_with(
            "S",
            vec![
                SpecSection::new("before", "Before"),
                SpecSection::new("after", "After"),
                SpecSection {
                    source_sections: vec!["before".to_string()],
                    ..SpecSection::new("diff", "Diff").with_column(column_diff)
                },
            ],
        )]);

        stream.write("before", &rows(&[("a", 1), ("b", 2)])).expect("write");
        stream.write("after", &rows(&[("a", 1), ("b", 3)])).expect("write");
        stream.close().expect("close");

        // before 0..4, after 4..8, diff title 8, header 9, data 10..12
        let grid = &stream.sink().sheets()[0];
        assert_eq!(grid.text(10, 0), "=IF(B3<>B7,\"DIFF\",\"\")");
        assert_eq!(grid.text(11, 0), "=IF(B4<>B8,\"DIFF\",\"\")");
    }

    #[test]
    fn unresolved_comparison_fails_the_stream() {
        let column_diff = SpecColumn {
            compare_with: Some(SpecCompareRef::new("before", "Value")),
            compare_against: Some(SpecCompareRef::new("before", "Missing")),
            ..SpecColumn::new("Diff", "Diff")
        };
        let mut stream = streamer(vec![sheet_with(
            "S",
            vec![
                SpecSection::new("before", "Before"),
                SpecSection {
                    source_sections: vec!["before".to_string()],
                    ..SpecSection::new("diff", "Diff").with_column(column_diff)
                },
            ],
        )]);

        stream.write("before", &rows(&[("a", 1)])).expect("write");
        let err = stream.close().expect_err("unresolved");
        assert!(matches!(err, ReportError::Resolution(_)));
    }

    #[test]
    fn close_renders_remaining_sheets_and_rejects_writes() {
        let mut stream = streamer(vec![
            sheet_with("First", vec![SpecSection::new("a", "A")]),
            sheet_with("Second", vec![SpecSection::new("b", "B")]),
        ]);
        stream.close().expect("close");
        stream.close().expect("close twice");

        let l_names: Vec<&str> = stream
            .sink()
            .sheets()
            .iter()
            .map(|sheet| sheet.name.as_str())
            .collect();
        assert_eq!(l_names, vec!["First", "Second"]);
        assert_eq!(stream.sink().sheets()[1].text(0, 0), "B");

        let err = stream.write("b", &rows(&[])).expect_err("closed");
        assert!(matches!(err, ReportError::Binding(_)));
    }

    #[test]
    fn horizontal_and_static_targets_are_rejected() {
        let mut stream = streamer(vec![sheet_with(
            "S",
            vec![SpecSection {
                direction: EnumSectionDirection::Horizontal,
                ..SpecSection::new("side", "Side")
            }],
        )]);
        let err = stream.write("side", &rows(&[("a", 1)])).expect_err("horizontal");
        assert!(matches!(err, ReportError::Layout(_)));

        let mut stream = streamer(vec![sheet_with(
            "S",
            vec![SpecSection {
                data: Some(Vec::new()),
                ..SpecSection::new("bound", "Bound")
            }],
        )]);
        let err = stream.write("bound", &rows(&[])).expect_err("static");
        assert!(matches!(err, ReportError::Binding(_)));
    }

    #[test]
    fn xlsx_streamer_saves_into_writer() {
        let mut stream = XlsxStreamer::new(
            Cursor::new(Vec::new()),
            vec![sheet_with("S", vec![SpecSection::new("a", "A")])],
            derive_default_style_set(),
            DictFormatters::new(),
        )
        .with_flush_threshold(2);
        stream.write("a", &rows(&[("x", 1), ("y", 2)])).expect("write");
        stream.write("a", &rows(&[("z", 3)])).expect("write");

        let (cursor, report) = stream.close().expect("close");
        assert!(cursor.into_inner().starts_with(b"PK"));
        assert_eq!(report.sheets[0].placements[0].n_rows_data, 3);
    }
}
