//! Report workbook: template building, data binding and output.

use std::collections::BTreeSet;
use std::io::{Seek, Write};
use std::path::Path;

use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::info;

use crate::config::parse_report_conf;
use crate::document::{DocumentSink, GridDocument, XlsxDocument};
use crate::error::{ReportError, Result};
use crate::layout::{plan_sheet_placements, resolve_sheet_columns};
use crate::record::{
    RecordAccessor, TypedRecord, derive_dataframe_from_ipc_bytes, derive_records_from_dataframe,
};
use crate::render::{DictFormatters, render_workbook};
use crate::spec::{
    EnumCellValue, SpecFormatter, SpecRenderReport, SpecSection, SpecSheet, SpecSheetReport,
    SpecStyleSet,
};
use crate::stream::{SectionStreamer, XlsxStreamer};
use crate::util::sanitize_sheet_name;

/// Ordered sheets plus the formatter registry and default styles.
#[derive(Debug)]
pub struct ReportWorkbook {
    l_sheets: Vec<SpecSheet>,
    styles_default: SpecStyleSet,
    dict_formatters: DictFormatters,
}

impl Default for ReportWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportWorkbook {
    /// Empty workbook with the default style presets.
    pub fn new() -> Self {
        Self {
            l_sheets: Vec::new(),
            styles_default: crate::conf::derive_default_style_set(),
            dict_formatters: DictFormatters::new(),
        }
    }

    /// Replace the default style presets.
    pub fn with_default_styles(mut self, styles_default: SpecStyleSet) -> Self {
        self.styles_default = styles_default;
        self
    }

    /// Load a workbook from a YAML report document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut workbook = Self::new();
        workbook.l_sheets = parse_report_conf(text)?.into_sheets()?;
        workbook.validate()?;
        info!(n_sheets = workbook.l_sheets.len(), "report document loaded");
        Ok(workbook)
    }

    /// Load a workbook from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    ////////////////////////////////////////////////////////////////////////////
    // #region Template

    /// Append a sheet and return it for configuration.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> &mut SpecSheet {
        self.l_sheets.push(SpecSheet {
            name: name.into(),
            sections: Vec::new(),
        });
        let n_idx_last = self.l_sheets.len() - 1;
        &mut self.l_sheets[n_idx_last]
    }

    /// Sheets in render order.
    pub fn sheets(&self) -> &[SpecSheet] {
        &self.l_sheets
    }

    /// Section with `id` in any sheet.
    pub fn section(&self, id: &str) -> Option<&SpecSection> {
        self.l_sheets
            .iter()
            .flat_map(|sheet| &sheet.sections)
            .find(|section| section.has_id(id))
    }

    /// Mutable section with `id` in any sheet.
    pub fn section_mut(&mut self, id: &str) -> Option<&mut SpecSection> {
        self.l_sheets
            .iter_mut()
            .flat_map(|sheet| &mut sheet.sections)
            .find(|section| section.has_id(id))
    }

    /// Register a named formatter usable through `SpecColumn::formatter`.
    pub fn register_formatter<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&EnumCellValue) -> EnumCellValue + Send + Sync + 'static,
    {
        self.dict_formatters
            .insert(name.into(), SpecFormatter::new(func));
    }

    /// Check template consistency: unique sheet names and section ids,
    /// non-empty field names, complete comparison pairs.
    pub fn validate(&self) -> Result<()> {
        let mut set_sheet_names = BTreeSet::new();
        let mut set_section_ids = BTreeSet::new();

        for sheet in &self.l_sheets {
            let c_name = sanitize_sheet_name(&sheet.name, "_").to_lowercase();
            if !set_sheet_names.insert(c_name) {
                return Err(ReportError::Config(format!(
                    "Duplicate sheet name {:?}.",
                    sheet.name
                )));
            }

            for section in &sheet.sections {
                if let Some(c_id) = &section.id
                    && !set_section_ids.insert(c_id.as_str())
                {
                    return Err(ReportError::Config(format!("Duplicate section id {c_id:?}.")));
                }
                for col in &section.columns {
                    if col.field_name.trim().is_empty() {
                        return Err(ReportError::Config(format!(
                            "Section {:?} has a column without field_name.",
                            section.id.as_deref().unwrap_or("")
                        )));
                    }
                    if col.compare_with.is_some() != col.compare_against.is_some() {
                        return Err(ReportError::Config(format!(
                            "Column {:?} needs both compare_with and compare_against.",
                            col.field_name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Binding

    fn section_for_binding(&mut self, id: &str) -> Result<&mut SpecSection> {
        self.section_mut(id)
            .ok_or_else(|| ReportError::Binding(format!("Section {id:?} does not exist.")))
    }

    /// Bind records to a section, replacing earlier data.
    pub fn bind_section_data<R: RecordAccessor + 'static>(
        &mut self,
        id: &str,
        records: Vec<R>,
    ) -> Result<()> {
        let section = self.section_for_binding(id)?;
        section.data = Some(
            records
                .into_iter()
                .map(|rec| Box::new(rec) as Box<dyn RecordAccessor>)
                .collect(),
        );
        Ok(())
    }

    /// Bind serializable values (typically structs) to a section.
    pub fn bind_section_records<T: Serialize>(&mut self, id: &str, values: &[T]) -> Result<()> {
        self.section_for_binding(id)?;
        let l_records = TypedRecord::from_slice(values)?;
        self.bind_section_data(id, l_records)
    }

    /// Bind every DataFrame row to a section.
    pub fn bind_section_dataframe(&mut self, id: &str, df: &DataFrame) -> Result<()> {
        self.section_for_binding(id)?;
        let l_rows = derive_records_from_dataframe(df)?;
        self.bind_section_data(id, l_rows)
    }

    /// Bind a DataFrame serialized as Polars IPC bytes.
    pub fn bind_section_ipc_bytes(&mut self, id: &str, v_ipc_df: &[u8]) -> Result<()> {
        let df = derive_dataframe_from_ipc_bytes(v_ipc_df)?;
        self.bind_section_dataframe(id, &df)
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Output

    /// Plan placements of every sheet without emitting cells.
    pub fn render_report(&self) -> Result<SpecRenderReport> {
        self.validate()?;
        let mut report = SpecRenderReport::default();
        for sheet in &self.l_sheets {
            let l_columns = resolve_sheet_columns(sheet);
            let table = plan_sheet_placements(sheet, &l_columns)?;
            report.sheets.push(SpecSheetReport {
                sheet_name: sanitize_sheet_name(&sheet.name, "_"),
                placements: table.into_placements(),
            });
        }
        Ok(report)
    }

    /// Render every sheet into `sink`.
    pub fn render_into<D: DocumentSink + ?Sized>(&self, sink: &mut D) -> Result<SpecRenderReport> {
        self.validate()?;
        render_workbook(
            &self.l_sheets,
            &self.styles_default,
            &self.dict_formatters,
            sink,
        )
    }

    /// Render into an in-memory XLSX document.
    pub fn build_document(&self) -> Result<(XlsxDocument, SpecRenderReport)> {
        let mut document = XlsxDocument::new();
        let report = self.render_into(&mut document)?;
        Ok((document, report))
    }

    /// Render and serialize to XLSX bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (mut document, _) = self.build_document()?;
        document.save_to_buffer()
    }

    /// Render and save to `path`.
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> Result<SpecRenderReport> {
        let (mut document, report) = self.build_document()?;
        document.save(path.as_ref())?;
        info!(path = %path.as_ref().display(), "report exported");
        Ok(report)
    }

    /// Render and write the first sheet as CSV.
    pub fn to_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut document = GridDocument::new();
        self.render_into(&mut document)?;
        document.write_csv(0, writer)
    }

    /// Start streaming into `writer`; the workbook is saved on close.
    ///
    /// Leading static sections are rendered before this returns.
    pub fn start_stream<W: Write + Seek + Send>(self, writer: W) -> Result<XlsxStreamer<W>> {
        self.validate()?;
        let mut stream = XlsxStreamer::new(
            writer,
            self.l_sheets,
            self.styles_default,
            self.dict_formatters,
        );
        stream.start()?;
        Ok(stream)
    }

    /// Start streaming into any document sink.
    ///
    /// Leading static sections are rendered before this returns.
    pub fn start_stream_into<D: DocumentSink>(self, sink: D) -> Result<SectionStreamer<D>> {
        self.validate()?;
        let mut stream = SectionStreamer::new(
            sink,
            self.l_sheets,
            self.styles_default,
            self.dict_formatters,
        );
        stream.start()?;
        Ok(stream)
    }

    // #endregion
}
