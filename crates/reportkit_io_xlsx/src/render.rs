//! Batch rendering and the section emission shared with streaming.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::conf::C_COMPARE_ERROR_MARKER;
use crate::document::{CellSink, DocumentSink, EnumSheetMode};
use crate::error::{ReportError, Result};
use crate::layout::{
    LayoutCursor, PlacementTable, SpecSectionGeometry, derive_compare_formula,
    plan_sheet_placements, resolve_sheet_columns,
};
use crate::record::RecordAccessor;
use crate::spec::{
    EnumCellContent, EnumCellValue, EnumSectionKind, SpecColumn, SpecFormatter,
    SpecRenderReport, SpecSection, SpecSheet, SpecSheetReport, SpecStyleSet,
};
use crate::style::SpecSectionStyles;
use crate::util::sanitize_sheet_name;

/// Named formatters available to columns.
pub type DictFormatters = BTreeMap<String, SpecFormatter>;

////////////////////////////////////////////////////////////////////////////////
// #region SectionEmitter

/// Resolve each column's formatter: closure first, then registry name.
pub fn resolve_column_formatters(
    columns: &[SpecColumn],
    dict_formatters: &DictFormatters,
) -> Result<Vec<Option<SpecFormatter>>> {
    columns
        .iter()
        .map(|col| {
            if let Some(formatter) = &col.formatter_fn {
                return Ok(Some(formatter.clone()));
            }
            match &col.formatter {
                None => Ok(None),
                Some(c_name) => dict_formatters.get(c_name).cloned().map(Some).ok_or_else(|| {
                    ReportError::Resolution(format!(
                        "Formatter {c_name:?} of column {:?} is not registered.",
                        col.field_name
                    ))
                }),
            }
        })
        .collect()
}

/// Writes the cells of one section anchored at a fixed cell.
pub(crate) struct SectionEmitter<'a> {
    section: &'a SpecSection,
    columns: &'a [SpecColumn],
    styles: SpecSectionStyles,
    l_formatters: Vec<Option<SpecFormatter>>,
    geometry: SpecSectionGeometry,
    n_idx_section: usize,
    row_anchor: usize,
    col_anchor: usize,
}

impl<'a> SectionEmitter<'a> {
    pub(crate) fn new(
        section: &'a SpecSection,
        columns: &'a [SpecColumn],
        n_idx_section: usize,
        anchor: (usize, usize),
        styles_default: &SpecStyleSet,
        dict_formatters: &DictFormatters,
    ) -> Result<Self> {
        Ok(Self {
            section,
            columns,
            styles: SpecSectionStyles::resolve(section, columns, styles_default),
            l_formatters: resolve_column_formatters(columns, dict_formatters)?,
            geometry: SpecSectionGeometry::derive(section, columns),
            n_idx_section,
            row_anchor: anchor.0,
            col_anchor: anchor.1,
        })
    }

    pub(crate) fn geometry(&self) -> &SpecSectionGeometry {
        &self.geometry
    }

    pub(crate) fn columns(&self) -> &'a [SpecColumn] {
        self.columns
    }

    /// Whether every row of the section is hidden.
    pub(crate) fn hides_all_rows(&self) -> bool {
        self.section.kind == EnumSectionKind::Hidden
    }

    pub(crate) fn row_data_start(&self) -> usize {
        self.row_anchor + self.geometry.n_rows_head()
    }

    /// Row of the hidden metadata row, if any.
    pub(crate) fn row_hidden_meta(&self) -> Option<usize> {
        self.geometry
            .if_has_hidden_row
            .then(|| self.row_anchor + usize::from(self.geometry.if_has_title))
    }

    pub(crate) fn row_header(&self) -> Option<usize> {
        self.geometry.if_has_header.then(|| {
            self.row_anchor
                + usize::from(self.geometry.if_has_title)
                + usize::from(self.geometry.if_has_hidden_row)
        })
    }

    /// Rows to hide once `n_rows_data` data rows are written.
    pub(crate) fn derive_hidden_rows(&self, n_rows_data: usize) -> Vec<usize> {
        if self.hides_all_rows() {
            return (self.row_anchor..self.row_data_start() + n_rows_data).collect();
        }
        self.row_hidden_meta().into_iter().collect()
    }

    /// Write title, hidden metadata and header rows.
    pub(crate) fn emit_head<S: CellSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        if self.geometry.if_has_title {
            let n_col_last = self.col_anchor + self.geometry.n_cols_width - 1;
            sink.merge_cells(
                self.row_anchor,
                self.col_anchor,
                n_col_last,
                &self.section.title,
                &self.styles.title,
            )?;
            if let Some(height) = self.section.row_heights.title {
                sink.set_row_height(self.row_anchor, height)?;
            }
        }

        if let Some(n_row) = self.row_hidden_meta() {
            for (n_offset, col) in self.columns.iter().enumerate() {
                let value = col
                    .hidden_field_name
                    .as_deref()
                    .map_or(EnumCellValue::None, EnumCellValue::from);
                sink.write_cell(
                    n_row,
                    self.col_anchor + n_offset,
                    &EnumCellContent::Value(value),
                    &self.styles.hidden,
                )?;
            }
        }

        if let Some(n_row) = self.row_header() {
            for (n_offset, (col, style)) in
                self.columns.iter().zip(&self.styles.header_by_col).enumerate()
            {
                sink.write_cell(
                    n_row,
                    self.col_anchor + n_offset,
                    &EnumCellContent::Value(EnumCellValue::from(col.header.as_str())),
                    style,
                )?;
            }
            if let Some(height) = self.section.row_heights.header {
                sink.set_row_height(n_row, height)?;
            }
        }
        Ok(())
    }

    /// Formatted value of column `n_idx_col` for `record`.
    pub(crate) fn derive_value_cell(
        &self,
        n_idx_col: usize,
        record: Option<&dyn RecordAccessor>,
    ) -> EnumCellContent {
        let value = record
            .and_then(|rec| rec.field_value(&self.columns[n_idx_col].field_name))
            .unwrap_or_default();
        let value = match &self.l_formatters[n_idx_col] {
            Some(formatter) => formatter.apply(&value),
            None => value,
        };
        EnumCellContent::Value(value)
    }

    /// Comparison formula of `column` at data row `n_idx_row`.
    pub(crate) fn derive_compare_cell(
        &self,
        column: &SpecColumn,
        n_idx_row: usize,
        table: &PlacementTable,
    ) -> Result<EnumCellContent> {
        derive_compare_formula(table, column, n_idx_row, self.n_idx_section)
            .map(EnumCellContent::Formula)
    }

    /// Write one data row of already derived cells.
    pub(crate) fn emit_row<S: CellSink + ?Sized>(
        &self,
        sink: &mut S,
        n_idx_row: usize,
        l_contents: &[EnumCellContent],
    ) -> Result<()> {
        let n_row = self.row_data_start() + n_idx_row;
        for (n_offset, (content, style)) in
            l_contents.iter().zip(&self.styles.data_by_col).enumerate()
        {
            sink.write_cell(n_row, self.col_anchor + n_offset, content, style)?;
        }
        if let Some(height) = self.section.row_heights.data {
            sink.set_row_height(n_row, height)?;
        }
        Ok(())
    }

    /// Autofilter range over header and data rows, if requested.
    pub(crate) fn derive_autofilter_range(
        &self,
        n_rows_data: usize,
    ) -> Option<(usize, usize, usize, usize)> {
        if !self.section.auto_filter || self.columns.is_empty() {
            return None;
        }
        let n_row_header = self.row_header()?;
        Some((
            n_row_header,
            self.col_anchor,
            n_row_header + n_rows_data,
            self.col_anchor + self.columns.len() - 1,
        ))
    }
}

/// Max configured width per absolute column over all sections.
pub(crate) fn derive_column_widths(
    sheet: &SpecSheet,
    columns_by_section: &[Vec<SpecColumn>],
    col_anchors: &[usize],
) -> BTreeMap<usize, f64> {
    let mut dict_widths: BTreeMap<usize, f64> = BTreeMap::new();
    for ((section, columns), &n_col_anchor) in sheet
        .sections
        .iter()
        .zip(columns_by_section)
        .zip(col_anchors)
    {
        if section.kind == EnumSectionKind::TitleOnly {
            continue;
        }
        for (n_offset, col) in columns.iter().enumerate() {
            if col.width <= 0.0 {
                continue;
            }
            let width = dict_widths.entry(n_col_anchor + n_offset).or_insert(0.0);
            *width = width.max(col.width);
        }
    }
    dict_widths
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region BatchRender

/// Pass 2: render every sheet into `sink`.
pub fn render_workbook<D: DocumentSink + ?Sized>(
    sheets: &[SpecSheet],
    styles_default: &SpecStyleSet,
    dict_formatters: &DictFormatters,
    sink: &mut D,
) -> Result<SpecRenderReport> {
    let mut report = SpecRenderReport::default();
    for sheet in sheets {
        let sheet_report =
            render_sheet(sheet, styles_default, dict_formatters, sink, &mut report)?;
        report.sheets.push(sheet_report);
    }
    info!(
        n_sheets = report.sheets.len(),
        n_warnings = report.warnings.len(),
        "workbook rendered"
    );
    Ok(report)
}

fn render_sheet<D: DocumentSink + ?Sized>(
    sheet: &SpecSheet,
    styles_default: &SpecStyleSet,
    dict_formatters: &DictFormatters,
    sink: &mut D,
    report: &mut SpecRenderReport,
) -> Result<SpecSheetReport> {
    let sheet_name = sink.add_sheet(
        &sanitize_sheet_name(&sheet.name, "_"),
        EnumSheetMode::InMemory,
    )?;
    let l_columns = resolve_sheet_columns(sheet);
    let table = plan_sheet_placements(sheet, &l_columns)?;

    let if_uses_lock = sheet.uses_lock();
    if if_uses_lock {
        sink.unlock_all_cells()?;
    }

    let l_col_anchors: Vec<usize> = table.placements().iter().map(|p| p.col_anchor).collect();
    for (n_col, width) in derive_column_widths(sheet, &l_columns, &l_col_anchors) {
        sink.set_column_width(n_col, width)?;
    }

    let mut cursor = LayoutCursor::default();
    let mut set_rows_hidden = BTreeSet::new();
    let mut if_has_autofilter = false;

    for (n_idx_section, (section, columns)) in sheet.sections.iter().zip(&l_columns).enumerate() {
        let anchor = cursor.derive_anchor(section)?;
        let n_rows_data = table.placements()[n_idx_section].n_rows_data;
        let emitter = SectionEmitter::new(
            section,
            columns,
            n_idx_section,
            anchor,
            styles_default,
            dict_formatters,
        )?;

        emitter.emit_head(sink)?;
        if section.kind != EnumSectionKind::TitleOnly {
            let mut set_cols_warned = BTreeSet::new();
            for n_idx_row in 0..n_rows_data {
                let record = section
                    .data
                    .as_ref()
                    .and_then(|data| data.get(n_idx_row))
                    .map(|rec| rec.as_ref() as &dyn RecordAccessor);

                let mut l_contents = Vec::with_capacity(columns.len());
                for (n_idx_col, col) in columns.iter().enumerate() {
                    if !col.is_comparison() {
                        l_contents.push(emitter.derive_value_cell(n_idx_col, record));
                        continue;
                    }
                    match emitter.derive_compare_cell(col, n_idx_row, &table) {
                        Ok(content) => l_contents.push(content),
                        Err(err) => {
                            if set_cols_warned.insert(n_idx_col) {
                                warn!(
                                    sheet = %sheet_name,
                                    section = section.id.as_deref().unwrap_or(""),
                                    column = %col.field_name,
                                    error = %err,
                                    "comparison column unresolved"
                                );
                                report.warn(format!(
                                    "{sheet_name}: comparison column {:?} unresolved: {err}",
                                    col.field_name
                                ));
                            }
                            l_contents.push(EnumCellContent::Value(EnumCellValue::from(
                                C_COMPARE_ERROR_MARKER,
                            )));
                        }
                    }
                }
                emitter.emit_row(sink, n_idx_row, &l_contents)?;
            }
        }

        set_rows_hidden.extend(emitter.derive_hidden_rows(n_rows_data));
        if let Some((n_row_first, n_col_first, n_row_last, n_col_last)) =
            emitter.derive_autofilter_range(n_rows_data)
        {
            if if_has_autofilter {
                report.warn(format!(
                    "{sheet_name}: only one autofilter per sheet, the last one wins"
                ));
            }
            sink.set_autofilter(n_row_first, n_col_first, n_row_last, n_col_last)?;
            if_has_autofilter = true;
        }

        debug!(
            sheet = %sheet_name,
            section = section.id.as_deref().unwrap_or(""),
            rows_data = n_rows_data,
            "section rendered"
        );
        cursor.advance(section, anchor, emitter.geometry(), n_rows_data);
    }

    for n_row in set_rows_hidden {
        sink.set_row_hidden(n_row)?;
    }
    if if_uses_lock {
        sink.protect_sheet()?;
    }

    Ok(SpecSheetReport {
        sheet_name,
        placements: table.into_placements(),
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::derive_default_style_set;
    use crate::document::GridDocument;
    use crate::record::SpecRecordRow;
    use crate::spec::{EnumSectionDirection, SpecCompareRef, SpecRecordBatch};

    fn items(l_values: &[(&str, i64)]) -> SpecRecordBatch {
        l_values
            .iter()
            .map(|(c_name, n_value)| {
                Box::new(SpecRecordRow::new([
                    ("Name", EnumCellValue::from(*c_name)),
                    ("Value", EnumCellValue::from(*n_value)),
                ])) as Box<dyn RecordAccessor>
            })
            .collect()
    }

    fn render(sheets: &[SpecSheet]) -> Result<(GridDocument, SpecRenderReport)> {
        render_with(sheets, &DictFormatters::new())
    }

    fn render_with(
        sheets: &[SpecSheet],
        dict_formatters: &DictFormatters,
    ) -> Result<(GridDocument, SpecRenderReport)> {
        let mut document = GridDocument::new();
        let report = render_workbook(
            sheets,
            &derive_default_style_set(),
            dict_formatters,
            &mut document,
        )?;
        Ok((document, report))
    }

    fn sheet_compare(compare_against_field: &str) -> SpecSheet {
        let mut sheet = SpecSheet {
            name: "Compare".to_string(),
            ..Default::default()
        };
        sheet.add_section(SpecSection {
            data: Some(items(&[("Item1", 100)])),
            ..SpecSection::new("before", "Before")
        });
        sheet.add_section(SpecSection {
            data: Some(items(&[("Item1", 150)])),
            ..SpecSection::new("after", "After")
        });
        sheet.add_section(SpecSection {
            source_sections: vec!["before".to_string()],
            columns: vec![SpecColumn {
                compare_with: Some(SpecCompareRef::new("before", "Value")),
                compare_against: Some(SpecCompareRef::new("after", compare_against_field)),
                ..SpecColumn::new("ValueDiff", "Value changed")
            }],
            ..SpecSection::new("diff", "Diff")
        });
        sheet
    }

    #[test]
    fn records_round_trip_into_rows_and_offsets() {
        let mut sheet = SpecSheet {
            name: "Data".to_string(),
            ..Default::default()
        };
        sheet.add_section(SpecSection {
            data: Some(items(&[("a", 1), ("b", 2), ("c", 3)])),
            ..SpecSection::new("items", "Items")
        });

        let (document, report) = render(&[sheet]).expect("render");
        let placement = &report.sheets[0].placements[0];
        assert_eq!(placement.n_rows_data, 3);
        assert_eq!(placement.dict_field_offsets["Name"], 0);
        assert_eq!(placement.dict_field_offsets["Value"], 1);

        let grid = &document.sheets()[0];
        assert_eq!(grid.text(0, 0), "Items");
        assert_eq!(grid.text(1, 0), "Name");
        assert_eq!(grid.text(1, 1), "Value");
        assert_eq!(grid.text(2, 0), "a");
        assert_eq!(grid.text(4, 1), "3");
        assert_eq!(grid.l_merges, vec![(0, 0, 1)]);
        assert!(!grid.if_protected);
    }

    #[test]
    fn untitled_section_writes_header_and_two_rows() {
        let mut sheet = SpecSheet {
            name: "Ids".to_string(),
            ..Default::default()
        };
        sheet.add_section(SpecSection {
            data: Some(
                [(1_i64, "first"), (2, "second")]
                    .into_iter()
                    .map(|(n_id, c_name)| {
                        Box::new(SpecRecordRow::new([
                            ("ID", EnumCellValue::from(n_id)),
                            ("Name", EnumCellValue::from(c_name)),
                        ])) as Box<dyn RecordAccessor>
                    })
                    .collect(),
            ),
            ..SpecSection::new("ids", "")
        });

        let (document, report) = render(&[sheet]).expect("render");
        let placement = &report.sheets[0].placements[0];
        assert_eq!(placement.row_data_start, 1);
        assert_eq!(placement.n_rows_data, 2);
        assert_eq!(placement.dict_field_offsets["ID"], 0);
        assert_eq!(placement.dict_field_offsets["Name"], 1);

        let grid = &document.sheets()[0];
        assert_eq!(grid.extent(), (3, 2));
        assert_eq!(grid.text(0, 0), "ID");
        assert_eq!(grid.text(0, 1), "Name");
        assert_eq!(grid.text(1, 0), "1");
        assert_eq!(grid.text(2, 1), "second");
        assert!(grid.l_merges.is_empty());
    }

    #[test]
    fn comparison_column_references_both_sections() {
        let (document, report) = render(&[sheet_compare("Value")]).expect("render");
        assert!(report.warnings.is_empty());

        // before: rows 0..3, after: rows 3..6, diff: title 6, header 7, data 8
        let grid = &document.sheets()[0];
        assert_eq!(grid.text(2, 1), "100");
        assert_eq!(grid.text(5, 1), "150");
        assert_eq!(grid.text(8, 0), "=IF(B3<>B6,\"DIFF\",\"\")");
        assert_eq!(report.sheets[0].placements[2].n_rows_data, 1);
    }

    #[test]
    fn unresolved_comparison_writes_marker_and_warns() {
        let (document, report) = render(&[sheet_compare("Missing")]).expect("render");
        let grid = &document.sheets()[0];
        assert_eq!(grid.text(8, 0), C_COMPARE_ERROR_MARKER);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("ValueDiff"));
    }

    #[test]
    fn rendering_twice_yields_identical_placements() {
        let l_sheets = [sheet_compare("Value")];
        let (_, report_first) = render(&l_sheets).expect("render");
        let (_, report_second) = render(&l_sheets).expect("render");
        assert_eq!(report_first, report_second);
    }

    #[test]
    fn hidden_section_rows_are_hidden_and_sheet_protected() {
        let mut sheet = SpecSheet {
            name: "Meta".to_string(),
            ..Default::default()
        };
        sheet.add_section(SpecSection {
            data: Some(items(&[("a", 1)])),
            ..SpecSection::new("visible", "Visible")
        });
        sheet.add_section(SpecSection {
            kind: EnumSectionKind::Hidden,
            data: Some(items(&[("x", 9), ("y", 8)])),
            ..SpecSection::new("meta", "Meta")
        });

        let (document, _) = render(&[sheet]).expect("render");
        let grid = &document.sheets()[0];
        assert_eq!(
            grid.set_rows_hidden.iter().copied().collect::<Vec<_>>(),
            vec![3, 4, 5, 6]
        );
        assert!(grid.if_unlocked_all);
        assert!(grid.if_protected);
        let cell = grid.cell(5, 0).expect("hidden data");
        assert!(cell.style.is_locked());
        assert!(!grid.cell(2, 0).expect("visible data").style.is_locked());
    }

    #[test]
    fn column_lock_override_and_hidden_metadata_row() {
        let mut sheet = SpecSheet {
            name: "Locks".to_string(),
            ..Default::default()
        };
        sheet.add_section(SpecSection {
            locked: true,
            columns: vec![
                SpecColumn {
                    locked: Some(false),
                    hidden_field_name: Some("name_key".to_string()),
                    ..SpecColumn::new("Name", "Name")
                },
                SpecColumn::new("Value", "Value"),
            ],
            data: Some(items(&[("a", 1)])),
            ..SpecSection::new("s", "Locked")
        });

        let (document, report) = render(&[sheet]).expect("render");
        let grid = &document.sheets()[0];
        // title 0, hidden metadata 1, header 2, data 3
        assert_eq!(report.sheets[0].placements[0].row_data_start, 3);
        assert_eq!(grid.text(1, 0), "name_key");
        assert!(grid.set_rows_hidden.contains(&1));
        assert!(!grid.cell(3, 0).expect("cell").style.is_locked());
        assert!(grid.cell(3, 1).expect("cell").style.is_locked());
        assert!(grid.cell(0, 0).expect("title").style.is_locked());
        assert!(grid.if_protected);
    }

    #[test]
    fn title_only_section_merges_across_span() {
        let mut sheet = SpecSheet {
            name: "Titles".to_string(),
            ..Default::default()
        };
        sheet.add_section(SpecSection {
            kind: EnumSectionKind::TitleOnly,
            col_span: Some(4),
            ..SpecSection::new("banner", "Quarterly report")
        });
        sheet.add_section(SpecSection {
            data: Some(items(&[("a", 1)])),
            direction: EnumSectionDirection::Vertical,
            ..SpecSection::new("body", "Body")
        });

        let (document, report) = render(&[sheet]).expect("render");
        let grid = &document.sheets()[0];
        assert_eq!(grid.l_merges[0], (0, 0, 3));
        assert_eq!(grid.text(0, 0), "Quarterly report");
        assert_eq!(report.sheets[0].placements[1].row_anchor, 1);
    }

    #[test]
    fn formatters_apply_and_unknown_names_fail() {
        let mut dict_formatters = DictFormatters::new();
        dict_formatters.insert(
            "upper".to_string(),
            SpecFormatter::new(|value| EnumCellValue::from(value.to_text().to_uppercase())),
        );

        let build_sheet = |c_formatter: &str| {
            let mut sheet = SpecSheet {
                name: "Fmt".to_string(),
                ..Default::default()
            };
            sheet.add_section(SpecSection {
                columns: vec![SpecColumn {
                    formatter: Some(c_formatter.to_string()),
                    ..SpecColumn::new("Name", "Name")
                }],
                data: Some(items(&[("abc", 1)])),
                ..SpecSection::new("s", "S")
            });
            sheet
        };

        let (document, _) = render_with(&[build_sheet("upper")], &dict_formatters).expect("render");
        assert_eq!(document.sheets()[0].text(2, 0), "ABC");

        assert!(matches!(
            render_with(&[build_sheet("missing")], &dict_formatters),
            Err(ReportError::Resolution(_))
        ));
    }

    #[test]
    fn autofilter_and_widths_follow_columns() {
        let mut sheet = SpecSheet {
            name: "Filter".to_string(),
            ..Default::default()
        };
        sheet.add_section(SpecSection {
            auto_filter: true,
            columns: vec![SpecColumn {
                width: 24.0,
                ..SpecColumn::new("Name", "Name")
            }],
            data: Some(items(&[("a", 1), ("b", 2)])),
            ..SpecSection::new("s", "S")
        });

        let (document, _) = render(&[sheet]).expect("render");
        let grid = &document.sheets()[0];
        assert_eq!(grid.autofilter, Some((1, 0, 3, 1)));
        assert_eq!(grid.dict_col_widths.get(&0), Some(&24.0));
        assert!(grid.dict_col_widths.get(&1).is_some());
    }
}
