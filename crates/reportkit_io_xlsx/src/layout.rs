//! Section layout planning.
//!
//! Pass 1 ([`plan_sheet_placements`]) walks the sections of a sheet in
//! declaration order and records one [`SpecSectionPlacement`] per section in
//! a [`PlacementTable`]. Pass 2 (emission, in `render` and `stream`) replays
//! the same [`LayoutCursor`] rules to re-derive identical anchors and only
//! consults the table to address cells of other sections.

use std::collections::BTreeMap;

use tracing::debug;

use crate::column::resolve_columns;
use crate::conf::C_COMPARE_DIFF_MARKER;
use crate::error::{ReportError, Result};
use crate::spec::{
    EnumSectionDirection, EnumSectionKind, SpecColumn, SpecCompareRef, SpecSection, SpecSheet,
};
use crate::util::{derive_cell_ref, parse_cell_ref};

////////////////////////////////////////////////////////////////////////////////
// #region Placement

/// Resolved coordinates of one section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSectionPlacement {
    /// Section id, if any.
    pub section_id: Option<String>,
    /// Anchor row (title or first head row).
    pub row_anchor: usize,
    /// Anchor column.
    pub col_anchor: usize,
    /// First data row.
    pub row_data_start: usize,
    /// Resolved data row count.
    pub n_rows_data: usize,
    /// Field name to column offset from `col_anchor`.
    pub dict_field_offsets: BTreeMap<String, usize>,
}

/// Row/column footprint of a section independent of its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecSectionGeometry {
    /// Title row present.
    pub if_has_title: bool,
    /// Hidden metadata row present.
    pub if_has_hidden_row: bool,
    /// Header row present.
    pub if_has_header: bool,
    /// Columns spanned by the section.
    pub n_cols_width: usize,
}

impl SpecSectionGeometry {
    /// Derive the footprint of `section` with its frozen `columns`.
    pub fn derive(section: &SpecSection, columns: &[SpecColumn]) -> Self {
        if section.kind == EnumSectionKind::TitleOnly {
            return Self {
                if_has_title: true,
                if_has_hidden_row: false,
                if_has_header: false,
                n_cols_width: section
                    .col_span
                    .unwrap_or(columns.len())
                    .max(1),
            };
        }

        Self {
            if_has_title: !section.title.is_empty(),
            if_has_hidden_row: columns.iter().any(|col| col.hidden_field_name.is_some()),
            if_has_header: section.show_header,
            n_cols_width: columns.len().max(1),
        }
    }

    /// Rows emitted before the first data row.
    pub fn n_rows_head(&self) -> usize {
        usize::from(self.if_has_title)
            + usize::from(self.if_has_hidden_row)
            + usize::from(self.if_has_header)
    }
}

impl SpecSectionPlacement {
    /// Build the placement of a section anchored at `anchor`.
    pub fn new(
        section: &SpecSection,
        columns: &[SpecColumn],
        anchor: (usize, usize),
        geometry: &SpecSectionGeometry,
        n_rows_data: usize,
    ) -> Self {
        let (row_anchor, col_anchor) = anchor;
        Self {
            section_id: section.id.clone(),
            row_anchor,
            col_anchor,
            row_data_start: row_anchor + geometry.n_rows_head(),
            n_rows_data,
            dict_field_offsets: columns
                .iter()
                .enumerate()
                .map(|(n_offset, col)| (col.field_name.clone(), n_offset))
                .collect(),
        }
    }
}

/// Arena of placements for one sheet, indexed by declaration order.
///
/// Lookups fail closed: unknown ids, unknown fields and references to the
/// current or a later section are errors.
#[derive(Debug, Clone, Default)]
pub struct PlacementTable {
    l_placements: Vec<SpecSectionPlacement>,
    dict_idx_by_id: BTreeMap<String, usize>,
}

impl PlacementTable {
    /// Append the placement of the next section and return its index.
    pub fn push(&mut self, placement: SpecSectionPlacement) -> usize {
        let n_idx = self.l_placements.len();
        if let Some(c_id) = &placement.section_id {
            self.dict_idx_by_id.insert(c_id.clone(), n_idx);
        }
        self.l_placements.push(placement);
        n_idx
    }

    /// Number of placed sections.
    pub fn len(&self) -> usize {
        self.l_placements.len()
    }

    /// Whether no section has been placed.
    pub fn is_empty(&self) -> bool {
        self.l_placements.is_empty()
    }

    /// Placement of the most recently placed section.
    pub fn last_mut(&mut self) -> Option<&mut SpecSectionPlacement> {
        self.l_placements.last_mut()
    }

    /// Placements in declaration order.
    pub fn placements(&self) -> &[SpecSectionPlacement] {
        &self.l_placements
    }

    /// Consume the table into its placements.
    pub fn into_placements(self) -> Vec<SpecSectionPlacement> {
        self.l_placements
    }

    /// Placement of a section declared before `n_idx_section_current`.
    pub fn get_backward(
        &self,
        section_id: &str,
        n_idx_section_current: usize,
    ) -> Result<&SpecSectionPlacement> {
        let Some(&n_idx) = self.dict_idx_by_id.get(section_id) else {
            return Err(ReportError::Resolution(format!(
                "Section {section_id:?} has no placement."
            )));
        };
        if n_idx >= n_idx_section_current {
            return Err(ReportError::Resolution(format!(
                "Section {section_id:?} is not declared before the referencing section."
            )));
        }
        Ok(&self.l_placements[n_idx])
    }

    /// Absolute `(row, col)` of `cell_ref.field_name` at data row `n_idx_row`.
    pub fn resolve_cell(
        &self,
        cell_ref: &SpecCompareRef,
        n_idx_row: usize,
        n_idx_section_current: usize,
    ) -> Result<(usize, usize)> {
        let placement = self.get_backward(&cell_ref.section_id, n_idx_section_current)?;
        let Some(&n_offset) = placement.dict_field_offsets.get(&cell_ref.field_name) else {
            return Err(ReportError::Resolution(format!(
                "Section {:?} has no field {:?}.",
                cell_ref.section_id, cell_ref.field_name
            )));
        };
        Ok((
            placement.row_data_start + n_idx_row,
            placement.col_anchor + n_offset,
        ))
    }
}

/// Build the equality-diff formula of a comparison column at `n_idx_row`.
pub fn derive_compare_formula(
    table: &PlacementTable,
    column: &SpecColumn,
    n_idx_row: usize,
    n_idx_section_current: usize,
) -> Result<String> {
    let (Some(ref_with), Some(ref_against)) = (&column.compare_with, &column.compare_against)
    else {
        return Err(ReportError::Resolution(format!(
            "Comparison column {:?} needs both compare_with and compare_against.",
            column.field_name
        )));
    };

    let (n_row_a, n_col_a) = table.resolve_cell(ref_with, n_idx_row, n_idx_section_current)?;
    let (n_row_b, n_col_b) = table.resolve_cell(ref_against, n_idx_row, n_idx_section_current)?;
    Ok(format!(
        "IF({}<>{},\"{C_COMPARE_DIFF_MARKER}\",\"\")",
        derive_cell_ref(n_row_a, n_col_a),
        derive_cell_ref(n_row_b, n_col_b),
    ))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Cursor

/// Automatic placement cursors shared by both passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutCursor {
    /// Next free row for vertical sections.
    pub row_next: usize,
    /// Row where the current horizontal band starts.
    pub row_band: usize,
    /// Next free column within the horizontal band.
    pub col_next: usize,
}

impl LayoutCursor {
    /// Anchor of `section`: explicit position, else the cursor for its direction.
    pub fn derive_anchor(&self, section: &SpecSection) -> Result<(usize, usize)> {
        if let Some(c_position) = &section.position {
            return parse_cell_ref(c_position);
        }
        Ok(match section.direction {
            EnumSectionDirection::Vertical => (self.row_next, 0),
            EnumSectionDirection::Horizontal => (self.row_band, self.col_next),
        })
    }

    /// Move the cursors past a section placed at `anchor`.
    ///
    /// A horizontal title-only section moves `col_next` by its span and
    /// raises `row_next` to just below its own title row, so a following
    /// vertical section starts under the banner. It never reserves header or
    /// data rows and leaves the band row unchanged.
    pub fn advance(
        &mut self,
        section: &SpecSection,
        anchor: (usize, usize),
        geometry: &SpecSectionGeometry,
        n_rows_data: usize,
    ) {
        let (n_row, n_col) = anchor;

        if section.kind == EnumSectionKind::TitleOnly
            && section.direction == EnumSectionDirection::Horizontal
        {
            self.col_next = usize::max(self.col_next, n_col + geometry.n_cols_width);
            self.row_next = usize::max(self.row_next, n_row + 1);
            return;
        }

        let n_row_end = n_row + geometry.n_rows_head() + n_rows_data;
        match section.direction {
            EnumSectionDirection::Vertical => {
                self.row_next = usize::max(self.row_next, n_row_end);
                self.row_band = self.row_next;
                self.col_next = 0;
            }
            EnumSectionDirection::Horizontal => {
                self.col_next = usize::max(self.col_next, n_col + geometry.n_cols_width);
                self.row_next = usize::max(self.row_next, n_row_end);
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PassOne

/// Resolve and freeze the column list of every section of `sheet`.
pub fn resolve_sheet_columns(sheet: &SpecSheet) -> Vec<Vec<SpecColumn>> {
    sheet
        .sections
        .iter()
        .map(|section| resolve_columns(&section.columns, section.data.as_deref().unwrap_or(&[])))
        .collect()
}

/// Data rows of `section`: bound length, or the first source's resolved length.
pub fn derive_data_length(
    section: &SpecSection,
    table: &PlacementTable,
    n_idx_section: usize,
    n_rows_bound: usize,
) -> Result<usize> {
    if section.kind == EnumSectionKind::TitleOnly {
        return Ok(0);
    }
    match section.source_sections.first() {
        Some(c_source) => Ok(table.get_backward(c_source, n_idx_section)?.n_rows_data),
        None => Ok(n_rows_bound),
    }
}

/// Pass 1: place every section of `sheet` using its frozen `columns`.
pub fn plan_sheet_placements(
    sheet: &SpecSheet,
    columns_by_section: &[Vec<SpecColumn>],
) -> Result<PlacementTable> {
    let mut cursor = LayoutCursor::default();
    let mut table = PlacementTable::default();

    for (n_idx_section, (section, columns)) in
        sheet.sections.iter().zip(columns_by_section).enumerate()
    {
        let geometry = SpecSectionGeometry::derive(section, columns);
        let anchor = cursor.derive_anchor(section)?;
        let n_rows_data =
            derive_data_length(section, &table, n_idx_section, section.n_rows_bound())?;

        debug!(
            sheet = %sheet.name,
            section = section.id.as_deref().unwrap_or(""),
            row = anchor.0,
            col = anchor.1,
            rows_data = n_rows_data,
            "section placed"
        );

        cursor.advance(section, anchor, &geometry, n_rows_data);
        table.push(SpecSectionPlacement::new(
            section,
            columns,
            anchor,
            &geometry,
            n_rows_data,
        ));
    }

    Ok(table)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
