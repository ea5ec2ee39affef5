//! Shared report template and style models.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::record::RecordAccessor;

////////////////////////////////////////////////////////////////////////////////
// #region CellValues

/// Normalized cell value moving from bound records into the document.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EnumCellValue {
    /// Missing/blank value.
    #[default]
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Bool(bool),
}

impl EnumCellValue {
    /// Plain text rendering used by CSV export and header/title cells.
    pub fn to_text(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::String(val) => val.clone(),
            Self::Number(val) => val.to_string(),
            Self::Bool(val) => if *val { "TRUE" } else { "FALSE" }.to_string(),
        }
    }
}

impl From<&str> for EnumCellValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for EnumCellValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for EnumCellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for EnumCellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for EnumCellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Content written into one cell: a value or a formula (without leading `=`).
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellContent {
    /// Literal value.
    Value(EnumCellValue),
    /// Formula text.
    Formula(String),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellStyleSpecification

/// Font part of a cell style.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default)]
pub struct SpecFontStyle {
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,
    /// Font color (`#RRGGBB`).
    pub color: Option<String>,
    /// Font family name.
    pub name: Option<String>,
    /// Font size in points.
    pub size: Option<i64>,
}

impl SpecFontStyle {
    fn merge(&self, other: &SpecFontStyle) -> SpecFontStyle {
        SpecFontStyle {
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            color: other.color.clone().or_else(|| self.color.clone()),
            name: other.name.clone().or_else(|| self.name.clone()),
            size: other.size.or(self.size),
        }
    }
}

/// Fill part of a cell style.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default)]
pub struct SpecFillStyle {
    /// Background color (`#RRGGBB`).
    pub color: Option<String>,
}

/// Alignment part of a cell style.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default)]
pub struct SpecAlignStyle {
    /// Horizontal alignment (`left`, `center`, `right`, ...).
    pub horizontal: Option<String>,
    /// Vertical alignment (`top`, `vcenter`, `bottom`, ...).
    pub vertical: Option<String>,
    /// Text wrap.
    pub wrap: Option<bool>,
}

impl SpecAlignStyle {
    fn merge(&self, other: &SpecAlignStyle) -> SpecAlignStyle {
        SpecAlignStyle {
            horizontal: other
                .horizontal
                .clone()
                .or_else(|| self.horizontal.clone()),
            vertical: other.vertical.clone().or_else(|| self.vertical.clone()),
            wrap: other.wrap.or(self.wrap),
        }
    }
}

/// Style template for one class of rendered cells.
///
/// Every level of the cascade only overrides the fields it sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default)]
pub struct SpecCellStyle {
    /// Font settings.
    pub font: Option<SpecFontStyle>,
    /// Fill settings.
    pub fill: Option<SpecFillStyle>,
    /// Alignment settings.
    pub alignment: Option<SpecAlignStyle>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Number format code.
    pub num_format: Option<String>,
    /// Cell lock flag.
    pub locked: Option<bool>,
}

impl SpecCellStyle {
    /// Return a new style by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellStyle) -> SpecCellStyle {
        self.merge(&patch)
    }

    /// Merge two styles with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellStyle) -> SpecCellStyle {
        SpecCellStyle {
            font: match (&self.font, &other.font) {
                (Some(base), Some(patch)) => Some(base.merge(patch)),
                (base, patch) => patch.clone().or_else(|| base.clone()),
            },
            fill: match (&self.fill, &other.fill) {
                (Some(base), Some(patch)) => Some(SpecFillStyle {
                    color: patch.color.clone().or_else(|| base.color.clone()),
                }),
                (base, patch) => patch.clone().or_else(|| base.clone()),
            },
            alignment: match (&self.alignment, &other.alignment) {
                (Some(base), Some(patch)) => Some(base.merge(patch)),
                (base, patch) => patch.clone().or_else(|| base.clone()),
            },
            border: other.border.or(self.border),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            locked: other.locked.or(self.locked),
        }
    }

    /// Whether the resolved style is locked.
    pub fn is_locked(&self) -> bool {
        self.locked.unwrap_or(false)
    }
}

/// Default styles per rendered cell class.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecStyleSet {
    /// Section title cells.
    pub title: SpecCellStyle,
    /// Header row cells.
    pub header: SpecCellStyle,
    /// Data cells.
    pub data: SpecCellStyle,
    /// Hidden metadata row cells.
    pub hidden: SpecCellStyle,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TemplateSpecification

/// Section rendering kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumSectionKind {
    /// Title, optional header and data rows.
    #[default]
    Full,
    /// A single title cell (merged across its span).
    #[serde(alias = "title")]
    TitleOnly,
    /// Fully rendered but locked and invisible.
    Hidden,
}

/// Automatic placement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumSectionDirection {
    /// Stack below the previous sections.
    #[default]
    Vertical,
    /// Place to the right of the previous horizontal section.
    Horizontal,
}

/// Reference to a field of another section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpecCompareRef {
    /// Referenced section id.
    pub section_id: String,
    /// Referenced field name.
    pub field_name: String,
}

impl SpecCompareRef {
    /// Build a reference to `section_id.field_name`.
    pub fn new(section_id: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            field_name: field_name.into(),
        }
    }
}

/// Row height hints in points.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SpecRowHeights {
    /// Title row height.
    pub title: Option<f64>,
    /// Header row height.
    pub header: Option<f64>,
    /// Data row height.
    pub data: Option<f64>,
}

/// Functional cell formatter.
pub type FnCellFormatter = dyn Fn(&EnumCellValue) -> EnumCellValue + Send + Sync;

/// Shareable formatter handle attached to columns or the registry.
#[derive(Clone)]
pub struct SpecFormatter(pub Arc<FnCellFormatter>);

impl SpecFormatter {
    /// Wrap a formatter closure.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&EnumCellValue) -> EnumCellValue + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Apply the formatter to one value.
    pub fn apply(&self, value: &EnumCellValue) -> EnumCellValue {
        (self.0)(value)
    }
}

impl fmt::Debug for SpecFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpecFormatter(..)")
    }
}

/// One column of a section.
#[derive(Debug, Clone, Default)]
pub struct SpecColumn {
    /// Lookup key into a bound record.
    pub field_name: String,
    /// Header text.
    pub header: String,
    /// Column width in character units (`0` keeps the sheet default).
    pub width: f64,
    /// Lock override; wins over the section lock.
    pub locked: Option<bool>,
    /// Registered formatter name.
    pub formatter: Option<String>,
    /// Formatter closure; wins over `formatter`.
    pub formatter_fn: Option<SpecFormatter>,
    /// Value of the hidden metadata row for this column.
    pub hidden_field_name: Option<String>,
    /// Left-hand side of the equality-diff formula.
    pub compare_with: Option<SpecCompareRef>,
    /// Right-hand side of the equality-diff formula.
    pub compare_against: Option<SpecCompareRef>,
    /// Column-level data style, layered over the section data style.
    pub style: Option<SpecCellStyle>,
}

impl SpecColumn {
    /// Column with `field_name` and `header`.
    pub fn new(field_name: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            header: header.into(),
            ..Default::default()
        }
    }

    /// Whether the column renders a comparison formula instead of data.
    pub fn is_comparison(&self) -> bool {
        self.compare_with.is_some() || self.compare_against.is_some()
    }
}

/// Bound records of one section.
pub type SpecRecordBatch = Vec<Box<dyn RecordAccessor>>;

/// Titled block of a sheet.
#[derive(Debug, Default)]
pub struct SpecSection {
    /// Identifier for late binding and cross-references.
    pub id: Option<String>,
    /// Title text; empty means no title row.
    pub title: String,
    /// Rendering kind.
    pub kind: EnumSectionKind,
    /// Automatic placement direction.
    pub direction: EnumSectionDirection,
    /// Explicit anchor cell (`B3`) overriding automatic placement.
    pub position: Option<String>,
    /// Section-level lock flag.
    pub locked: bool,
    /// Emit a header row.
    pub show_header: bool,
    /// Title span for title-only sections.
    pub col_span: Option<usize>,
    /// Sections whose resolved row count this section mirrors.
    pub source_sections: Vec<String>,
    /// Row height hints.
    pub row_heights: SpecRowHeights,
    /// Explicit columns.
    pub columns: Vec<SpecColumn>,
    /// Title style.
    pub title_style: Option<SpecCellStyle>,
    /// Header style.
    pub header_style: Option<SpecCellStyle>,
    /// Data style.
    pub data_style: Option<SpecCellStyle>,
    /// Apply an autofilter over header and data rows.
    pub auto_filter: bool,
    /// Bound data.
    pub data: Option<SpecRecordBatch>,
}

impl SpecSection {
    /// Full vertical section with `id` and `title`, header shown.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: title.into(),
            show_header: true,
            ..Default::default()
        }
    }

    /// Look up a column by field name.
    pub fn column(&self, field_name: &str) -> Option<&SpecColumn> {
        self.columns.iter().find(|col| col.field_name == field_name)
    }

    /// Look up a column by field name for post-hoc mutation.
    pub fn column_mut(&mut self, field_name: &str) -> Option<&mut SpecColumn> {
        self.columns
            .iter_mut()
            .find(|col| col.field_name == field_name)
    }

    /// Append a column and return `self` for chaining.
    pub fn with_column(mut self, column: SpecColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Whether the section id equals `id`.
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }

    /// Number of bound records (`0` when unbound).
    pub fn n_rows_bound(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Whether the section can be rendered without waiting for a stream write.
    pub fn is_static(&self) -> bool {
        self.id.is_none() || self.data.is_some() || !self.source_sections.is_empty()
    }

    /// Whether any cell of the section will be locked.
    pub fn uses_lock(&self) -> bool {
        self.locked
            || self.kind == EnumSectionKind::Hidden
            || self
                .columns
                .iter()
                .any(|col| col.locked == Some(true) || col.hidden_field_name.is_some())
    }
}

/// One worksheet of the report.
#[derive(Debug, Default)]
pub struct SpecSheet {
    /// Worksheet name.
    pub name: String,
    /// Sections in render order.
    pub sections: Vec<SpecSection>,
}

impl SpecSheet {
    /// Append a section and return it for further configuration.
    pub fn add_section(&mut self, section: SpecSection) -> &mut SpecSection {
        self.sections.push(section);
        let n_idx_last = self.sections.len() - 1;
        &mut self.sections[n_idx_last]
    }

    /// Whether any section of the sheet locks cells.
    pub fn uses_lock(&self) -> bool {
        self.sections.iter().any(SpecSection::uses_lock)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Per-sheet render summary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecSheetReport {
    /// Worksheet name in the document.
    pub sheet_name: String,
    /// Section placements in declaration order.
    pub placements: Vec<crate::layout::SpecSectionPlacement>,
}

/// Per-render summary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecRenderReport {
    /// Sheets rendered, in order.
    pub sheets: Vec<SpecSheetReport>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecRenderReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
