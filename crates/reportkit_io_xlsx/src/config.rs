//! Declarative YAML report documents.
//!
//! ```yaml
//! sheets:
//!   - name: Summary
//!     sections:
//!       - id: items
//!         title: Items
//!         columns:
//!           - { field_name: ID, header: Identifier, width: 12 }
//!         data:
//!           - { ID: 1, Name: first }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ReportError, Result};
use crate::record::RecordAccessor;
use crate::spec::{
    EnumSectionDirection, EnumSectionKind, SpecCellStyle, SpecColumn, SpecCompareRef,
    SpecRowHeights, SpecSection, SpecSheet,
};

/// Root of a YAML report document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfReport {
    /// Sheets in render order.
    #[serde(default)]
    pub sheets: Vec<ConfSheet>,
}

/// One sheet entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfSheet {
    /// Sheet name.
    pub name: String,
    /// Sections in render order.
    #[serde(default)]
    pub sections: Vec<ConfSection>,
}

fn default_show_header() -> bool {
    true
}

/// One section entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfSection {
    /// Section id, required for binding and streaming.
    #[serde(default)]
    pub id: Option<String>,
    /// Title text; empty means no title row.
    #[serde(default)]
    pub title: String,
    /// `full`, `title_only` or `hidden`.
    #[serde(default, rename = "type")]
    pub kind: EnumSectionKind,
    /// `vertical` or `horizontal`.
    #[serde(default)]
    pub direction: EnumSectionDirection,
    /// Explicit A1 anchor.
    #[serde(default)]
    pub position: Option<String>,
    /// Lock every cell unless a column overrides it.
    #[serde(default)]
    pub locked: bool,
    /// Emit the header row.
    #[serde(default = "default_show_header")]
    pub show_header: bool,
    /// Title merge width for title-only sections.
    #[serde(default)]
    pub col_span: Option<usize>,
    /// Sections whose data length this one mirrors.
    #[serde(default)]
    pub source_sections: Vec<String>,
    /// Add an autofilter over header and data.
    #[serde(default)]
    pub auto_filter: bool,
    /// Row height hints.
    #[serde(default)]
    pub row_heights: SpecRowHeights,
    /// Title style patch.
    #[serde(default)]
    pub title_style: Option<SpecCellStyle>,
    /// Header style patch.
    #[serde(default)]
    pub header_style: Option<SpecCellStyle>,
    /// Data style patch.
    #[serde(default)]
    pub data_style: Option<SpecCellStyle>,
    /// Explicit columns in order.
    #[serde(default)]
    pub columns: Vec<ConfColumn>,
    /// Inline key-value rows bound at load time.
    #[serde(default)]
    pub data: Option<Vec<Map<String, Value>>>,
}

/// One column entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfColumn {
    /// Record field read by this column.
    pub field_name: String,
    /// Defaults to `field_name`.
    #[serde(default)]
    pub header: Option<String>,
    /// Column width; sheet default when absent.
    #[serde(default)]
    pub width: Option<f64>,
    /// Overrides the section lock.
    #[serde(default)]
    pub locked: Option<bool>,
    /// Registered formatter name.
    #[serde(default)]
    pub formatter: Option<String>,
    /// Data style patch for this column.
    #[serde(default)]
    pub style: Option<SpecCellStyle>,
    /// Value of the hidden metadata row.
    #[serde(default)]
    pub hidden_field_name: Option<String>,
    /// Left side of a comparison.
    #[serde(default)]
    pub compare_with: Option<SpecCompareRef>,
    /// Right side of a comparison.
    #[serde(default)]
    pub compare_against: Option<SpecCompareRef>,
}

/// Parse a YAML report document.
pub fn parse_report_conf(text: &str) -> Result<ConfReport> {
    if text.trim().is_empty() {
        return Err(ReportError::Config("Report document is empty.".to_string()));
    }
    serde_yaml::from_str(text)
        .map_err(|err| ReportError::Config(format!("Invalid report document: {err}")))
}

impl ConfColumn {
    fn into_spec(self) -> Result<SpecColumn> {
        if self.field_name.trim().is_empty() {
            return Err(ReportError::Config(
                "Column field_name must not be empty.".to_string(),
            ));
        }
        Ok(SpecColumn {
            header: self.header.unwrap_or_else(|| self.field_name.clone()),
            field_name: self.field_name,
            width: self.width.unwrap_or(0.0),
            locked: self.locked,
            formatter: self.formatter,
            formatter_fn: None,
            hidden_field_name: self.hidden_field_name,
            compare_with: self.compare_with,
            compare_against: self.compare_against,
            style: self.style,
        })
    }
}

impl ConfSection {
    fn into_spec(self) -> Result<SpecSection> {
        let columns = self
            .columns
            .into_iter()
            .map(ConfColumn::into_spec)
            .collect::<Result<Vec<_>>>()?;
        let data = self.data.map(|l_rows| {
            l_rows
                .into_iter()
                .map(|row| Box::new(row) as Box<dyn RecordAccessor>)
                .collect()
        });

        Ok(SpecSection {
            id: self.id,
            title: self.title,
            kind: self.kind,
            direction: self.direction,
            position: self.position,
            locked: self.locked,
            show_header: self.show_header,
            col_span: self.col_span,
            source_sections: self.source_sections,
            row_heights: self.row_heights,
            columns,
            title_style: self.title_style,
            header_style: self.header_style,
            data_style: self.data_style,
            auto_filter: self.auto_filter,
            data,
        })
    }
}

impl ConfReport {
    /// Convert into sheet templates.
    pub fn into_sheets(self) -> Result<Vec<SpecSheet>> {
        self.sheets
            .into_iter()
            .map(|sheet| {
                Ok(SpecSheet {
                    name: sheet.name,
                    sections: sheet
                        .sections
                        .into_iter()
                        .map(ConfSection::into_spec)
                        .collect::<Result<Vec<_>>>()?,
                })
            })
            .collect()
    }
}
