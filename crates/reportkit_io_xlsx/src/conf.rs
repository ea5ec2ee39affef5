//! Report constants and default preset factories.

use crate::spec::{SpecAlignStyle, SpecCellStyle, SpecFillStyle, SpecFontStyle, SpecStyleSet};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Max key-value rows scanned when discovering fields from dynamic records.
pub const N_ROWS_DISCOVERY_MAX: usize = 50;
/// Width given to columns discovered from data.
pub const N_WIDTH_COLUMN_DEFAULT: f64 = 15.0;
/// Buffered row count that triggers a stream flush.
pub const N_ROWS_STREAM_FLUSH: usize = 1_000;

/// Marker produced by comparison formulas when both cells differ.
pub const C_COMPARE_DIFF_MARKER: &str = "DIFF";
/// Cell text written when a comparison column cannot be resolved.
pub const C_COMPARE_ERROR_MARKER: &str = "#REF!";
/// Fill applied to locked cells that carry no explicit fill.
pub const C_COLOR_FILL_LOCKED: &str = "#E7E6E6";

/// Build the default style presets for title/header/data/hidden cells.
pub fn derive_default_style_set() -> SpecStyleSet {
    let cfg_base_style = SpecCellStyle {
        font: Some(SpecFontStyle {
            name: Some("Calibri".to_string()),
            size: Some(11),
            ..Default::default()
        }),
        alignment: Some(SpecAlignStyle {
            vertical: Some("vcenter".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    SpecStyleSet {
        title: cfg_base_style.with_(SpecCellStyle {
            font: Some(SpecFontStyle {
                bold: Some(true),
                size: Some(13),
                ..Default::default()
            }),
            alignment: Some(SpecAlignStyle {
                horizontal: Some("left".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        header: cfg_base_style.with_(SpecCellStyle {
            font: Some(SpecFontStyle {
                bold: Some(true),
                ..Default::default()
            }),
            fill: Some(SpecFillStyle {
                color: Some("#D9E1F2".to_string()),
            }),
            alignment: Some(SpecAlignStyle {
                horizontal: Some("center".to_string()),
                ..Default::default()
            }),
            border: Some(1),
            ..Default::default()
        }),
        data: cfg_base_style.with_(SpecCellStyle {
            border: Some(1),
            ..Default::default()
        }),
        hidden: cfg_base_style.with_(SpecCellStyle {
            font: Some(SpecFontStyle {
                color: Some("#808080".to_string()),
                italic: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}
