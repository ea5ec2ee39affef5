//! `reportkit_io_xlsx` v1:
//! Declarative spreadsheet report engine.
//!
//! Modules:
//! - `conf`     : constants and default style presets
//! - `spec`     : template, style and report models
//! - `error`    : error taxonomy
//! - `util`     : pure helper functions (A1 references, sheet names)
//! - `record`   : uniform field access over bound data
//! - `column`   : column resolution and field discovery
//! - `style`    : style cascade, lock resolution, format conversion
//! - `layout`   : placement planning and cross-section references
//! - `document` : cell/document sinks (XLSX, in-memory grid, CSV)
//! - `render`   : batch rendering
//! - `stream`   : ordered streaming writer
//! - `config`   : YAML report documents
//! - `workbook` : public report workbook API
pub mod column;
pub mod conf;
pub mod config;
pub mod document;
pub mod error;
pub mod layout;
pub mod record;
pub mod render;
pub mod spec;
pub mod stream;
pub mod style;
pub mod util;
pub mod workbook;

pub use conf::{
    C_COMPARE_DIFF_MARKER, C_COMPARE_ERROR_MARKER, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    N_ROWS_STREAM_FLUSH, derive_default_style_set,
};
pub use document::{
    CellSink, DocumentSink, EnumSheetMode, GridDocument, SpecGridCell, SpecGridSheet, XlsxDocument,
};
pub use error::{ReportError, Result};
pub use layout::{LayoutCursor, PlacementTable, SpecSectionPlacement};
pub use record::{EnumRecordShape, RecordAccessor, SpecRecordRow, TypedRecord};
pub use render::{DictFormatters, render_workbook};
pub use spec::{
    EnumCellContent, EnumCellValue, EnumSectionDirection, EnumSectionKind, SpecAlignStyle,
    SpecCellStyle, SpecColumn, SpecCompareRef, SpecFillStyle, SpecFontStyle, SpecFormatter,
    SpecRecordBatch, SpecRenderReport, SpecRowHeights, SpecSection, SpecSheet, SpecSheetReport,
    SpecStyleSet,
};
pub use stream::{EnumStreamState, RowBuffer, SectionStreamer, XlsxStreamer};
pub use workbook::ReportWorkbook;
