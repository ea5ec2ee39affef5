//! Stateless helper utilities shared by the planner and document sinks.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
};
use crate::error::{ReportError, Result};

static RE_CELL_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]+)$").expect("static cell reference pattern")
});

////////////////////////////////////////////////////////////////////////////////
// #region CellReferences

/// Zero-based column index to Excel letters (`0 -> A`, `27 -> AB`).
pub fn derive_column_letters(col_idx: usize) -> String {
    let mut l_chars = Vec::new();
    let mut n_rest = col_idx + 1;
    while n_rest > 0 {
        let n_rem = (n_rest - 1) % 26;
        l_chars.push((b'A' + n_rem as u8) as char);
        n_rest = (n_rest - 1) / 26;
    }
    l_chars.iter().rev().collect()
}

/// Zero-based `(row, col)` to an A1 reference.
pub fn derive_cell_ref(row_idx: usize, col_idx: usize) -> String {
    format!("{}{}", derive_column_letters(col_idx), row_idx + 1)
}

/// Parse an A1 reference (`B3`, `$C$10`) into zero-based `(row, col)`.
pub fn parse_cell_ref(cell_ref: &str) -> Result<(usize, usize)> {
    let c_ref = cell_ref.trim();
    let Some(caps) = RE_CELL_REF.captures(c_ref) else {
        return Err(ReportError::Layout(format!(
            "Cannot parse position {cell_ref:?} as a cell reference."
        )));
    };

    let n_col_1based = caps[1]
        .to_ascii_uppercase()
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
    let n_row_1based = caps[2]
        .parse::<usize>()
        .map_err(|err| ReportError::Layout(format!("Invalid row in {cell_ref:?}: {err}")))?;

    if n_row_1based == 0 || n_row_1based > N_NROWS_EXCEL_MAX {
        return Err(ReportError::Layout(format!(
            "Row of position {cell_ref:?} is outside the worksheet."
        )));
    }
    if n_col_1based > N_NCOLS_EXCEL_MAX {
        return Err(ReportError::Layout(format!(
            "Column of position {cell_ref:?} is outside the worksheet."
        )));
    }
    Ok((n_row_1based - 1, n_col_1based - 1))
}

/// Cast a row index to the worksheet row type.
pub fn cast_row_num(value: usize) -> Result<u32> {
    if value >= N_NROWS_EXCEL_MAX {
        return Err(ReportError::Layout(format!("row index overflow: {value}")));
    }
    u32::try_from(value).map_err(|_| ReportError::Layout(format!("row index overflow: {value}")))
}

/// Cast a column index to the worksheet column type.
pub fn cast_col_num(value: usize) -> Result<u16> {
    if value >= N_NCOLS_EXCEL_MAX {
        return Err(ReportError::Layout(format!(
            "column index overflow: {value}"
        )));
    }
    u16::try_from(value)
        .map_err(|_| ReportError::Layout(format!("column index overflow: {value}")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Return `name`, or `name__N` when it is already taken, and record it.
pub fn derive_unique_sheet_name(
    name: &str,
    set_sheet_names_existing: &mut BTreeSet<String>,
) -> String {
    if !set_sheet_names_existing.contains(name) {
        set_sheet_names_existing.insert(name.to_string());
        return name.to_string();
    }

    let base_name: String = name
        .chars()
        .take(usize::max(1, N_LEN_EXCEL_SHEET_NAME_MAX - 3))
        .collect();

    let mut n_idx = 2usize;
    loop {
        let candidate: String = format!("{base_name}__{n_idx}")
            .chars()
            .take(N_LEN_EXCEL_SHEET_NAME_MAX)
            .collect();
        if !set_sheet_names_existing.contains(&candidate) {
            set_sheet_names_existing.insert(candidate.clone());
            return candidate;
        }
        n_idx += 1;
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
