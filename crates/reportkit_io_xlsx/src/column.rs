//! Column resolution: explicit configuration merged with discovered fields.

use std::collections::BTreeSet;

use tracing::debug;

use crate::conf::{N_ROWS_DISCOVERY_MAX, N_WIDTH_COLUMN_DEFAULT};
use crate::record::{EnumRecordShape, RecordAccessor};
use crate::spec::SpecColumn;

/// Return the final ordered column list for `columns_explicit` and `data`.
///
/// Explicit columns are kept verbatim and in declared order. Fields
/// discovered from `data` that are not already present are appended with the
/// field name as header and the default width.
pub fn resolve_columns<R: RecordAccessor>(
    columns_explicit: &[SpecColumn],
    data: &[R],
) -> Vec<SpecColumn> {
    let mut l_columns = columns_explicit.to_vec();
    let l_fields_discovered = discover_field_names(data);
    if l_fields_discovered.is_empty() {
        if !data.is_empty() {
            debug!(
                n_rows = data.len(),
                "no fields discoverable from bound data; keeping explicit columns"
            );
        }
        return l_columns;
    }

    let mut set_fields_present: BTreeSet<String> = columns_explicit
        .iter()
        .map(|col| col.field_name.clone())
        .collect();
    for c_field in l_fields_discovered {
        if set_fields_present.insert(c_field.clone()) {
            l_columns.push(SpecColumn {
                header: c_field.clone(),
                field_name: c_field,
                width: N_WIDTH_COLUMN_DEFAULT,
                ..Default::default()
            });
        }
    }
    l_columns
}

/// Discover ordered field names from bound records.
///
/// Typed records expose the first element's fields. Dynamic records are
/// unioned over at most [`N_ROWS_DISCOVERY_MAX`] rows in first-seen order.
pub fn discover_field_names<R: RecordAccessor>(data: &[R]) -> Vec<String> {
    let Some(record_first) = data.first() else {
        return vec![];
    };

    match record_first.shape() {
        EnumRecordShape::Typed => record_first.field_names(),
        EnumRecordShape::Dynamic => {
            let mut l_fields = Vec::new();
            let mut set_fields_seen = BTreeSet::new();
            for record in data.iter().take(N_ROWS_DISCOVERY_MAX) {
                for c_field in record.field_names() {
                    if set_fields_seen.insert(c_field.clone()) {
                        l_fields.push(c_field);
                    }
                }
            }
            l_fields
        }
    }
}
