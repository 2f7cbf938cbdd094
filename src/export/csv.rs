//! CSV rendering of the tabular projection.

use crate::output::{TableRow, TABLE_COLUMNS};

/// Quote a field when it contains a comma, quote or line break.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Header plus one line per row, `\n`-terminated.
pub fn to_csv(rows: &[TableRow]) -> String {
    let mut out = String::new();
    out.push_str(&TABLE_COLUMNS.join(","));
    out.push('\n');

    for row in rows {
        let fields = [
            row.annotation_id.to_string(),
            csv_escape(&row.image),
            row.page.to_string(),
            csv_escape(&row.content),
            csv_escape(&row.author),
            csv_escape(&row.coordinates),
            csv_escape(&row.nature),
            csv_escape(&row.defect_type),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}
