use sqlx::{Column as _, Row, Statement, TypeInfo as _};

use super::query_result::{Column, ColumnKind};

/// Decode a cell by trying each Rust type in order until one is compatible
/// with the column's wire type.
macro_rules! try_decode {
    ($row:expr, $idx:expr, $($ty:ty => $map:expr),+ $(,)?) => {{
        let mut decoded: Option<$crate::database::Value> = None;
        $(
            if decoded.is_none() {
                if let Ok(value) = $row.try_get::<$ty, _>($idx) {
                    decoded = Some($map(value));
                }
            }
        )+
        decoded
    }};
}

pub(crate) use try_decode;

/// Column names and declared kinds of a driver row.
pub(crate) fn describe_columns<R: Row>(row: &R) -> Vec<Column> {
    row.columns()
        .iter()
        .map(|column| Column {
            name: column.name().to_string(),
            kind: ColumnKind::from_type_name(column.type_info().name()),
        })
        .collect()
}

/// Column names and declared kinds of a prepared statement, used when a read
/// returns no rows to take them from.
pub(crate) fn statement_columns<'q, S: Statement<'q>>(statement: &S) -> Vec<Column> {
    statement
        .columns()
        .iter()
        .map(|column| Column {
            name: column.name().to_string(),
            kind: ColumnKind::from_type_name(column.type_info().name()),
        })
        .collect()
}
