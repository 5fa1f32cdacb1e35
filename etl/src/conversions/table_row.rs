use core::str;
use tracing::debug;

use crate::bail;
use crate::conversions::Cell;
use crate::conversions::text::TextFormatConverter;
use crate::error::{ErrorKind, EtlResult};
use crate::types::ColumnSchema;

/// One extracted row, with one [`Cell`] per column of the extraction query.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }
}

pub struct TableRowConverter;

impl TableRowConverter {
    /// Decodes one line of `COPY ... TO STDOUT` text output.
    ///
    /// Columns are tab separated, the line ends with `\n`, `\N` marks a null and backslash escapes
    /// follow the rules of the Postgres text copy format.
    pub fn try_from(row: &[u8], column_schemas: &[ColumnSchema]) -> EtlResult<TableRow> {
        let row_str = str::from_utf8(row)?;
        let Some(row_str) = row_str.strip_suffix('\n') else {
            bail!(ErrorKind::ConversionError, "The row is not terminated");
        };

        let mut values = Vec::with_capacity(column_schemas.len());
        let mut column_schemas_iter = column_schemas.iter();

        for raw in row_str.split('\t') {
            let Some(column_schema) = column_schemas_iter.next() else {
                bail!(
                    ErrorKind::ConversionError,
                    "The number of columns in the schema and row is mismatched",
                    format!("expected {} columns", column_schemas.len())
                );
            };

            let value = if raw == "\\N" {
                Cell::Null
            } else {
                let text = unescape(raw);
                match TextFormatConverter::try_from_str(&column_schema.typ, &text) {
                    Ok(value) => value,
                    Err(err) => {
                        debug!(
                            column = %column_schema.name,
                            column_type = %column_schema.typ,
                            "could not decode column value"
                        );
                        return Err(err);
                    }
                }
            };

            values.push(value);
        }

        if values.len() != column_schemas.len() {
            bail!(
                ErrorKind::ConversionError,
                "The number of columns in the schema and row is mismatched",
                format!(
                    "expected {} columns, got {}",
                    column_schemas.len(),
                    values.len()
                )
            );
        }

        Ok(TableRow { values })
    }
}

fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{b}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_postgres::types::Type;

    fn schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id", Type::INT4),
            ColumnSchema::new("note", Type::TEXT),
            ColumnSchema::new("paid", Type::BOOL),
        ]
    }

    #[test]
    fn decodes_copy_row() {
        let row = TableRowConverter::try_from(b"1\tline\\none\\ttab\tt\n", &schema()).unwrap();
        assert_eq!(
            row.values,
            vec![
                Cell::I32(1),
                Cell::String("line\none\ttab".to_string()),
                Cell::Bool(true)
            ]
        );
    }

    #[test]
    fn decodes_nulls_and_literal_backslash() {
        let row = TableRowConverter::try_from(b"2\t\\\\N\t\\N\n", &schema()).unwrap();
        assert_eq!(
            row.values,
            vec![Cell::I32(2), Cell::String("\\N".to_string()), Cell::Null]
        );
    }

    #[test]
    fn rejects_unterminated_row() {
        let err = TableRowConverter::try_from(b"1\tx\tt", &schema()).unwrap_err();
        assert!(err.to_string().contains("not terminated"));
    }

    #[test]
    fn rejects_column_count_mismatch() {
        let err = TableRowConverter::try_from(b"1\tx\n", &schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);

        let err = TableRowConverter::try_from(b"1\tx\tt\textra\n", &schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn propagates_value_errors() {
        let err = TableRowConverter::try_from(b"one\tx\tt\n", &schema()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }
}
