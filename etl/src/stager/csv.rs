use csv::{QuoteStyle, WriterBuilder};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{ColumnSchema, TableRow};

/// Field delimiter of staged CSV files. The warehouse file format is declared with the same one.
pub const CSV_DELIMITER: u8 = b'|';

/// Encodes rows as `|` delimited text with a header row of column names.
///
/// Nulls are written as empty unquoted fields.
pub fn encode_csv(rows: &[TableRow], columns: &[ColumnSchema]) -> EtlResult<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new());

    writer.write_record(columns.iter().map(|column| column.name.as_str()))?;

    for row in rows {
        if row.values.len() != columns.len() {
            return Err(etl_error!(
                ErrorKind::InvalidData,
                "Row does not match the output columns",
                format!("expected {} values, got {}", columns.len(), row.values.len())
            ));
        }

        writer.write_record(row.values.iter().map(|cell| cell.to_text()))?;
    }

    writer.into_inner().map_err(|err| {
        etl_error!(
            ErrorKind::SerializationError,
            "CSV encoding failed",
            err.error()
        )
    })
}
