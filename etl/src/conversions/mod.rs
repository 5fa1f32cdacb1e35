use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt::Write;
use uuid::Uuid;

pub mod table_row;
pub mod text;

/// Date format used by Postgres text output and by the files we write.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Postgres prints offsets as `+HH` or `+HHMM`, `%#z` accepts both.
pub const TIMESTAMPTZ_FORMAT_HHMM: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

pub const TIMESTAMPTZ_FORMAT_HH_MM: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// A single decoded value of an extracted row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I16(i16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Numeric(BigDecimal),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeStamp(NaiveDateTime),
    TimeStampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Renders the cell the way it is written into delimited text files.
    ///
    /// Nulls become an empty field, bytes are rendered as lowercase hex without a prefix and
    /// timestamps with time zone are normalized to UTC.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(b) => b.to_string(),
            Cell::String(s) => s.clone(),
            Cell::I16(i) => i.to_string(),
            Cell::I32(i) => i.to_string(),
            Cell::U32(i) => i.to_string(),
            Cell::I64(i) => i.to_string(),
            Cell::F32(f) => f.to_string(),
            Cell::F64(f) => f.to_string(),
            Cell::Numeric(n) => n.to_string(),
            Cell::Date(d) => d.format(DATE_FORMAT).to_string(),
            Cell::Time(t) => t.format(TIME_FORMAT).to_string(),
            Cell::TimeStamp(t) => t.format(TIMESTAMP_FORMAT).to_string(),
            Cell::TimeStampTz(t) => t.format(TIMESTAMPTZ_FORMAT_HH_MM).to_string(),
            Cell::Uuid(u) => u.to_string(),
            Cell::Json(j) => j.to_string(),
            Cell::Bytes(b) => b.iter().fold(String::with_capacity(b.len() * 2), |mut s, byte| {
                let _ = write!(s, "{byte:02x}");
                s
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn renders_cells_as_text() {
        assert_eq!(Cell::Null.to_text(), "");
        assert_eq!(Cell::Bool(true).to_text(), "true");
        assert_eq!(Cell::I32(-7).to_text(), "-7");
        assert_eq!(
            Cell::Numeric(BigDecimal::from_str("12.50").unwrap()).to_text(),
            "12.50"
        );
        assert_eq!(Cell::Bytes(vec![0x0a, 0xff]).to_text(), "0aff");
        assert_eq!(
            Cell::Json(serde_json::json!({"a": 1})).to_text(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn renders_temporal_cells() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let time = NaiveTime::from_hms_micro_opt(8, 5, 1, 250_000).unwrap();
        let timestamp = NaiveDateTime::new(date, time);

        assert_eq!(Cell::Date(date).to_text(), "2024-03-09");
        assert_eq!(Cell::Time(time).to_text(), "08:05:01.250");
        assert_eq!(
            Cell::TimeStamp(timestamp).to_text(),
            "2024-03-09 08:05:01.250"
        );
        assert_eq!(
            Cell::TimeStampTz(timestamp.and_utc()).to_text(),
            "2024-03-09 08:05:01.250+00:00"
        );
    }
}
