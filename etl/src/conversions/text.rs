use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::str::FromStr;
use tokio_postgres::types::Type;
use uuid::Uuid;

use crate::bail;
use crate::conversions::{
    Cell, DATE_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT, TIMESTAMPTZ_FORMAT_HH_MM,
    TIMESTAMPTZ_FORMAT_HHMM,
};
use crate::error::{ErrorKind, EtlResult};

/// Converts values printed by Postgres in text format into typed [`Cell`]s.
///
/// Types without a dedicated [`Cell`] variant (arrays, ranges, enums, geometric types, ...) are
/// kept as their text representation, so a table with an exotic column still replicates.
pub struct TextFormatConverter;

impl TextFormatConverter {
    pub fn try_from_str(typ: &Type, str: &str) -> EtlResult<Cell> {
        match *typ {
            Type::BOOL => Ok(Cell::Bool(parse_bool(str)?)),
            Type::CHAR | Type::BPCHAR | Type::VARCHAR | Type::NAME | Type::TEXT => {
                Ok(Cell::String(str.to_string()))
            }
            Type::INT2 => Ok(Cell::I16(str.parse()?)),
            Type::INT4 => Ok(Cell::I32(str.parse()?)),
            Type::INT8 => Ok(Cell::I64(str.parse()?)),
            Type::OID => Ok(Cell::U32(str.parse()?)),
            // Rust float parsing accepts `NaN`, `Infinity` and `-Infinity` as printed by Postgres.
            Type::FLOAT4 => Ok(Cell::F32(str.parse()?)),
            Type::FLOAT8 => Ok(Cell::F64(str.parse()?)),
            Type::NUMERIC => match str {
                "NaN" | "Infinity" | "-Infinity" => Ok(Cell::String(str.to_string())),
                _ => Ok(Cell::Numeric(BigDecimal::from_str(str)?)),
            },
            Type::BYTEA => Ok(Cell::Bytes(from_bytea_hex(str)?)),
            Type::DATE if is_infinity(str) => Ok(Cell::String(str.to_string())),
            Type::DATE => Ok(Cell::Date(NaiveDate::parse_from_str(str, DATE_FORMAT)?)),
            Type::TIME => Ok(Cell::Time(NaiveTime::parse_from_str(str, TIME_FORMAT)?)),
            Type::TIMESTAMP if is_infinity(str) => Ok(Cell::String(str.to_string())),
            Type::TIMESTAMP => Ok(Cell::TimeStamp(NaiveDateTime::parse_from_str(
                str,
                TIMESTAMP_FORMAT,
            )?)),
            Type::TIMESTAMPTZ if is_infinity(str) => Ok(Cell::String(str.to_string())),
            Type::TIMESTAMPTZ => {
                let val = match DateTime::<FixedOffset>::parse_from_str(str, TIMESTAMPTZ_FORMAT_HHMM)
                {
                    Ok(val) => val,
                    Err(_) => DateTime::<FixedOffset>::parse_from_str(str, TIMESTAMPTZ_FORMAT_HH_MM)?,
                };
                Ok(Cell::TimeStampTz(val.into()))
            }
            Type::UUID => Ok(Cell::Uuid(Uuid::parse_str(str)?)),
            Type::JSON | Type::JSONB => Ok(Cell::Json(serde_json::from_str(str)?)),
            _ => Ok(Cell::String(str.to_string())),
        }
    }
}

fn is_infinity(str: &str) -> bool {
    str == "infinity" || str == "-infinity"
}

/// Parses a boolean printed as `t` or `f`.
fn parse_bool(str: &str) -> EtlResult<bool> {
    match str {
        "t" => Ok(true),
        "f" => Ok(false),
        _ => bail!(
            ErrorKind::InvalidData,
            "Invalid boolean value",
            format!("Boolean value must be 't' or 'f' (received: {str})")
        ),
    }
}

/// Decodes the `\x`-prefixed hex output format of `bytea`.
fn from_bytea_hex(str: &str) -> EtlResult<Vec<u8>> {
    let Some(digits) = str.strip_prefix("\\x") else {
        bail!(
            ErrorKind::ConversionError,
            "Could not decode bytea value",
            "The prefix '\\x' is missing"
        );
    };

    if digits.len() % 2 != 0 {
        bail!(
            ErrorKind::ConversionError,
            "Could not decode bytea value",
            "The number of digits is odd"
        );
    }

    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for pair in digits.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(pair)?;
        bytes.push(u8::from_str_radix(pair, 16)?);
    }

    Ok(bytes)
}
