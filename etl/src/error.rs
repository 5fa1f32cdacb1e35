use std::error;
use std::fmt;

/// Result type of every fallible replication operation.
pub type EtlResult<T> = Result<T, EtlError>;

/// Error raised by the replication engine and its collaborators.
///
/// An [`EtlError`] is either a single failure, classified by an [`ErrorKind`] and described by a
/// static message plus optional dynamic detail, or an aggregation of several failures, which is
/// how a run reports the failed tables of a [`crate::types::ReplicationReport`].
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<EtlError>),
}

/// Categories of failures, grouped by the stage of a table pipeline that produces them.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source database
    SourceConnectionFailed,
    SourceQueryFailed,
    SourceSchemaError,
    SourceIoError,
    SourceOperationCanceled,

    // Object storage and direct stage transfers
    TransferFailed,

    // Warehouse
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationObjectNotFound,
    LoadErrorThresholdExceeded,

    // Data & transformation
    ConversionError,
    InvalidData,
    ValidationError,

    // Configuration
    ConfigError,

    // IO & serialization
    IoError,
    SerializationError,
    DeserializationError,

    // Security
    AuthenticationError,
    PermissionDenied,

    // Workflow
    InvalidState,
    PipelinePanic,
    PipelineCancelled,

    Unknown,
}

impl EtlError {
    /// Creates an [`EtlError`] aggregating several errors.
    pub fn many(errors: Vec<EtlError>) -> EtlError {
        EtlError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors this is the kind of the first error, or [`ErrorKind::Unknown`] when
    /// there is none.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregations.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the dynamic detail, or the first one found in an aggregation.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => write!(f, "Multiple errors occurred (empty)"),
                [error] => error.fmt(f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl error::Error for EtlError {}

impl From<(ErrorKind, &'static str)> for EtlError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for EtlError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    fn from(errors: Vec<E>) -> EtlError {
        EtlError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

fn detailed(kind: ErrorKind, desc: &'static str, detail: impl fmt::Display) -> EtlError {
    EtlError::from((kind, desc, detail.to_string()))
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> EtlError {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoError,
        };

        detailed(kind, "I/O error occurred", err)
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        detailed(kind, description, err)
    }
}

impl From<std::str::Utf8Error> for EtlError {
    fn from(err: std::str::Utf8Error) -> EtlError {
        detailed(ErrorKind::ConversionError, "UTF-8 conversion failed", err)
    }
}

impl From<std::num::ParseIntError> for EtlError {
    fn from(err: std::num::ParseIntError) -> EtlError {
        detailed(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<std::num::ParseFloatError> for EtlError {
    fn from(err: std::num::ParseFloatError) -> EtlError {
        detailed(ErrorKind::ConversionError, "Float parsing failed", err)
    }
}

impl From<chrono::ParseError> for EtlError {
    fn from(err: chrono::ParseError) -> EtlError {
        detailed(ErrorKind::ConversionError, "Date/time parsing failed", err)
    }
}

impl From<uuid::Error> for EtlError {
    fn from(err: uuid::Error) -> EtlError {
        detailed(ErrorKind::ConversionError, "UUID parsing failed", err)
    }
}

impl From<bigdecimal::ParseBigDecimalError> for EtlError {
    fn from(err: bigdecimal::ParseBigDecimalError) -> EtlError {
        detailed(ErrorKind::ConversionError, "Numeric parsing failed", err)
    }
}

/// Classifies Postgres failures by SQLSTATE so a failed table reports why the source refused it.
impl From<tokio_postgres::Error> for EtlError {
    fn from(err: tokio_postgres::Error) -> EtlError {
        use tokio_postgres::error::SqlState;

        let Some(sqlstate) = err.code() else {
            let (kind, description) = if err.is_closed() {
                (
                    ErrorKind::SourceConnectionFailed,
                    "PostgreSQL connection closed",
                )
            } else {
                (ErrorKind::SourceQueryFailed, "PostgreSQL client error")
            };

            return detailed(kind, description, err);
        };

        let (kind, description) = match *sqlstate {
            SqlState::CONNECTION_EXCEPTION
            | SqlState::CONNECTION_DOES_NOT_EXIST
            | SqlState::CONNECTION_FAILURE
            | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
            | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
            | SqlState::TOO_MANY_CONNECTIONS
            | SqlState::CANNOT_CONNECT_NOW
            | SqlState::ADMIN_SHUTDOWN
            | SqlState::CRASH_SHUTDOWN => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection error",
            ),

            SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                ErrorKind::AuthenticationError,
                "PostgreSQL authentication failed",
            ),

            SqlState::INSUFFICIENT_PRIVILEGE => (
                ErrorKind::PermissionDenied,
                "PostgreSQL permission denied",
            ),

            SqlState::UNDEFINED_TABLE
            | SqlState::UNDEFINED_COLUMN
            | SqlState::UNDEFINED_SCHEMA
            | SqlState::UNDEFINED_FUNCTION
            | SqlState::AMBIGUOUS_COLUMN => (
                ErrorKind::SourceSchemaError,
                "PostgreSQL schema object not found",
            ),

            SqlState::SYNTAX_ERROR | SqlState::SYNTAX_ERROR_OR_ACCESS_RULE_VIOLATION => (
                ErrorKind::SourceQueryFailed,
                "PostgreSQL syntax error in extraction query",
            ),

            SqlState::DATA_EXCEPTION
            | SqlState::INVALID_TEXT_REPRESENTATION
            | SqlState::INVALID_DATETIME_FORMAT
            | SqlState::NUMERIC_VALUE_OUT_OF_RANGE
            | SqlState::DIVISION_BY_ZERO => (
                ErrorKind::ConversionError,
                "PostgreSQL data conversion error",
            ),

            SqlState::QUERY_CANCELED | SqlState::OPERATOR_INTERVENTION => (
                ErrorKind::SourceOperationCanceled,
                "PostgreSQL query canceled",
            ),

            SqlState::IO_ERROR | SqlState::DISK_FULL | SqlState::DATA_CORRUPTED => {
                (ErrorKind::SourceIoError, "PostgreSQL I/O error")
            }

            _ => (ErrorKind::SourceQueryFailed, "PostgreSQL query failed"),
        };

        detailed(kind, description, err)
    }
}

impl From<deadpool_postgres::PoolError> for EtlError {
    fn from(err: deadpool_postgres::PoolError) -> EtlError {
        match err {
            deadpool_postgres::PoolError::Backend(err) => err.into(),
            err => detailed(
                ErrorKind::SourceConnectionFailed,
                "Failed to get a connection from the source pool",
                err,
            ),
        }
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> EtlError {
        let (kind, description) = if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "Warehouse response could not be decoded",
            )
        } else if err.is_connect() || err.is_timeout() {
            (
                ErrorKind::DestinationConnectionFailed,
                "Warehouse connection failed",
            )
        } else {
            (
                ErrorKind::DestinationQueryFailed,
                "Warehouse request failed",
            )
        };

        detailed(kind, description, err)
    }
}

impl From<csv::Error> for EtlError {
    fn from(err: csv::Error) -> EtlError {
        detailed(ErrorKind::SerializationError, "CSV encoding failed", err)
    }
}

impl From<arrow::error::ArrowError> for EtlError {
    fn from(err: arrow::error::ArrowError) -> EtlError {
        detailed(
            ErrorKind::SerializationError,
            "Arrow batch construction failed",
            err,
        )
    }
}

impl From<parquet::errors::ParquetError> for EtlError {
    fn from(err: parquet::errors::ParquetError) -> EtlError {
        detailed(ErrorKind::SerializationError, "Parquet encoding failed", err)
    }
}
