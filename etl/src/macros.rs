//! Shorthands for building and returning [`crate::error::EtlError`]s.

/// Creates an [`crate::error::EtlError`] from a kind, a static description and an optional
/// detail. The detail can be anything implementing [`std::fmt::Display`].
#[macro_export]
macro_rules! etl_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::EtlError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::EtlError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with an [`crate::error::EtlError`] built like [`etl_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::etl_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::etl_error!($kind, $desc, $detail))
    };
}
