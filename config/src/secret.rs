use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// A configuration value that must never show up in logs.
///
/// Deserializes from a plain string and redacts itself in [`fmt::Debug`] output.
#[derive(Clone)]
pub struct SecretValue(Secret<String>);

impl SecretValue {
    /// Returns the wrapped value. Callers must not log it.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self(Secret::new(value))
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self(Secret::new(value.to_string()))
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretValue::from)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let secret = SecretValue::from("hunter2");
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter2");
    }
}
