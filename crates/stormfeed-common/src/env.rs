//! Typed environment variable lookups
//!
//! Missing variables fall back to the supplied default. Variables that are
//! present but cannot be parsed are reported as [`Error::InvalidValue`] instead
//! of being silently replaced, so a typo in a deployment surfaces at startup.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Read a string variable, falling back to `default` when unset or empty
pub fn string_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Read and parse a variable, falling back to `default` when unset or empty
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse::<T>().map_err(|e| Error::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })
        },
        _ => Ok(default),
    }
}

/// Read a comma-separated list, falling back to `default` when unset or empty
///
/// Blank entries are dropped and surrounding whitespace is trimmed.
pub fn list_or(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}
