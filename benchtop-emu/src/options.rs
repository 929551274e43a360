//! Free-form construction options
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from parsing `key=value` option strings
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// The string has no `=` separator
    #[error("expected key=value, got {0:?}")]
    MissingEquals(String),
    /// The key is empty
    #[error("option key is empty in {0:?}")]
    EmptyKey(String),
}

/// Read-only key/value options supplied when an emulator is built
///
/// Values are JSON scalars.  Accessors take a default, which is returned
/// when the key is missing or holds a value of the wrong type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options(BTreeMap<String, Value>);

impl Options {
    /// Builds an empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option, returning the updated set
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts an option, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks up a raw value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Reads a number
    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    /// Reads a non-negative integer
    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    /// Reads a boolean
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Reads a string
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    /// Returns the number of options
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether no options are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over options in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parses a `key=value` pair
    ///
    /// The value is read as a JSON literal when possible (`1.5`, `true`,
    /// `"quoted"`), and is otherwise kept as a plain string.
    pub fn parse_pair(s: &str) -> Result<(String, Value), OptionError> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| OptionError::MissingEquals(s.to_owned()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(OptionError::EmptyKey(s.to_owned()));
        }
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.to_owned()));
        Ok((key.to_owned(), value))
    }
}

impl FromIterator<(String, Value)> for Options {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<serde_json::Map<String, Value>> for Options {
    fn from(m: serde_json::Map<String, Value>) -> Self {
        m.into_iter().collect()
    }
}
