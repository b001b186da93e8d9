//! Textual plugin descriptors.
//!
//! Components are selected by descriptors of the form
//! `name:key=value,key=value`, for example
//! `navier:mu=1.0,lambda=2.0,maxiter=100` or `fluid:min=0.1,max=2.0`.
//! A [`Descriptor`] only parses the text; each component family resolves the
//! name against its own closed registry and reads typed values from it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistrationError, Result};

/// A parsed `name:key=value,...` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    params: BTreeMap<String, String>,
}

impl Descriptor {
    /// Parse a descriptor string.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (name, rest) = match text.split_once(':') {
            Some((name, rest)) => (name.trim(), rest.trim()),
            None => (text, ""),
        };

        if name.is_empty() {
            return Err(RegistrationError::descriptor(format!(
                "missing component name in '{text}'"
            )));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(RegistrationError::descriptor(format!("invalid component name '{name}'")));
        }

        let mut params = BTreeMap::new();
        for item in rest.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                RegistrationError::descriptor(format!("expected key=value in '{item}' of '{name}'"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(RegistrationError::descriptor(format!(
                    "empty key in '{item}' of '{name}'"
                )));
            }
            if params.insert(key.to_string(), value.trim().to_string()).is_some() {
                return Err(RegistrationError::descriptor(format!(
                    "duplicate key '{key}' in '{name}'"
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw parameter value.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Typed parameter value, `None` when absent.
    pub fn get<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.params.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                RegistrationError::descriptor(format!(
                    "bad value '{raw}' for '{key}' of '{}'",
                    self.name
                ))
            }),
        }
    }

    /// Typed parameter value with a default.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Reject parameters outside `allowed`.
    pub fn ensure_known_keys(&self, allowed: &[&str]) -> Result<()> {
        match self.params.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(RegistrationError::descriptor(format!(
                "unknown parameter '{key}' for '{}', expected one of {allowed:?}",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

impl FromStr for Descriptor {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            write!(f, "{}{key}={value}", if i == 0 { ':' } else { ',' })?;
        }
        Ok(())
    }
}

/// Error for a name missing from a component registry.
pub(crate) fn unknown_name(family: &str, name: &str, known: &[&str]) -> RegistrationError {
    RegistrationError::descriptor(format!("unknown {family} '{name}', known: {known:?}"))
}
