//! Namespaced `"namespace:path"` identifiers.
//!
//! Every item, tag, recipe and recipe type in a project is named by a
//! resource location. Parsing never panics: malformed input yields a
//! [`ResourceLocationError`] the caller turns into an issue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Namespace implied when a location is written without one.
pub const DEFAULT_NAMESPACE: &str = "minecraft";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceLocationError {
    #[error("resource location is empty")]
    Empty,
    #[error("invalid namespace '{0}': expected [a-z0-9_.-]")]
    InvalidNamespace(String),
    #[error("invalid path '{0}': expected [a-z0-9_.-/]")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceLocation {
    namespace: String,
    path: String,
}

impl ResourceLocation {
    /// Builds a location from already separated parts, validating both.
    pub fn new(
        namespace: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self, ResourceLocationError> {
        let namespace = namespace.into();
        let path = path.into();
        if namespace.is_empty() || !namespace.chars().all(is_valid_namespace_char) {
            return Err(ResourceLocationError::InvalidNamespace(namespace));
        }
        if path.is_empty() || !path.chars().all(is_valid_path_char) {
            return Err(ResourceLocationError::InvalidPath(path));
        }
        Ok(Self { namespace, path })
    }

    /// Parses `"ns:path"`, or `"path"` in the default namespace.
    pub fn parse(input: &str) -> Result<Self, ResourceLocationError> {
        if input.is_empty() {
            return Err(ResourceLocationError::Empty);
        }
        match input.split_once(':') {
            Some(("", path)) => Self::new(DEFAULT_NAMESPACE, path),
            Some((namespace, path)) => Self::new(namespace, path),
            None => Self::new(DEFAULT_NAMESPACE, input),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_default_namespace(&self) -> bool {
        self.namespace == DEFAULT_NAMESPACE
    }
}

pub fn is_valid_namespace_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '-')
}

pub fn is_valid_path_char(c: char) -> bool {
    is_valid_namespace_char(c) || c == '/'
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl FromStr for ResourceLocation {
    type Err = ResourceLocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ResourceLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceLocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
