//! Shared data model of the pipeline
//!
//! Host, service and section identifiers are validated newtypes because
//! they end up as file and directory names in the cache and crash stores.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Errors raised when constructing a validated identifier
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid host name: {0:?}")]
    InvalidHostName(String),
    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),
    #[error("invalid section name: {0:?}")]
    InvalidSectionName(String),
}

/// Name of a monitored host, also the key of every cache and crash bundle
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostName(String);

impl HostName {
    pub fn new<S: Into<String>>(name: S) -> Result<Self, ModelError> {
        let name = name.into();
        // must be safe as a single path component
        let ok = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0'])
            && !name.contains(char::is_whitespace);
        if ok {
            Ok(Self(name))
        } else {
            Err(ModelError::InvalidHostName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HostName {
    type Error = ModelError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HostName> for String {
    fn from(value: HostName) -> Self {
        value.0
    }
}

impl AsRef<str> for HostName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one service on one host (ex: "CPU load")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new<S: Into<String>>(name: S) -> Result<Self, ModelError> {
        let name = name.into();
        if name.trim().is_empty() || name.contains('\0') {
            Err(ModelError::InvalidServiceName(name))
        } else {
            Ok(Self(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceName {
    type Error = ModelError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(value: ServiceName) -> Self {
        value.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one independently decodable unit of raw telemetry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SectionName(String);

impl SectionName {
    pub fn new<S: Into<String>>(name: S) -> Result<Self, ModelError> {
        let name = name.into();
        let ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if ok {
            Ok(Self(name))
        } else {
            Err(ModelError::InvalidSectionName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SectionName {
    type Error = ModelError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SectionName> for String {
    fn from(value: SectionName) -> Self {
        value.0
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache area a raw payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Output read from the host's agent over TCP
    AgentTcp,
    /// Output another host forwarded on behalf of this one
    Piggyback,
    /// Bulk dump of SNMP OID values
    SnmpWalk,
}

/// A host label discovered while decoding a section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLabel {
    pub name: String,
    pub value: String,
}

impl HostLabel {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Monitoring state of one service check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Crit,
    Unknown,
}

impl CheckStatus {
    /// Numeric state as reported to the monitoring core
    pub fn code(self) -> u8 {
        match self {
            CheckStatus::Ok => 0,
            CheckStatus::Warn => 1,
            CheckStatus::Crit => 2,
            CheckStatus::Unknown => 3,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Crit => "CRIT",
            CheckStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Result of one service check on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub output: String,
}

impl CheckResult {
    pub fn new<S: Into<String>>(status: CheckStatus, output: S) -> Self {
        Self { status, output: output.into() }
    }
}

/// Body of one section: rows of fields, split per the section's separator
pub type StringTable = Vec<Vec<String>>;

/// Content of one parsed section
#[derive(Debug, Clone)]
pub enum Section {
    /// A registered plugin decoded the section body
    Decoded {
        table: StringTable,
        value: serde_json::Value,
    },
    /// No plugin is registered for this name; raw body kept as-is
    Opaque(Vec<u8>),
}

/// Parsed, decoded view of one host's telemetry for one run
///
/// Built fresh per run and never mutated afterwards, only replaced.
/// Sections whose decoder failed are listed in `failures` with the
/// crash-report text produced for them.
#[derive(Debug, Default)]
pub struct HostSections {
    pub sections: BTreeMap<SectionName, Section>,
    pub labels: Vec<HostLabel>,
    pub failures: BTreeMap<SectionName, String>,
}

impl HostSections {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.labels.is_empty() && self.failures.is_empty()
    }

    /// Decoded value of a section, if present and successfully decoded
    pub fn decoded(&self, name: &SectionName) -> Option<&serde_json::Value> {
        match self.sections.get(name) {
            Some(Section::Decoded { value, .. }) => Some(value),
            _ => None,
        }
    }
}
