//! Plugin seams of the pipeline
//!
//! Check and section logic live outside this crate; the pipeline only
//! invokes them as opaque callables bound to an identity. The capability
//! set is closed: a section plugin decodes a string table (and may derive
//! host labels), a check plugin produces a check result from parsed
//! sections.

use crate::models::{CheckResult, HostLabel, HostSections, SectionName, StringTable};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type ParseFn = dyn Fn(&StringTable) -> anyhow::Result<Value> + Send + Sync;
pub type HostLabelFn = dyn Fn(&Value) -> anyhow::Result<Vec<HostLabel>> + Send + Sync;
pub type CheckFn = dyn Fn(&HostSections) -> anyhow::Result<CheckResult> + Send + Sync;

/// Decoder for one section name
pub struct SectionPlugin {
    pub name: SectionName,
    pub parse: Box<ParseFn>,
    /// Optional host-label derivation over the decoded value
    pub host_labels: Option<Box<HostLabelFn>>,
}

impl SectionPlugin {
    pub fn new<F>(name: SectionName, parse: F) -> Self
    where
        F: Fn(&StringTable) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self { name, parse: Box::new(parse), host_labels: None }
    }

    pub fn with_host_labels<F>(mut self, host_labels: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Vec<HostLabel>> + Send + Sync + 'static,
    {
        self.host_labels = Some(Box::new(host_labels));
        self
    }
}

/// Section decoders known to one pipeline run, keyed by section name
#[derive(Default)]
pub struct SectionRegistry {
    plugins: HashMap<SectionName, SectionPlugin>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: SectionPlugin) {
        self.plugins.insert(plugin.name.clone(), plugin);
    }

    pub fn get(&self, name: &SectionName) -> Option<&SectionPlugin> {
        self.plugins.get(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Check logic bound to a plugin identity
pub struct CheckPlugin {
    pub name: String,
    /// Sections this plugin consumes; all must be present to run it
    pub sections: Vec<SectionName>,
    /// Configured parameters, copied verbatim into crash reports
    pub parameters: Map<String, Value>,
    pub check: Box<CheckFn>,
}

impl CheckPlugin {
    pub fn new<N, F>(name: N, sections: Vec<SectionName>, check: F) -> Self
    where
        N: Into<String>,
        F: Fn(&HostSections) -> anyhow::Result<CheckResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            sections,
            parameters: Map::new(),
            check: Box::new(check),
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }
}
