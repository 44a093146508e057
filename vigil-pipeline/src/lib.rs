//! Vigil telemetry pipeline
//!
//! Turns raw machine-health telemetry (agent byte streams, SNMP walk
//! dumps) into structured per-host sections and service check results,
//! with a crash-snapshot subsystem that makes failures diagnosable
//! without the original host state.
//!
//! The typical sequence for one host is
//! fetch ([`fetch::Fetcher`]) → cache ([`cache::CacheStore`]) →
//! parse ([`parse::AgentParser`]) → summarize ([`summarize::summarize`]).
//! The crash snapshotter ([`crash::CrashSnapshotter`]) observes the parse
//! and check stages: whatever raises there degrades into a
//! support-addressable crash report instead of terminating the run.

pub mod cache;
pub mod config;
pub mod crash;
pub mod fetch;
pub mod models;
pub mod parse;
pub mod piggyback;
pub mod plugins;
pub mod summarize;

pub use cache::CacheStore;
pub use config::{load_config, PipelineConfig, SnmpBackendKind};
pub use crash::{CrashIdent, CrashReport, CrashSnapshotter, CrashStore, DirCrashStore};
pub use fetch::{AgentTcpTransport, Fetcher, SnmpBackend, StoredWalkBackend};
pub use models::{
    CheckResult, CheckStatus, HostLabel, HostName, HostSections, Section, SectionName,
    ServiceName, SourceKind, StringTable,
};
pub use parse::{AgentParser, ParsedSectionsCache};
pub use plugins::{CheckPlugin, SectionPlugin, SectionRegistry};
pub use summarize::{summarize, ServiceFlags};
