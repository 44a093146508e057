//! Crash snapshot subsystem
//!
//! When a section decoder or a check plugin raises, the snapshotter
//! assembles a self-contained diagnostic bundle: the error chain, a
//! details map of caller-supplied context and best-effort copies of the
//! raw cached telemetry that produced the failure. The bundle is handed
//! to a [`CrashStore`] and the caller gets back a support-addressable
//! text with the crash identifier. Nothing on this path raises past the
//! caller unless the debug flag asks for it.

use crate::cache::CacheStore;
use crate::config::SnmpBackendKind;
use crate::models::{HostName, SectionName, ServiceName};
use crate::piggyback::source_hosts_for;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors of the crash persistence layer
#[derive(Debug, thiserror::Error)]
pub enum CrashStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Report variant; the set is fixed, the tag routes serialization only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashKind {
    Section,
    Check,
}

/// Self-contained diagnostic bundle for one failure
///
/// Attachments are raw bytes and are persisted next to the serialized
/// context rather than inside it.
#[derive(Debug, Clone, Serialize)]
pub struct CrashReport {
    #[serde(rename = "type")]
    pub kind: CrashKind,
    pub time: String,
    pub version: String,
    pub error: String,
    pub trace: Vec<String>,
    pub details: Map<String, Value>,
    #[serde(skip)]
    pub snmp_info: Option<Vec<u8>>,
    #[serde(skip)]
    pub agent_output: Option<Vec<u8>>,
}

/// Opaque identifier handed out by the crash store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashIdent(String);

impl CrashIdent {
    pub fn new<S: Into<String>>(ident: S) -> Self {
        Self(ident.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CrashIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable storage for crash reports; each saved report is independent
pub trait CrashStore: Send + Sync {
    fn save(&self, report: &CrashReport) -> Result<CrashIdent, CrashStoreError>;
}

/// Crash store writing one directory per report
///
/// Layout: `<root>/<ident>/crash.json` plus raw `snmp_info` and
/// `agent_output` files when the attachments are present.
#[derive(Debug, Clone)]
pub struct DirCrashStore {
    root: PathBuf,
}

impl DirCrashStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn report_dir(&self, ident: &CrashIdent) -> PathBuf {
        self.root.join(ident.as_str())
    }
}

impl CrashStore for DirCrashStore {
    fn save(&self, report: &CrashReport) -> Result<CrashIdent, CrashStoreError> {
        let ident = CrashIdent::new(Uuid::new_v4().simple().to_string());
        let dir = self.report_dir(&ident);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("crash.json"), serde_json::to_string_pretty(report)?)?;
        if let Some(snmp) = &report.snmp_info {
            fs::write(dir.join("snmp_info"), snmp)?;
        }
        if let Some(agent) = &report.agent_output {
            fs::write(dir.join("agent_output"), agent)?;
        }
        info!(ident = %ident, kind = ?report.kind, "persisted crash report");
        Ok(ident)
    }
}

/// What failed while handling one section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOperation {
    Parse,
    HostLabels,
}

impl fmt::Display for SectionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SectionOperation::Parse => "Parsing",
            SectionOperation::HostLabels => "Host label extraction",
        };
        f.write_str(s)
    }
}

/// Check-execution context embedded into a check crash report
#[derive(Debug, Clone)]
pub struct CheckCrashDetails {
    pub service: ServiceName,
    pub plugin_name: String,
    /// Included verbatim in the details map, never interpreted
    pub parameters: Map<String, Value>,
    pub is_cluster: bool,
    pub is_enforced: bool,
}

/// Assembles and persists crash reports for parse and check failures
#[derive(Clone)]
pub struct CrashSnapshotter {
    cache: CacheStore,
    store: Arc<dyn CrashStore>,
    debug: bool,
    snmp_backend: SnmpBackendKind,
}

impl CrashSnapshotter {
    pub fn new(
        cache: CacheStore,
        store: Arc<dyn CrashStore>,
        debug: bool,
        snmp_backend: SnmpBackendKind,
    ) -> Self {
        Self { cache, store, debug, snmp_backend }
    }

    /// Snapshot a failure raised while parsing a section or extracting
    /// host labels from it.
    ///
    /// Returns the user-visible failure text. The only `Err` case is
    /// debug mode with a failing crash path, where the *original*
    /// triggering error is handed back for in-place diagnosis.
    pub fn section_crash(
        &self,
        operation: SectionOperation,
        section_name: &SectionName,
        section_content: &[u8],
        host_name: &HostName,
        rtc_package: Option<&[u8]>,
        error: anyhow::Error,
    ) -> anyhow::Result<String> {
        let text = format!("{operation} of section {section_name} failed");
        let mut details = Map::new();
        details.insert("section_name".into(), json!(section_name.as_str()));
        details.insert(
            "section_content".into(),
            json!(String::from_utf8_lossy(section_content)),
        );
        details.insert("host_name".into(), json!(host_name.as_str()));

        let report = self.assemble(CrashKind::Section, details, host_name, rtc_package, &error);
        self.finish(text, report, error)
    }

    /// Snapshot a failure raised during check execution.
    pub fn check_crash(
        &self,
        host_name: &HostName,
        check: &CheckCrashDetails,
        rtc_package: Option<&[u8]>,
        error: anyhow::Error,
    ) -> anyhow::Result<String> {
        let text = "check failed".to_string();
        let mut details = Map::new();
        details.insert("check_output".into(), json!(text));
        details.insert("host".into(), json!(host_name.as_str()));
        details.insert("is_cluster".into(), json!(check.is_cluster));
        details.insert("description".into(), json!(check.service.as_str()));
        details.insert("check_type".into(), json!(check.plugin_name));
        details.insert("inline_snmp".into(), json!(self.snmp_backend.is_inline()));
        details.insert("enforced_service".into(), json!(check.is_enforced));
        for (key, value) in &check.parameters {
            details.insert(key.clone(), value.clone());
        }

        let report = self.assemble(CrashKind::Check, details, host_name, rtc_package, &error);
        self.finish(text, report, error)
    }

    fn finish(
        &self,
        text: String,
        report: CrashReport,
        original: anyhow::Error,
    ) -> anyhow::Result<String> {
        match self.store.save(&report) {
            Ok(ident) => Ok(format!(
                "{text} - please submit a crash report! (Crash-ID: {ident})"
            )),
            Err(secondary) => {
                warn!("failed to persist crash report: {secondary}");
                if self.debug {
                    return Err(original);
                }
                Ok(format!("{text} - failed to create a crash report: {secondary}"))
            }
        }
    }

    fn assemble(
        &self,
        kind: CrashKind,
        details: Map<String, Value>,
        host_name: &HostName,
        rtc_package: Option<&[u8]>,
        error: &anyhow::Error,
    ) -> CrashReport {
        CrashReport {
            kind,
            time: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| String::from("unknown")),
            version: env!("CARGO_PKG_VERSION").to_string(),
            error: error.to_string(),
            trace: error.chain().map(|cause| cause.to_string()).collect(),
            details,
            snmp_info: self.read_snmp_info(host_name),
            agent_output: self.read_agent_output(host_name, rtc_package),
        }
    }

    fn read_snmp_info(&self, host_name: &HostName) -> Option<Vec<u8>> {
        self.cache.read(host_name, crate::models::SourceKind::SnmpWalk)
    }

    /// Own agent output plus everything piggybacked onto this host, in
    /// resolver order, joined with a single newline. Unreadable entries
    /// are skipped; no readable payload at all means no attachment.
    /// Freshly fetched data supplied by the caller replaces the cache
    /// reads entirely.
    fn read_agent_output(
        &self,
        host_name: &HostName,
        rtc_package: Option<&[u8]>,
    ) -> Option<Vec<u8>> {
        if let Some(package) = rtc_package {
            return Some(package.to_vec());
        }
        let mut outputs = Vec::new();
        if let Some(own) = self.cache.read(host_name, crate::models::SourceKind::AgentTcp) {
            outputs.push(own);
        }
        for source in source_hosts_for(&self.cache, host_name) {
            if let Some(forwarded) = self.cache.read_piggyback(host_name, &source) {
                outputs.push(forwarded);
            }
        }
        if outputs.is_empty() {
            return None;
        }
        Some(outputs.join(&b'\n'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use anyhow::anyhow;
    use parking_lot::Mutex;

    fn host(name: &str) -> HostName {
        HostName::new(name).unwrap()
    }

    fn section(name: &str) -> SectionName {
        SectionName::new(name).unwrap()
    }

    /// Store keeping reports in memory for inspection
    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<CrashReport>>,
    }

    impl CrashStore for RecordingStore {
        fn save(&self, report: &CrashReport) -> Result<CrashIdent, CrashStoreError> {
            self.saved.lock().push(report.clone());
            Ok(CrashIdent::new("test-ident"))
        }
    }

    /// Store whose persistence always fails
    struct FailingStore;

    impl CrashStore for FailingStore {
        fn save(&self, _report: &CrashReport) -> Result<CrashIdent, CrashStoreError> {
            Err(CrashStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "disk full",
            )))
        }
    }

    fn snapshotter_with(
        cache: CacheStore,
        store: Arc<dyn CrashStore>,
        debug: bool,
    ) -> CrashSnapshotter {
        CrashSnapshotter::new(cache, store, debug, SnmpBackendKind::StoredWalk)
    }

    #[test]
    fn test_no_cached_data_yields_no_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let snap = snapshotter_with(CacheStore::new(dir.path()), store.clone(), false);

        let text = snap
            .section_crash(
                SectionOperation::Parse,
                &section("cpu"),
                b"1 2 3",
                &host("h1"),
                None,
                anyhow!("boom"),
            )
            .unwrap();

        assert_eq!(
            text,
            "Parsing of section cpu failed - please submit a crash report! (Crash-ID: test-ident)"
        );
        let saved = store.saved.lock();
        assert!(saved[0].snmp_info.is_none());
        assert!(saved[0].agent_output.is_none());
        assert_eq!(saved[0].details["host_name"], json!("h1"));
    }

    #[test]
    fn test_agent_output_concatenates_in_resolver_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let h = host("h1");
        cache.write(&h, SourceKind::AgentTcp, b"A").unwrap();
        cache.write_piggyback(&h, &host("src-b"), b"B").unwrap();
        cache.write_piggyback(&h, &host("src-c"), b"C").unwrap();

        let store = Arc::new(RecordingStore::default());
        let snap = snapshotter_with(cache, store.clone(), false);
        snap.section_crash(
            SectionOperation::Parse,
            &section("cpu"),
            b"",
            &h,
            None,
            anyhow!("boom"),
        )
        .unwrap();

        let saved = store.saved.lock();
        assert_eq!(saved[0].agent_output.as_deref(), Some(&b"A\nB\nC"[..]));
    }

    #[test]
    fn test_unreadable_piggyback_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let h = host("h1");
        cache.write(&h, SourceKind::AgentTcp, b"A").unwrap();
        cache.write_piggyback(&h, &host("src-b"), b"B").unwrap();
        // src-c exists but is not a readable payload file
        fs::create_dir_all(cache.piggyback_dir(&h).join("src-c")).unwrap();

        let store = Arc::new(RecordingStore::default());
        let snap = snapshotter_with(cache, store.clone(), false);
        snap.section_crash(
            SectionOperation::Parse,
            &section("cpu"),
            b"",
            &h,
            None,
            anyhow!("boom"),
        )
        .unwrap();

        let saved = store.saved.lock();
        assert_eq!(saved[0].agent_output.as_deref(), Some(&b"A\nB"[..]));
    }

    #[test]
    fn test_rtc_package_replaces_cache_reads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let h = host("h1");
        cache.write(&h, SourceKind::AgentTcp, b"stale cache").unwrap();

        let store = Arc::new(RecordingStore::default());
        let snap = snapshotter_with(cache, store.clone(), false);
        snap.section_crash(
            SectionOperation::Parse,
            &section("cpu"),
            b"",
            &h,
            Some(b"fresh"),
            anyhow!("boom"),
        )
        .unwrap();

        let saved = store.saved.lock();
        assert_eq!(saved[0].agent_output.as_deref(), Some(&b"fresh"[..]));
    }

    #[test]
    fn test_debug_mode_reraises_original_error() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshotter_with(CacheStore::new(dir.path()), Arc::new(FailingStore), true);

        let err = snap
            .section_crash(
                SectionOperation::Parse,
                &section("cpu"),
                b"",
                &host("h1"),
                None,
                anyhow!("the original failure"),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "the original failure");
    }

    #[test]
    fn test_store_failure_degrades_to_text_without_debug() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshotter_with(CacheStore::new(dir.path()), Arc::new(FailingStore), false);

        let text = snap
            .section_crash(
                SectionOperation::HostLabels,
                &section("cpu"),
                b"",
                &host("h1"),
                None,
                anyhow!("the original failure"),
            )
            .unwrap();
        assert!(text.starts_with("Host label extraction of section cpu failed"));
        assert!(text.contains("failed to create a crash report"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn test_check_crash_details_and_template() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let snap = CrashSnapshotter::new(
            CacheStore::new(dir.path()),
            store.clone(),
            false,
            SnmpBackendKind::Inline,
        );

        let mut parameters = Map::new();
        parameters.insert("levels".into(), json!([80, 90]));
        let text = snap
            .check_crash(
                &host("h1"),
                &CheckCrashDetails {
                    service: ServiceName::new("CPU load").unwrap(),
                    plugin_name: "cpu_load".into(),
                    parameters,
                    is_cluster: false,
                    is_enforced: true,
                },
                None,
                anyhow!("plugin exploded"),
            )
            .unwrap();

        assert_eq!(
            text,
            "check failed - please submit a crash report! (Crash-ID: test-ident)"
        );
        let saved = store.saved.lock();
        assert_eq!(saved[0].kind, CrashKind::Check);
        assert_eq!(saved[0].details["description"], json!("CPU load"));
        assert_eq!(saved[0].details["inline_snmp"], json!(true));
        assert_eq!(saved[0].details["enforced_service"], json!(true));
        assert_eq!(saved[0].details["levels"], json!([80, 90]));
        assert_eq!(saved[0].error, "plugin exploded");
    }

    #[test]
    fn test_dir_store_persists_context_and_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirCrashStore::new(dir.path());
        let report = CrashReport {
            kind: CrashKind::Section,
            time: "2026-01-01T00:00:00Z".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            error: "boom".into(),
            trace: vec!["boom".into()],
            details: Map::new(),
            snmp_info: Some(b"walkwalk".to_vec()),
            agent_output: None,
        };

        let ident = store.save(&report).unwrap();
        let report_dir = store.report_dir(&ident);
        let context: Value =
            serde_json::from_slice(&fs::read(report_dir.join("crash.json")).unwrap()).unwrap();
        assert_eq!(context["type"], json!("section"));
        assert_eq!(context["error"], json!("boom"));
        assert_eq!(fs::read(report_dir.join("snmp_info")).unwrap(), b"walkwalk");
        assert!(!report_dir.join("agent_output").exists());
    }
}
