//! On-disk byte cache for raw telemetry
//!
//! One file per (host, kind); piggybacked payloads live one level deeper,
//! keyed by target host then source host. Writes replace atomically via a
//! temp file + rename in the target directory, so a concurrent reader sees
//! either the previous or the new complete content, never a partial one.
//! Reads are best-effort: a missing file or any I/O error is absence.

use crate::models::{HostName, SourceKind};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// File backing (host, kind); `Piggyback` is addressed per source host
    /// through [`CacheStore::piggyback_path`] instead.
    pub fn entry_path(&self, host: &HostName, kind: SourceKind) -> PathBuf {
        let area = match kind {
            SourceKind::AgentTcp => "agent",
            SourceKind::SnmpWalk => "snmpwalks",
            SourceKind::Piggyback => "piggyback",
        };
        self.root.join(area).join(host.as_str())
    }

    /// Directory holding everything forwarded to `target`, one file per
    /// source host
    pub fn piggyback_dir(&self, target: &HostName) -> PathBuf {
        self.root.join("piggyback").join(target.as_str())
    }

    fn piggyback_path(&self, target: &HostName, source: &HostName) -> PathBuf {
        self.piggyback_dir(target).join(source.as_str())
    }

    /// Replace the cache entry for (host, kind) atomically
    pub fn write(&self, host: &HostName, kind: SourceKind, bytes: &[u8]) -> io::Result<()> {
        self.write_path(&self.entry_path(host, kind), bytes)
    }

    /// Latest successfully written entry for (host, kind), if any.
    /// Any read error is reported as absence.
    pub fn read(&self, host: &HostName, kind: SourceKind) -> Option<Vec<u8>> {
        fs::read(self.entry_path(host, kind)).ok()
    }

    /// Replace what `source` forwarded on behalf of `target`
    pub fn write_piggyback(
        &self,
        target: &HostName,
        source: &HostName,
        bytes: &[u8],
    ) -> io::Result<()> {
        self.write_path(&self.piggyback_path(target, source), bytes)
    }

    /// Payload `source` forwarded on behalf of `target`, if readable
    pub fn read_piggyback(&self, target: &HostName, source: &HostName) -> Option<Vec<u8>> {
        fs::read(self.piggyback_path(target, source)).ok()
    }

    fn write_path(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "entry path has no parent"))?;
        fs::create_dir_all(dir)?;
        // temp file in the same directory so the rename stays on one filesystem
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        debug!(path = %path.display(), len = bytes.len(), "cache entry written");
        Ok(())
    }
}
