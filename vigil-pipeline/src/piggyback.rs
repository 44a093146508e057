//! Piggyback resolution
//!
//! A host's piggyback directory holds one file per source host that
//! forwarded data on its behalf. Sources are returned in lexicographic
//! byte order so downstream concatenation is reproducible across runs.

use crate::cache::CacheStore;
use crate::models::HostName;
use std::fs;
use tracing::debug;

/// Hosts currently forwarding data on behalf of `target`, sorted.
///
/// A missing piggyback directory yields an empty list; unreadable entries
/// and file names that are not valid host names are skipped.
pub fn source_hosts_for(cache: &CacheStore, target: &HostName) -> Vec<HostName> {
    let dir = cache.piggyback_dir(target);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut sources: Vec<HostName> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| HostName::new(name).ok())
        .collect();
    sources.sort();
    debug!(target = %target, sources = sources.len(), "resolved piggyback sources");
    sources
}
