//! Agent payload parsing
//!
//! Raw agent output is a sequence of sections, each introduced by a
//! `<<<name>>>` header. A header may carry colon-separated options; the
//! one the parser interprets is `sep(N)`, selecting the ASCII field
//! separator for the section body (default: any whitespace). Every
//! section is decoded independently: a failing decoder is snapshotted as
//! a section crash and parsing continues with the remaining sections.

use crate::cache::CacheStore;
use crate::crash::{CrashSnapshotter, SectionOperation};
use crate::models::{HostName, HostSections, Section, SectionName, StringTable};
use crate::piggyback::source_hosts_for;
use crate::plugins::SectionRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One undecoded section as found in the raw payload
struct RawSection {
    name: SectionName,
    separator: Option<char>,
    lines: Vec<String>,
}

impl RawSection {
    fn body_bytes(&self) -> Vec<u8> {
        self.lines.join("\n").into_bytes()
    }

    fn string_table(&self) -> StringTable {
        self.lines
            .iter()
            .map(|line| match self.separator {
                Some(sep) => line.split(sep).map(str::to_string).collect(),
                None => line.split_whitespace().map(str::to_string).collect(),
            })
            .collect()
    }
}

/// `<<<name>>>` or `<<<name:opt(arg):...>>>`; anything else is a body line
fn parse_header(line: &str) -> Option<(SectionName, Option<char>)> {
    let inner = line.strip_prefix("<<<")?.strip_suffix(">>>")?;
    let mut parts = inner.split(':');
    let name = SectionName::new(parts.next()?).ok()?;
    let mut separator = None;
    for option in parts {
        if let Some(arg) = option.strip_prefix("sep(").and_then(|o| o.strip_suffix(')')) {
            separator = arg.parse::<u8>().ok().map(char::from);
        }
        // other header options (cached age, persistence) are not interpreted
    }
    Some((name, separator))
}

/// Group a raw payload into sections, merging duplicate headers in order.
/// Lines before the first header and piggyback markers are ignored here;
/// piggybacked payloads are demultiplexed at fetch time.
fn split_sections(raw: &[u8]) -> Vec<RawSection> {
    let mut sections: Vec<RawSection> = Vec::new();
    let mut index: HashMap<SectionName, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    for raw_line in raw.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(raw_line);
        let line = line.trim_end_matches('\r');
        if line.starts_with("<<<<") && line.ends_with(">>>>") {
            continue;
        }
        if let Some((name, separator)) = parse_header(line) {
            let at = *index.entry(name.clone()).or_insert_with(|| {
                sections.push(RawSection { name, separator, lines: Vec::new() });
                sections.len() - 1
            });
            current = Some(at);
        } else if let Some(at) = current {
            if !line.is_empty() {
                sections[at].lines.push(line.to_string());
            }
        }
    }
    sections
}

/// Decodes one host's raw agent payload into [`HostSections`]
pub struct AgentParser {
    registry: Arc<SectionRegistry>,
    snapshotter: CrashSnapshotter,
}

impl AgentParser {
    pub fn new(registry: Arc<SectionRegistry>, snapshotter: CrashSnapshotter) -> Self {
        Self { registry, snapshotter }
    }

    /// Decode every section of `raw` independently.
    ///
    /// An empty payload yields empty [`HostSections`]. Sections without a
    /// registered decoder are preserved as opaque. A decoder or host-label
    /// failure is snapshotted and recorded under the section's name; the
    /// only `Err` path is the snapshotter re-raising in debug mode.
    pub fn parse(
        &self,
        host: &HostName,
        raw: &[u8],
        rtc_package: Option<&[u8]>,
    ) -> anyhow::Result<HostSections> {
        let mut result = HostSections::default();

        for raw_section in split_sections(raw) {
            let name = raw_section.name.clone();
            let Some(plugin) = self.registry.get(&name) else {
                result.sections.insert(name, Section::Opaque(raw_section.body_bytes()));
                continue;
            };

            let table = raw_section.string_table();
            let value = match (plugin.parse)(&table) {
                Ok(value) => value,
                Err(error) => {
                    let text = self.snapshotter.section_crash(
                        SectionOperation::Parse,
                        &name,
                        &raw_section.body_bytes(),
                        host,
                        rtc_package,
                        error,
                    )?;
                    result.failures.insert(name, text);
                    continue;
                }
            };

            if let Some(host_labels) = &plugin.host_labels {
                match host_labels(&value) {
                    Ok(labels) => result.labels.extend(labels),
                    Err(error) => {
                        let text = self.snapshotter.section_crash(
                            SectionOperation::HostLabels,
                            &name,
                            &raw_section.body_bytes(),
                            host,
                            rtc_package,
                            error,
                        )?;
                        // decoded value stays usable, only the labels are lost
                        result.failures.insert(name.clone(), text);
                    }
                }
            }

            result.sections.insert(name, Section::Decoded { table, value });
        }

        debug!(
            host = %host,
            sections = result.sections.len(),
            failures = result.failures.len(),
            "parsed agent payload"
        );
        Ok(result)
    }
}

/// Raw payload for one host's parse run: own agent output plus every
/// piggybacked payload targeting it, joined with a newline in resolver
/// order.
pub fn assemble_payload(cache: &CacheStore, host: &HostName) -> Vec<u8> {
    let mut payloads = Vec::new();
    if let Some(own) = cache.read(host, crate::models::SourceKind::AgentTcp) {
        payloads.push(own);
    }
    for source in source_hosts_for(cache, host) {
        if let Some(forwarded) = cache.read_piggyback(host, &source) {
            payloads.push(forwarded);
        }
    }
    payloads.join(&b'\n')
}

/// Parsed sections shared between consumers of one pipeline run.
///
/// Not durable: the next run starts empty.
#[derive(Default, Clone)]
pub struct ParsedSectionsCache {
    inner: Arc<Mutex<HashMap<HostName, Arc<HostSections>>>>,
}

impl ParsedSectionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &HostName) -> Option<Arc<HostSections>> {
        self.inner.lock().get(host).cloned()
    }

    /// Reuse this run's parse result for `host`, parsing once on first use
    pub fn get_or_parse(
        &self,
        parser: &AgentParser,
        host: &HostName,
        raw: &[u8],
    ) -> anyhow::Result<Arc<HostSections>> {
        if let Some(sections) = self.get(host) {
            return Ok(sections);
        }
        let sections = Arc::new(parser.parse(host, raw, None)?);
        self.inner.lock().insert(host.clone(), sections.clone());
        Ok(sections)
    }
}
