//! Check result summarization
//!
//! Orchestrates one check plugin over one host's parsed sections. The
//! check logic itself is external; this layer selects the sections the
//! plugin declares, invokes it, and turns a raised error into a degraded
//! but valid result carrying the crash-report text.

use crate::crash::{CheckCrashDetails, CrashSnapshotter};
use crate::models::{CheckResult, CheckStatus, HostName, HostSections, ServiceName};
use tracing::debug;

/// Cluster/enforced context of one service invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceFlags {
    pub is_cluster: bool,
    pub is_enforced: bool,
}

/// Run `plugin` for `service` on `host` over `sections`.
///
/// A plugin error is snapshotted as a check crash and mapped to an
/// UNKNOWN result whose output is the crash text; missing declared
/// sections short-circuit to UNKNOWN without invoking the plugin. The
/// only `Err` path is the snapshotter re-raising in debug mode.
pub fn summarize(
    host: &HostName,
    service: &ServiceName,
    sections: &HostSections,
    plugin: &crate::plugins::CheckPlugin,
    flags: ServiceFlags,
    snapshotter: &CrashSnapshotter,
    rtc_package: Option<&[u8]>,
) -> anyhow::Result<CheckResult> {
    let missing: Vec<&str> = plugin
        .sections
        .iter()
        .filter(|name| !sections.sections.contains_key(name))
        .map(|name| name.as_str())
        .collect();
    if !missing.is_empty() {
        return Ok(CheckResult::new(
            CheckStatus::Unknown,
            format!("no agent data for section(s) {}", missing.join(", ")),
        ));
    }

    match (plugin.check)(sections) {
        Ok(result) => {
            debug!(host = %host, service = %service, status = %result.status, "check done");
            Ok(result)
        }
        Err(error) => {
            let text = snapshotter.check_crash(
                host,
                &CheckCrashDetails {
                    service: service.clone(),
                    plugin_name: plugin.name.clone(),
                    parameters: plugin.parameters.clone(),
                    is_cluster: flags.is_cluster,
                    is_enforced: flags.is_enforced,
                },
                rtc_package,
                error,
            )?;
            Ok(CheckResult::new(CheckStatus::Unknown, text))
        }
    }
}
