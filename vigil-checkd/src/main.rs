//! vigil-checkd - one pipeline run over the configured hosts
//!
//! Bootstraps config, cache and crash stores, then runs
//! fetch → parse → summarize per host, each host in its own task with its
//! own fetch timeout. Per-host failures never terminate the run; a host
//! whose fetch times out is checked against whatever its cache still
//! holds.

mod plugins;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vigil_pipeline::config::HostConf;
use vigil_pipeline::parse::assemble_payload;
use vigil_pipeline::{
    load_config, summarize, AgentParser, AgentTcpTransport, CacheStore, CheckPlugin, CheckResult,
    CrashSnapshotter, DirCrashStore, Fetcher, HostName, ParsedSectionsCache, PipelineConfig,
    ServiceFlags, ServiceName, StoredWalkBackend,
};

/// Everything one host run needs, shared across all host tasks
struct RunContext {
    config: PipelineConfig,
    cache: CacheStore,
    snapshotter: CrashSnapshotter,
    parser: AgentParser,
    parsed: ParsedSectionsCache,
    checks: Vec<(ServiceName, CheckPlugin)>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config().await;
    let cache = CacheStore::new(&config.cache_root);
    let crash_store = Arc::new(DirCrashStore::new(&config.crash_root));
    let snapshotter = CrashSnapshotter::new(
        cache.clone(),
        crash_store,
        config.debug,
        config.snmp_backend,
    );
    let parser = AgentParser::new(Arc::new(plugins::bundled_sections()), snapshotter.clone());

    let ctx = Arc::new(RunContext {
        cache,
        snapshotter,
        parser,
        parsed: ParsedSectionsCache::new(),
        checks: plugins::bundled_checks(),
        config,
    });

    let mut tasks = Vec::new();
    for (name, conf) in ctx.config.hosts.clone() {
        let host = match HostName::new(&name) {
            Ok(host) => host,
            Err(e) => {
                warn!("skipping configured host {name:?}: {e}");
                continue;
            }
        };
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let outcome = run_host(&host, &conf, &ctx).await;
            (host, outcome)
        }));
    }
    if tasks.is_empty() {
        warn!("no hosts configured, nothing to do");
        return;
    }

    let mut failed = 0usize;
    for task in tasks {
        match task.await {
            Ok((host, Ok(results))) => {
                for (service, result) in results {
                    info!(
                        host = %host,
                        service = %service,
                        state = result.status.code(),
                        "{} - {}",
                        result.status,
                        result.output
                    );
                }
            }
            Ok((host, Err(e))) => {
                // debug mode re-raise, or the task's own setup failing
                failed += 1;
                error!(host = %host, "host run failed: {e:#}");
            }
            Err(e) => {
                failed += 1;
                error!("host task panicked: {e}");
            }
        }
    }
    info!(failed, "pipeline run complete");
}

/// Strict per-host pipeline: fetch (bounded), then parse, then summarize
async fn run_host(
    host: &HostName,
    conf: &HostConf,
    ctx: &RunContext,
) -> Result<Vec<(ServiceName, CheckResult)>> {
    let mut fetcher = Fetcher::new(ctx.cache.clone());
    if !conf.no_agent {
        let port = conf.agent_port.unwrap_or(ctx.config.agent_port);
        fetcher = fetcher.with_agent(AgentTcpTransport::new(
            port,
            Duration::from_secs(ctx.config.fetch_timeout_secs),
        ));
    }
    if conf.snmp {
        fetcher = fetcher.with_snmp(Arc::new(StoredWalkBackend::new(&ctx.config.walk_dir)));
    }

    let address = conf.address.clone().unwrap_or_else(|| host.to_string());
    let timeout = Duration::from_secs(ctx.config.fetch_timeout_secs);
    match tokio::time::timeout(timeout, fetcher.fetch_host(host, &address)).await {
        Ok(outcome) if outcome.any_success() => {}
        Ok(_) => warn!(host = %host, "no transport succeeded, using cached data"),
        // only the fetch stage is abandoned; cached data stays usable
        Err(_) => warn!(host = %host, "fetch timed out after {timeout:?}, using cached data"),
    }

    let raw = assemble_payload(&ctx.cache, host);
    let sections = ctx.parsed.get_or_parse(&ctx.parser, host, &raw)?;

    let mut results = Vec::new();
    for (service, plugin) in &ctx.checks {
        let result = summarize(
            host,
            service,
            sections.as_ref(),
            plugin,
            ServiceFlags::default(),
            &ctx.snapshotter,
            None,
        )?;
        results.push((service.clone(), result));
    }
    Ok(results)
}
