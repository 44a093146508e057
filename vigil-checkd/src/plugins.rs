//! Bundled section and check plugins
//!
//! A small built-in set so the runner is useful out of the box: CPU load
//! and memory. Deployments register their own plugins next to these.

use anyhow::{anyhow, Context};
use serde_json::{json, Map, Value};
use vigil_pipeline::{
    CheckPlugin, CheckResult, CheckStatus, HostLabel, SectionName, SectionPlugin, SectionRegistry,
    ServiceName,
};

fn section(name: &str) -> SectionName {
    SectionName::new(name).expect("static section name")
}

pub fn bundled_sections() -> SectionRegistry {
    let mut registry = SectionRegistry::new();

    // <<<cpu>>>: "load1 load5 load15 [ncpus]"
    registry.register(SectionPlugin::new(section("cpu"), |table| {
        let row = table.first().ok_or_else(|| anyhow!("empty cpu section"))?;
        let load = |i: usize| -> anyhow::Result<f64> {
            row.get(i)
                .ok_or_else(|| anyhow!("missing load field {i}"))?
                .parse()
                .with_context(|| format!("bad load field {i}"))
        };
        let ncpus = match row.get(3) {
            Some(n) => n.parse::<u64>().context("bad cpu count")?,
            None => 1,
        };
        Ok(json!({
            "load1": load(0)?,
            "load5": load(1)?,
            "load15": load(2)?,
            "ncpus": ncpus,
        }))
    }));

    // <<<mem>>>: "total_mb used_mb"
    registry.register(SectionPlugin::new(section("mem"), |table| {
        let row = table.first().ok_or_else(|| anyhow!("empty mem section"))?;
        let total: u64 = row
            .first()
            .ok_or_else(|| anyhow!("missing total"))?
            .parse()
            .context("bad total")?;
        let used: u64 = row
            .get(1)
            .ok_or_else(|| anyhow!("missing used"))?
            .parse()
            .context("bad used")?;
        Ok(json!({ "total_mb": total, "used_mb": used }))
    }));

    // <<<os>>>: single line OS identifier, doubles as a host label
    registry.register(
        SectionPlugin::new(section("os"), |table| {
            let name = table
                .first()
                .and_then(|row| row.first())
                .ok_or_else(|| anyhow!("empty os section"))?;
            Ok(json!({ "os": name }))
        })
        .with_host_labels(|value| {
            let os = value["os"].as_str().unwrap_or_default();
            Ok(vec![HostLabel::new("vigil/os", os)])
        }),
    );

    registry
}

pub fn bundled_checks() -> Vec<(ServiceName, CheckPlugin)> {
    let cpu_service = ServiceName::new("CPU load").expect("static service name");
    let mut cpu_params = Map::new();
    cpu_params.insert("levels_per_cpu".into(), json!([1.5, 3.0]));
    let cpu_check = CheckPlugin::new("cpu_load", vec![section("cpu")], move |sections| {
        let value = sections
            .decoded(&section("cpu"))
            .ok_or_else(|| anyhow!("cpu section not decoded"))?;
        let load15 = value["load15"].as_f64().ok_or_else(|| anyhow!("load15 missing"))?;
        let ncpus = value["ncpus"].as_u64().unwrap_or(1).max(1) as f64;
        let per_cpu = load15 / ncpus;
        let status = if per_cpu >= 3.0 {
            CheckStatus::Crit
        } else if per_cpu >= 1.5 {
            CheckStatus::Warn
        } else {
            CheckStatus::Ok
        };
        Ok(CheckResult::new(
            status,
            format!("15 min load: {load15:.2} ({per_cpu:.2} per core)"),
        ))
    })
    .with_parameters(cpu_params);

    let mem_service = ServiceName::new("Memory").expect("static service name");
    let mem_check = CheckPlugin::new("mem_used", vec![section("mem")], |sections| {
        let value = sections
            .decoded(&section("mem"))
            .ok_or_else(|| anyhow!("mem section not decoded"))?;
        let total = value["total_mb"].as_u64().ok_or_else(|| anyhow!("total missing"))?;
        let used = value["used_mb"].as_u64().ok_or_else(|| anyhow!("used missing"))?;
        if total == 0 {
            return Err(anyhow!("agent reported zero total memory"));
        }
        let percent = used as f64 / total as f64 * 100.0;
        let status = if percent >= 95.0 {
            CheckStatus::Crit
        } else if percent >= 85.0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Ok
        };
        Ok(CheckResult::new(
            status,
            format!("{used} MB of {total} MB used ({percent:.1}%)"),
        ))
    });

    vec![(cpu_service, cpu_check), (mem_service, mem_check)]
}
