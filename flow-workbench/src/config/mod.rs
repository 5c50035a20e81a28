use crate::config::json::MonitorJsonConfig;
use crate::config::trace::TraceJson;
use anyhow::Context;
use flow_monitor::MonitorConfig;
use flow_monitor::event::MonitorEvents;
use std::fs;
use std::path::Path;

pub mod cli;
pub mod json;
pub mod trace;

pub fn load_monitor_config(path: Option<&Path>) -> anyhow::Result<MonitorConfig> {
    let Some(path) = path else {
        return Ok(MonitorConfig::default());
    };

    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read monitor config from `{}`", path.display()))?;
    let config: MonitorJsonConfig = serde_json::from_str(&json)
        .with_context(|| format!("invalid monitor config at `{}`", path.display()))?;

    Ok(config.into())
}

pub fn load_trace(path: &Path) -> anyhow::Result<MonitorEvents> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read trace from `{}`", path.display()))?;
    let trace: TraceJson = serde_json::from_str(&json)
        .with_context(|| format!("invalid trace at `{}`", path.display()))?;

    Ok(MonitorEvents::new(
        trace.events.into_iter().map(|e| e.into()).collect(),
    ))
}
