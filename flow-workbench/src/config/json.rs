use flow_monitor::MonitorConfig;
use serde::Deserialize;
use std::time::Duration;

/// Monitor settings as stored on disk
///
/// Every field is optional, missing fields take the monitor's default value.
#[derive(Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct MonitorJsonConfig {
    /// Time without any sighting after which an in-flight packet is declared lost, in
    /// milliseconds
    pub max_delay_ms: Option<u64>,
    /// The interval between two periodic loss sweeps, in milliseconds
    pub sweep_interval_ms: Option<u64>,
    /// The width of a delay histogram bin, in seconds
    pub delay_bin_width_s: Option<f64>,
    /// The width of a jitter histogram bin, in seconds
    pub jitter_bin_width_s: Option<f64>,
    /// The width of a packet size histogram bin, in bytes
    pub packet_size_bin_width_bytes: Option<f64>,
}

impl From<MonitorJsonConfig> for MonitorConfig {
    fn from(json: MonitorJsonConfig) -> Self {
        let defaults = MonitorConfig::default();
        MonitorConfig {
            max_delay: json
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            sweep_interval: json
                .sweep_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            delay_bin_width: json.delay_bin_width_s.unwrap_or(defaults.delay_bin_width),
            jitter_bin_width: json.jitter_bin_width_s.unwrap_or(defaults.jitter_bin_width),
            packet_size_bin_width: json
                .packet_size_bin_width_bytes
                .unwrap_or(defaults.packet_size_bin_width),
        }
    }
}
