use std::time::Duration;
use thiserror::Error;

/// Tunables of a [`crate::FlowMonitor`]
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    /// Time without any sighting after which a tracked packet is declared lost
    pub max_delay: Duration,
    /// Cadence of the automatic loss sweeps
    ///
    /// Should be short relative to `max_delay`, since the sweep is the only place where the
    /// memory of dropped packets is reclaimed.
    pub sweep_interval: Duration,
    /// Width of the delay histogram bins, in seconds
    pub delay_bin_width: f64,
    /// Width of the jitter histogram bins, in seconds
    pub jitter_bin_width: f64,
    /// Width of the packet size histogram bins, in bytes
    pub packet_size_bin_width: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            delay_bin_width: 0.001,
            jitter_bin_width: 0.001,
            packet_size_bin_width: 20.0,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("`{name}` must be a positive, finite number (got {value})")]
    InvalidBinWidth { name: &'static str, value: f64 },
    #[error("`{name}` must be greater than zero")]
    ZeroDuration { name: &'static str },
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delay.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "max_delay" });
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "sweep_interval",
            });
        }

        for (name, value) in [
            ("delay_bin_width", self.delay_bin_width),
            ("jitter_bin_width", self.jitter_bin_width),
            ("packet_size_bin_width", self.packet_size_bin_width),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidBinWidth { name, value });
            }
        }

        Ok(())
    }
}
