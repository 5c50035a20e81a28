pub mod classifier;
pub mod config;
pub mod event;
pub mod histogram;
pub mod monitor;
pub mod observer;
pub mod report;
pub mod stats;
pub mod sweep;
pub mod tracker;

pub use classifier::{FlowClassifier, FlowId, FlowKey, IpProtocol};
pub use config::{ConfigError, MonitorConfig};
pub use monitor::{FlowMonitor, MonitorError};
pub use report::FlowReport;
pub use stats::{FlowStats, PacketStats};
pub use tracker::{LostPacket, PacketId};
