use crate::classifier::FlowId;
use crate::tracker::PacketId;
use serde::{Deserialize, Serialize};
use serde_with::{DurationNanoSeconds, serde_as};
use std::time::Duration;

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorStep {
    #[serde_as(as = "DurationNanoSeconds")]
    #[serde(rename = "relative_time_ns")]
    pub relative_time: Duration,
    #[serde(flatten)]
    pub kind: MonitorStepKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum MonitorStepKind {
    /// The packet left its source and is now tracked
    PacketTransmitted(PacketStep),
    /// The packet was seen at an intermediate hop
    PacketObserved(PacketObserved),
    /// The packet reached its destination
    PacketReceived(PacketReceived),
    /// The sweep gave up on the packet
    PacketLost(PacketStep),
    /// A loss sweep ran
    Sweep(SweepStep),
    /// An event was dropped because it violated the tracking rules
    EventRejected(RejectedEvent),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketStep {
    pub flow_id: FlowId,
    pub packet_id: PacketId,
    pub packet_size_bytes: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketObserved {
    pub flow_id: FlowId,
    pub packet_id: PacketId,
    /// Whether the packet was still in flight when observed
    pub tracked: bool,
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketReceived {
    pub flow_id: FlowId,
    pub packet_id: PacketId,
    pub packet_size_bytes: u64,
    #[serde_as(as = "DurationNanoSeconds")]
    #[serde(rename = "delay_ns")]
    pub delay: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepStep {
    pub lost_packets: usize,
    pub still_in_flight: usize,
    pub terminal: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectedEvent {
    pub reason: String,
}
