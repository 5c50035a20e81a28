//! Serializable per-flow report, produced at the end of a run

use crate::classifier::{FlowClassifier, FlowId, IpProtocol};
use crate::histogram::Histogram;
use crate::stats::FlowStats;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, DurationNanoSeconds, serde_as};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowReport {
    pub flows: Vec<FlowRecord>,
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: FlowId,
    #[serde_as(as = "DisplayFromStr")]
    pub protocol: IpProtocol,
    pub source_address: IpAddr,
    pub source_port: u16,
    pub destination_address: IpAddr,
    pub destination_port: u16,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub times_forwarded: u64,
    pub delay_sum_s: f64,
    pub jitter_sum_s: f64,
    pub mean_delay_s: f64,
    pub mean_jitter_s: f64,
    pub delay_variance_s2: f64,
    /// Absent when no packet was received after the first transmission
    pub throughput_bps: Option<f64>,
    #[serde_as(as = "Option<DurationNanoSeconds>")]
    #[serde(rename = "time_first_tx_ns")]
    pub time_first_tx: Option<Duration>,
    #[serde_as(as = "Option<DurationNanoSeconds>")]
    #[serde(rename = "time_last_tx_ns")]
    pub time_last_tx: Option<Duration>,
    #[serde_as(as = "Option<DurationNanoSeconds>")]
    #[serde(rename = "time_first_rx_ns")]
    pub time_first_rx: Option<Duration>,
    #[serde_as(as = "Option<DurationNanoSeconds>")]
    #[serde(rename = "time_last_rx_ns")]
    pub time_last_rx: Option<Duration>,
    pub saturated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub histograms: Option<FlowHistograms>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowHistograms {
    pub delay: HistogramRecord,
    pub jitter: HistogramRecord,
    pub packet_size: HistogramRecord,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistogramRecord {
    pub bin_width: f64,
    /// Non-empty bins only
    pub bins: Vec<BinRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinRecord {
    pub index: u64,
    pub start: f64,
    pub width: f64,
    pub count: u64,
}

impl From<&Histogram> for HistogramRecord {
    fn from(histogram: &Histogram) -> Self {
        let width = histogram.bin_width();
        Self {
            bin_width: width,
            bins: histogram
                .bins()
                .map(|(index, count)| BinRecord {
                    index,
                    start: index as f64 * width,
                    width,
                    count,
                })
                .collect(),
        }
    }
}

impl FlowReport {
    /// Builds a report of all flows, in flow id order
    ///
    /// Flows without statistics (e.g. only ever seen through a rejected event) are left out.
    pub fn new(
        stats: &BTreeMap<FlowId, FlowStats>,
        classifier: &FlowClassifier,
        include_histograms: bool,
    ) -> Self {
        let flows = stats
            .iter()
            .filter_map(|(&flow_id, stats)| {
                let Some(key) = classifier.find_flow(flow_id) else {
                    tracing::warn!(%flow_id, "flow has statistics but no classifier entry");
                    return None;
                };

                let histograms = include_histograms.then(|| FlowHistograms {
                    delay: (&stats.delay_histogram).into(),
                    jitter: (&stats.jitter_histogram).into(),
                    packet_size: (&stats.packet_size_histogram).into(),
                });

                Some(FlowRecord {
                    flow_id,
                    protocol: key.protocol,
                    source_address: key.source_address,
                    source_port: key.source_port,
                    destination_address: key.destination_address,
                    destination_port: key.destination_port,
                    tx_packets: stats.tx.packets,
                    tx_bytes: stats.tx.bytes,
                    rx_packets: stats.rx.packets,
                    rx_bytes: stats.rx.bytes,
                    lost_packets: stats.lost_packets,
                    times_forwarded: stats.times_forwarded,
                    delay_sum_s: stats.delay_sum,
                    jitter_sum_s: stats.jitter_sum,
                    mean_delay_s: stats.mean_delay(),
                    mean_jitter_s: stats.mean_jitter(),
                    delay_variance_s2: stats.delay_variance(),
                    throughput_bps: stats.throughput_bps(),
                    time_first_tx: stats.time_first_tx,
                    time_last_tx: stats.time_last_tx,
                    time_first_rx: stats.time_first_rx,
                    time_last_rx: stats.time_last_rx,
                    saturated: stats.saturated,
                    histograms,
                })
            })
            .collect();

        Self { flows }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
