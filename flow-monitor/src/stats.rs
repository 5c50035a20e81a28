use crate::classifier::FlowId;
use crate::config::MonitorConfig;
use crate::histogram::Histogram;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketStats {
    pub packets: u64,
    pub bytes: u64,
}

impl PacketStats {
    /// Counts one packet, returning `false` if a counter saturated
    pub fn track_one(&mut self, size_bytes: u64) -> bool {
        let packets_ok = saturating_increment(&mut self.packets, 1);
        let bytes_ok = saturating_increment(&mut self.bytes, size_bytes);
        packets_ok && bytes_ok
    }
}

fn saturating_increment(counter: &mut u64, amount: u64) -> bool {
    match counter.checked_add(amount) {
        Some(value) => {
            *counter = value;
            true
        }
        None => {
            *counter = u64::MAX;
            false
        }
    }
}

/// Running statistics of a single flow
#[derive(Clone, Debug, PartialEq)]
pub struct FlowStats {
    pub tx: PacketStats,
    pub rx: PacketStats,
    pub lost_packets: u64,
    /// Number of intermediate sightings of the flow's packets
    pub times_forwarded: u64,
    /// Sum of the end-to-end delays of received packets, in seconds
    pub delay_sum: f64,
    /// Sum of the squared end-to-end delays of received packets, in seconds²
    pub delay_squared_sum: f64,
    /// Sum of the jitter samples, in seconds
    pub jitter_sum: f64,
    /// Delay of the most recently received packet (needed for the next jitter sample)
    pub last_delay: Option<Duration>,
    pub time_first_tx: Option<Duration>,
    pub time_last_tx: Option<Duration>,
    pub time_first_rx: Option<Duration>,
    pub time_last_rx: Option<Duration>,
    pub delay_histogram: Histogram,
    pub jitter_histogram: Histogram,
    pub packet_size_histogram: Histogram,
    /// Whether any counter of this flow hit `u64::MAX`
    pub saturated: bool,
}

impl FlowStats {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            tx: PacketStats::default(),
            rx: PacketStats::default(),
            lost_packets: 0,
            times_forwarded: 0,
            delay_sum: 0.0,
            delay_squared_sum: 0.0,
            jitter_sum: 0.0,
            last_delay: None,
            time_first_tx: None,
            time_last_tx: None,
            time_first_rx: None,
            time_last_rx: None,
            delay_histogram: Histogram::new(config.delay_bin_width),
            jitter_histogram: Histogram::new(config.jitter_bin_width),
            packet_size_histogram: Histogram::new(config.packet_size_bin_width),
            saturated: false,
        }
    }

    /// Mean end-to-end delay in seconds, or zero if nothing was received
    pub fn mean_delay(&self) -> f64 {
        if self.rx.packets == 0 {
            0.0
        } else {
            self.delay_sum / self.rx.packets as f64
        }
    }

    /// Mean jitter in seconds, or zero if fewer than two packets were received
    pub fn mean_jitter(&self) -> f64 {
        if self.rx.packets < 2 {
            0.0
        } else {
            self.jitter_sum / (self.rx.packets - 1) as f64
        }
    }

    /// Population variance of the end-to-end delay, in seconds²
    pub fn delay_variance(&self) -> f64 {
        if self.rx.packets == 0 {
            return 0.0;
        }

        let n = self.rx.packets as f64;
        let mean = self.delay_sum / n;
        (self.delay_squared_sum / n - mean * mean).max(0.0)
    }

    /// Received bits per second between the first transmission and the last reception
    ///
    /// Returns `None` when the interval is empty or negative.
    pub fn throughput_bps(&self) -> Option<f64> {
        let first_tx = self.time_first_tx?;
        let last_rx = self.time_last_rx?;
        let elapsed = last_rx.checked_sub(first_tx)?.as_secs_f64();
        if elapsed > 0.0 {
            Some(self.rx.bytes as f64 * 8.0 / elapsed)
        } else {
            None
        }
    }

    /// Packets that are neither received nor declared lost
    pub fn unresolved_packets(&self) -> u64 {
        self.tx
            .packets
            .saturating_sub(self.rx.packets.saturating_add(self.lost_packets))
    }
}

/// Per-flow statistics, updated through the `record_*` methods only
pub struct FlowStatsTable {
    config: MonitorConfig,
    flows: BTreeMap<FlowId, FlowStats>,
}

impl FlowStatsTable {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            config: config.clone(),
            flows: BTreeMap::new(),
        }
    }

    fn flow(&mut self, flow_id: FlowId) -> &mut FlowStats {
        let config = &self.config;
        self.flows
            .entry(flow_id)
            .or_insert_with(|| FlowStats::new(config))
    }

    pub fn record_tx(&mut self, flow_id: FlowId, size_bytes: u64, now: Duration) {
        let flow = self.flow(flow_id);
        let ok = flow.tx.track_one(size_bytes);
        flow.time_first_tx.get_or_insert(now);
        flow.time_last_tx = Some(now);

        report_saturation(flow_id, flow, ok);
    }

    pub fn record_rx(&mut self, flow_id: FlowId, size_bytes: u64, delay: Duration, now: Duration) {
        let flow = self.flow(flow_id);
        let ok = flow.rx.track_one(size_bytes);

        let delay_secs = delay.as_secs_f64();
        flow.delay_sum += delay_secs;
        flow.delay_squared_sum += delay_secs * delay_secs;
        flow.delay_histogram.add_value(delay_secs);
        flow.packet_size_histogram.add_value(size_bytes as f64);

        if let Some(last_delay) = flow.last_delay {
            let jitter = delay.abs_diff(last_delay).as_secs_f64();
            flow.jitter_sum += jitter;
            flow.jitter_histogram.add_value(jitter);
        }
        flow.last_delay = Some(delay);

        flow.time_first_rx.get_or_insert(now);
        flow.time_last_rx = Some(now);

        report_saturation(flow_id, flow, ok);
    }

    pub fn record_loss(&mut self, flow_id: FlowId, count: u64) {
        let flow = self.flow(flow_id);
        let ok = saturating_increment(&mut flow.lost_packets, count);
        report_saturation(flow_id, flow, ok);
    }

    pub fn record_forward(&mut self, flow_id: FlowId) {
        let flow = self.flow(flow_id);
        let ok = saturating_increment(&mut flow.times_forwarded, 1);
        report_saturation(flow_id, flow, ok);
    }

    pub fn get(&self, flow_id: FlowId) -> Option<&FlowStats> {
        self.flows.get(&flow_id)
    }

    pub fn snapshot(&self, flow_id: FlowId) -> Option<FlowStats> {
        self.flows.get(&flow_id).cloned()
    }

    pub fn snapshot_all(&self) -> BTreeMap<FlowId, FlowStats> {
        self.flows.clone()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

fn report_saturation(flow_id: FlowId, flow: &mut FlowStats, ok: bool) {
    if !ok && !flow.saturated {
        flow.saturated = true;
        tracing::warn!(%flow_id, "flow counter saturated at u64::MAX; further counts are lost");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classifier::{FlowClassifier, FlowKey, IpProtocol};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn flow_a() -> FlowId {
        FlowClassifier::new().classify(FlowKey::new(
            IpProtocol::UDP,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 49153),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(88, 88, 88, 88)), 9),
        ))
    }

    #[test]
    fn test_rx_updates_counters_and_histograms() {
        let a = flow_a();
        let mut table = FlowStatsTable::new(&MonitorConfig::default());

        table.record_tx(a, 1000, Duration::ZERO);
        table.record_rx(a, 1000, Duration::from_millis(30), Duration::from_millis(30));

        let stats = table.snapshot(a).unwrap();
        assert_eq!(stats.tx, PacketStats { packets: 1, bytes: 1000 });
        assert_eq!(stats.rx, PacketStats { packets: 1, bytes: 1000 });
        assert_eq!(stats.lost_packets, 0);
        assert_eq!(stats.delay_sum, Duration::from_millis(30).as_secs_f64());
        assert_eq!(stats.delay_histogram.total(), 1);
        assert_eq!(stats.packet_size_histogram.count(50), 1);
        assert!(stats.jitter_histogram.is_empty());
        assert_eq!(stats.jitter_sum, 0.0);
    }

    #[test]
    fn test_jitter_is_difference_between_consecutive_delays() {
        let a = flow_a();
        let mut table = FlowStatsTable::new(&MonitorConfig::default());

        for (i, delay_ms) in [10, 25, 20].into_iter().enumerate() {
            let sent = Duration::from_secs(i as u64);
            let delay = Duration::from_millis(delay_ms);
            table.record_tx(a, 500, sent);
            table.record_rx(a, 500, delay, sent + delay);
        }

        let stats = table.get(a).unwrap();
        let expected_jitter = Duration::from_millis(15).as_secs_f64()
            + Duration::from_millis(5).as_secs_f64();
        assert!((stats.jitter_sum - expected_jitter).abs() < 1e-12);
        assert_eq!(stats.jitter_histogram.total(), stats.rx.packets - 1);
        assert_eq!(stats.delay_histogram.total(), stats.rx.packets);
        assert_eq!(stats.last_delay, Some(Duration::from_millis(20)));
        assert!((stats.mean_jitter() - expected_jitter / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_timestamps_and_throughput() {
        let a = flow_a();
        let mut table = FlowStatsTable::new(&MonitorConfig::default());

        table.record_tx(a, 1000, Duration::from_secs(1));
        table.record_tx(a, 1000, Duration::from_secs(2));
        table.record_rx(a, 1000, Duration::from_millis(500), Duration::from_millis(1500));
        table.record_rx(a, 1000, Duration::from_secs(1), Duration::from_secs(3));

        let stats = table.get(a).unwrap();
        assert_eq!(stats.time_first_tx, Some(Duration::from_secs(1)));
        assert_eq!(stats.time_last_tx, Some(Duration::from_secs(2)));
        assert_eq!(stats.time_first_rx, Some(Duration::from_millis(1500)));
        assert_eq!(stats.time_last_rx, Some(Duration::from_secs(3)));
        assert_eq!(stats.throughput_bps(), Some(2000.0 * 8.0 / 2.0));
        assert_eq!(stats.mean_delay(), 0.75);
        assert_eq!(stats.delay_variance(), 0.0625);
    }

    #[test]
    fn test_throughput_is_undefined_for_empty_interval() {
        let a = flow_a();
        let mut table = FlowStatsTable::new(&MonitorConfig::default());

        table.record_tx(a, 1000, Duration::from_secs(1));
        assert_eq!(table.get(a).unwrap().throughput_bps(), None);

        table.record_rx(a, 1000, Duration::ZERO, Duration::from_secs(1));
        let stats = table.get(a).unwrap();
        assert_eq!(stats.throughput_bps(), None);
        assert_eq!(stats.mean_delay(), 0.0);
    }

    #[test]
    fn test_counters_saturate_instead_of_wrapping() {
        let a = flow_a();
        let mut table = FlowStatsTable::new(&MonitorConfig::default());

        table.record_tx(a, u64::MAX - 10, Duration::ZERO);
        assert!(!table.get(a).unwrap().saturated);

        table.record_tx(a, 100, Duration::ZERO);
        let stats = table.get(a).unwrap();
        assert_eq!(stats.tx.bytes, u64::MAX);
        assert_eq!(stats.tx.packets, 2);
        assert!(stats.saturated);

        table.record_loss(a, u64::MAX);
        table.record_loss(a, 1);
        assert_eq!(table.get(a).unwrap().lost_packets, u64::MAX);
    }

    #[test]
    fn test_loss_and_forward_create_flow_lazily() {
        let a = flow_a();
        let mut table = FlowStatsTable::new(&MonitorConfig::default());
        assert!(table.is_empty());

        table.record_forward(a);
        table.record_loss(a, 3);

        let all = table.snapshot_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&a].times_forwarded, 1);
        assert_eq!(all[&a].lost_packets, 3);
        assert_eq!(all[&a].unresolved_packets(), 0);
    }
}
