//! The flow monitor
//!
//! Ties together the classifier, the packet tracker, the sweep schedule and the per-flow
//! statistics. One monitor is created per simulation run and fed with the run's events.

use crate::classifier::{FlowClassifier, FlowId, FlowKey};
use crate::config::{ConfigError, MonitorConfig};
use crate::event::{MonitorEvent, MonitorEventPayload};
use crate::observer::FlowObserver;
use crate::report::FlowReport;
use crate::stats::{FlowStats, FlowStatsTable};
use crate::sweep::{Boundary, SweepSchedule, SweepState};
use crate::tracker::{LostPacket, PacketId, PacketTracker, TrackerError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("packet `{packet_id}` of flow {flow_id} was transmitted while still in flight")]
    DuplicateKey { flow_id: FlowId, packet_id: PacketId },
    #[error("packet `{packet_id}` of flow {flow_id} was received, but it is not in flight")]
    UnknownPacket { flow_id: FlowId, packet_id: PacketId },
}

impl From<TrackerError> for MonitorError {
    fn from(error: TrackerError) -> Self {
        match error {
            TrackerError::DuplicateKey { flow_id, packet_id } => {
                MonitorError::DuplicateKey { flow_id, packet_id }
            }
            TrackerError::UnknownPacket { flow_id, packet_id } => {
                MonitorError::UnknownPacket { flow_id, packet_id }
            }
        }
    }
}

/// Cheaply cloneable handle to a flow monitor
///
/// All clones share the same state. Mutations are serialized by a single lock, so the monitor can
/// be fed from several workers, each with its own timeline. Events only need to be in time order
/// per packet: a worker lagging behind the others is not an error. The periodic sweep follows the
/// latest timestamp seen from any worker.
#[derive(Clone)]
pub struct FlowMonitor {
    classifier: Arc<FlowClassifier>,
    inner: Arc<Mutex<MonitorInner>>,
}

struct MonitorInner {
    config: MonitorConfig,
    tracker: PacketTracker,
    stats: FlowStatsTable,
    schedule: SweepSchedule,
    /// Latest timestamp seen, across all timelines
    clock: Duration,
    observers: Vec<Arc<dyn FlowObserver>>,
}

impl FlowMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self, ConfigError> {
        Self::with_observers(config, Vec::new())
    }

    pub fn with_observers(
        config: MonitorConfig,
        observers: Vec<Arc<dyn FlowObserver>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let inner = MonitorInner {
            tracker: PacketTracker::new(),
            stats: FlowStatsTable::new(&config),
            schedule: SweepSchedule::new(config.sweep_interval),
            clock: Duration::ZERO,
            observers,
            config,
        };

        Ok(Self {
            classifier: Arc::new(FlowClassifier::new()),
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    pub fn config(&self) -> MonitorConfig {
        self.inner.lock().config.clone()
    }

    pub fn classifier(&self) -> &FlowClassifier {
        &self.classifier
    }

    /// Arms the periodic sweep, which will first run one interval after `now`
    pub fn start(&self, now: Duration) {
        let mut inner = self.inner.lock();
        inner.clock = inner.clock.max(now);
        inner.schedule.start(now);
    }

    /// Disarms the periodic sweep
    ///
    /// Statistics are kept, and packets still in flight stay tracked until
    /// [`FlowMonitor::terminal_sweep`] is called.
    pub fn stop(&self) {
        self.inner.lock().schedule.stop();
    }

    pub fn sweep_state(&self) -> SweepState {
        self.inner.lock().schedule.state()
    }

    /// Latest timestamp seen so far
    pub fn clock(&self) -> Duration {
        self.inner.lock().clock
    }

    pub fn transmit(
        &self,
        key: FlowKey,
        packet_id: PacketId,
        size_bytes: u64,
        now: Duration,
    ) -> Result<FlowId, MonitorError> {
        let mut inner = self.inner.lock();
        inner.advance(now, Boundary::Exclusive);

        let flow_id = self.classifier.classify(key);
        inner
            .transmit(flow_id, packet_id, size_bytes, now)
            .inspect_err(|e| inner.reject(now, e))?;

        Ok(flow_id)
    }

    /// Records an intermediate sighting of a packet, returning whether it was in flight
    pub fn observe(&self, key: FlowKey, packet_id: PacketId, now: Duration) -> bool {
        let mut inner = self.inner.lock();
        inner.advance(now, Boundary::Exclusive);

        // A packet of a flow that was never transmitted cannot be tracked
        match self.classifier.lookup(&key) {
            Some(flow_id) => inner.observe(flow_id, packet_id, now),
            None => false,
        }
    }

    /// Resolves a packet as received and returns its end-to-end delay
    ///
    /// A receive timestamped before the packet's transmission yields a zero delay.
    pub fn receive(
        &self,
        key: FlowKey,
        packet_id: PacketId,
        size_bytes: u64,
        now: Duration,
    ) -> Result<Duration, MonitorError> {
        let mut inner = self.inner.lock();
        inner.advance(now, Boundary::Exclusive);

        let flow_id = self.classifier.classify(key);
        let result = inner.receive(flow_id, packet_id, size_bytes, now);
        result.inspect_err(|e| inner.reject(now, e))
    }

    /// Advances the monitor's clock, running the periodic sweep if it is due
    pub fn tick(&self, now: Duration) -> Vec<LostPacket> {
        self.inner.lock().advance(now, Boundary::Inclusive)
    }

    /// Runs an on-demand sweep at `now` with the configured maximum delay
    pub fn sweep(&self, now: Duration) -> Vec<LostPacket> {
        let mut inner = self.inner.lock();
        let mut lost = inner.advance(now, Boundary::Inclusive);
        let max_delay = inner.config.max_delay;
        lost.extend(inner.sweep(now, max_delay, false));
        lost
    }

    /// Declares every packet still in flight as lost
    ///
    /// Must be called once at the end of a run for the loss counts to be complete: afterwards,
    /// `tx == rx + lost` holds for every flow. The sweep is timestamped with the later of `now`
    /// and the monitor's clock.
    pub fn terminal_sweep(&self, now: Duration) -> Vec<LostPacket> {
        let mut inner = self.inner.lock();
        let mut lost = inner.advance(now, Boundary::Inclusive);
        let end = inner.clock;
        lost.extend(inner.sweep(end, Duration::ZERO, true));
        lost
    }

    /// Feeds a single event to the monitor
    pub fn process(&self, event: &MonitorEvent) -> Result<(), MonitorError> {
        let now = event.relative_time;
        match &event.payload {
            MonitorEventPayload::Transmit {
                key,
                packet_id,
                size_bytes,
            } => self.transmit(*key, *packet_id, *size_bytes, now).map(|_| ()),
            MonitorEventPayload::Observe { key, packet_id } => {
                self.observe(*key, *packet_id, now);
                Ok(())
            }
            MonitorEventPayload::Receive {
                key,
                packet_id,
                size_bytes,
            } => self.receive(*key, *packet_id, *size_bytes, now).map(|_| ()),
            MonitorEventPayload::Tick => {
                self.tick(now);
                Ok(())
            }
        }
    }

    pub fn snapshot(&self, flow_id: FlowId) -> Option<FlowStats> {
        self.inner.lock().stats.snapshot(flow_id)
    }

    pub fn snapshot_all(&self) -> BTreeMap<FlowId, FlowStats> {
        self.inner.lock().stats.snapshot_all()
    }

    /// Number of packets currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.lock().tracker.len()
    }

    pub fn is_in_flight(&self, flow_id: FlowId, packet_id: PacketId) -> bool {
        self.inner.lock().tracker.contains(flow_id, packet_id)
    }

    pub fn report(&self, include_histograms: bool) -> FlowReport {
        FlowReport::new(&self.snapshot_all(), &self.classifier, include_histograms)
    }
}

impl MonitorInner {
    /// Moves the clock forward to `now` (it never goes back) and runs the periodic sweep if due
    fn advance(&mut self, now: Duration, boundary: Boundary) -> Vec<LostPacket> {
        self.clock = self.clock.max(now);

        match self.schedule.poll_due(self.clock, boundary) {
            Some(sweep_at) => {
                let max_delay = self.config.max_delay;
                self.sweep(sweep_at, max_delay, false)
            }
            None => Vec::new(),
        }
    }

    fn transmit(
        &mut self,
        flow_id: FlowId,
        packet_id: PacketId,
        size_bytes: u64,
        now: Duration,
    ) -> Result<(), MonitorError> {
        self.tracker.on_transmit(flow_id, packet_id, size_bytes, now)?;
        self.stats.record_tx(flow_id, size_bytes, now);

        for observer in &self.observers {
            observer.packet_transmitted(now, flow_id, packet_id, size_bytes);
        }

        Ok(())
    }

    fn observe(&mut self, flow_id: FlowId, packet_id: PacketId, now: Duration) -> bool {
        let tracked = self.tracker.on_observe(flow_id, packet_id, now);
        if tracked {
            self.stats.record_forward(flow_id);
        }

        for observer in &self.observers {
            observer.packet_observed(now, flow_id, packet_id, tracked);
        }

        tracked
    }

    fn receive(
        &mut self,
        flow_id: FlowId,
        packet_id: PacketId,
        size_bytes: u64,
        now: Duration,
    ) -> Result<Duration, MonitorError> {
        let delay = self.tracker.on_receive(flow_id, packet_id, now)?;
        self.stats.record_rx(flow_id, size_bytes, delay, now);

        for observer in &self.observers {
            observer.packet_received(now, flow_id, packet_id, size_bytes, delay);
        }

        Ok(delay)
    }

    fn sweep(&mut self, now: Duration, max_delay: Duration, terminal: bool) -> Vec<LostPacket> {
        let lost = self.tracker.sweep(now, max_delay);
        for packet in &lost {
            self.stats.record_loss(packet.flow_id, 1);
            for observer in &self.observers {
                observer.packet_lost(now, packet.flow_id, packet.packet_id, packet.size_bytes);
            }
        }

        let still_in_flight = self.tracker.len();
        tracing::debug!(
            time = now.as_secs_f64(),
            lost = lost.len(),
            still_in_flight,
            terminal,
            "loss sweep finished"
        );
        for observer in &self.observers {
            observer.swept(now, lost.len(), still_in_flight, terminal);
        }

        lost
    }

    fn reject(&self, now: Duration, error: &MonitorError) {
        match error {
            MonitorError::DuplicateKey { .. } => {
                tracing::error!(time = now.as_secs_f64(), "dropping event: {error}")
            }
            MonitorError::UnknownPacket { .. } => {
                tracing::warn!(time = now.as_secs_f64(), "dropping event: {error}")
            }
        }

        for observer in &self.observers {
            observer.event_rejected(now, error);
        }
    }
}
