//! Hooks to follow individual packet events without touching the statistics
//!
//! Observers are notified while the monitor holds its lock, so they must not call back into the
//! monitor.

pub mod recorder;
pub mod step;
pub mod verifier;

use crate::classifier::FlowId;
use crate::monitor::MonitorError;
use crate::tracker::PacketId;
use std::time::Duration;

pub trait FlowObserver: Send + Sync {
    fn packet_transmitted(
        &self,
        _now: Duration,
        _flow_id: FlowId,
        _packet_id: PacketId,
        _size_bytes: u64,
    ) {
    }

    fn packet_observed(&self, _now: Duration, _flow_id: FlowId, _packet_id: PacketId, _tracked: bool) {}

    fn packet_received(
        &self,
        _now: Duration,
        _flow_id: FlowId,
        _packet_id: PacketId,
        _size_bytes: u64,
        _delay: Duration,
    ) {
    }

    fn packet_lost(&self, _now: Duration, _flow_id: FlowId, _packet_id: PacketId, _size_bytes: u64) {}

    fn swept(&self, _now: Duration, _lost_packets: usize, _still_in_flight: usize, _terminal: bool) {}

    fn event_rejected(&self, _now: Duration, _error: &MonitorError) {}
}

/// Emits every packet event as a `tracing` event
pub struct LogObserver;

impl FlowObserver for LogObserver {
    fn packet_transmitted(&self, now: Duration, flow_id: FlowId, packet_id: PacketId, size_bytes: u64) {
        tracing::trace!(
            time = now.as_secs_f64(),
            %flow_id,
            %packet_id,
            size_bytes,
            "packet transmitted"
        );
    }

    fn packet_observed(&self, now: Duration, flow_id: FlowId, packet_id: PacketId, tracked: bool) {
        tracing::trace!(
            time = now.as_secs_f64(),
            %flow_id,
            %packet_id,
            tracked,
            "packet observed"
        );
    }

    fn packet_received(
        &self,
        now: Duration,
        flow_id: FlowId,
        packet_id: PacketId,
        size_bytes: u64,
        delay: Duration,
    ) {
        tracing::debug!(
            time = now.as_secs_f64(),
            %flow_id,
            %packet_id,
            size_bytes,
            delay = delay.as_secs_f64(),
            "packet received"
        );
    }

    fn packet_lost(&self, now: Duration, flow_id: FlowId, packet_id: PacketId, size_bytes: u64) {
        tracing::debug!(
            time = now.as_secs_f64(),
            %flow_id,
            %packet_id,
            size_bytes,
            "packet lost"
        );
    }

    fn swept(&self, now: Duration, lost_packets: usize, still_in_flight: usize, terminal: bool) {
        tracing::debug!(
            time = now.as_secs_f64(),
            lost_packets,
            still_in_flight,
            terminal,
            "loss sweep"
        );
    }
}
