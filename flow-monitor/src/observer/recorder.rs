use crate::classifier::FlowId;
use crate::monitor::MonitorError;
use crate::observer::FlowObserver;
use crate::observer::step::{
    MonitorStep, MonitorStepKind, PacketObserved, PacketReceived, PacketStep, RejectedEvent,
    SweepStep,
};
use crate::observer::verifier::ReplayVerifier;
use crate::tracker::PacketId;
use parking_lot::Mutex;
use std::time::Duration;

/// Records every monitor event as a [`MonitorStep`], to be stored as a replay log
#[derive(Default)]
pub struct StepRecorder {
    recorded_steps: Mutex<Vec<MonitorStep>>,
}

impl StepRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<MonitorStep> {
        self.recorded_steps.lock().clone()
    }

    pub fn verifier(&self) -> ReplayVerifier {
        ReplayVerifier::new(self.steps())
    }

    fn record(&self, relative_time: Duration, kind: MonitorStepKind) {
        self.recorded_steps
            .lock()
            .push(MonitorStep { relative_time, kind });
    }
}

impl FlowObserver for StepRecorder {
    fn packet_transmitted(&self, now: Duration, flow_id: FlowId, packet_id: PacketId, size_bytes: u64) {
        self.record(
            now,
            MonitorStepKind::PacketTransmitted(PacketStep {
                flow_id,
                packet_id,
                packet_size_bytes: size_bytes,
            }),
        );
    }

    fn packet_observed(&self, now: Duration, flow_id: FlowId, packet_id: PacketId, tracked: bool) {
        self.record(
            now,
            MonitorStepKind::PacketObserved(PacketObserved {
                flow_id,
                packet_id,
                tracked,
            }),
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
        self.record(
            now,
            MonitorStepKind::PacketReceived(PacketReceived {
                flow_id,
                packet_id,
                packet_size_bytes: size_bytes,
                delay,
            }),
        );
    }

    fn packet_lost(&self, now: Duration, flow_id: FlowId, packet_id: PacketId, size_bytes: u64) {
        self.record(
            now,
            MonitorStepKind::PacketLost(PacketStep {
                flow_id,
                packet_id,
                packet_size_bytes: size_bytes,
            }),
        );
    }

    fn swept(&self, now: Duration, lost_packets: usize, still_in_flight: usize, terminal: bool) {
        self.record(
            now,
            MonitorStepKind::Sweep(SweepStep {
                lost_packets,
                still_in_flight,
                terminal,
            }),
        );
    }

    fn event_rejected(&self, now: Duration, error: &MonitorError) {
        self.record(
            now,
            MonitorStepKind::EventRejected(RejectedEvent {
                reason: error.to_string(),
            }),
        );
    }
}
