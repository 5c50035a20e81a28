use crate::classifier::FlowId;
use crate::observer::step::{MonitorStep, MonitorStepKind};
use crate::stats::PacketStats;
use crate::tracker::PacketId;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Per-flow counters rebuilt from a replay log
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayedFlowStats {
    pub tx: PacketStats,
    pub rx: PacketStats,
    pub lost: PacketStats,
    pub in_flight: u64,
}

pub struct VerifiedReplay {
    pub stats_by_flow: BTreeMap<FlowId, ReplayedFlowStats>,
    /// Events the monitor dropped because they violated the tracking rules
    pub rejected_events: Vec<String>,
    /// Packets still in flight at the end of the log
    pub unresolved_packets: usize,
    /// Whether the log ends with a terminal sweep
    pub drained: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidReplay {
    #[error("packet `{packet_id}` of flow {flow_id} was transmitted twice while in flight")]
    PacketAlreadyInFlight { flow_id: FlowId, packet_id: PacketId },
    #[error("packet `{packet_id}` of flow {flow_id} was received, but it was not in flight")]
    ReceivedPacketNotInFlight { flow_id: FlowId, packet_id: PacketId },
    #[error("packet `{packet_id}` of flow {flow_id} was declared lost, but it was not in flight")]
    LostPacketNotInFlight { flow_id: FlowId, packet_id: PacketId },
    #[error(
        "a sweep reported {reported} packets still in flight, but according to the log there were {actual}"
    )]
    InFlightMismatch { reported: usize, actual: usize },
    #[error("{count} packets are still in flight after the terminal sweep")]
    UnresolvedAfterTerminalSweep { count: usize },
}

/// Replays a recorded log and checks that every packet was resolved at most once
///
/// Steps are replayed in the order they were recorded, which is the order in which the monitor
/// processed them. Timestamps may go back when several timelines feed the same monitor.
pub struct ReplayVerifier {
    steps: Vec<MonitorStep>,
    in_flight: HashMap<(FlowId, PacketId), u64>,
    flows: BTreeMap<FlowId, ReplayedFlowStats>,
}

impl ReplayVerifier {
    pub fn new(steps: Vec<MonitorStep>) -> Self {
        Self {
            steps,
            in_flight: HashMap::new(),
            flows: BTreeMap::new(),
        }
    }

    pub fn verify(mut self) -> Result<VerifiedReplay, InvalidReplay> {
        let steps = std::mem::take(&mut self.steps);
        let mut rejected_events = Vec::new();
        let mut drained = false;

        for step in steps {
            match step.kind {
                MonitorStepKind::PacketTransmitted(s) => {
                    let key = (s.flow_id, s.packet_id);
                    if self.in_flight.insert(key, s.packet_size_bytes).is_some() {
                        return Err(InvalidReplay::PacketAlreadyInFlight {
                            flow_id: s.flow_id,
                            packet_id: s.packet_id,
                        });
                    }

                    let flow = self.flows.entry(s.flow_id).or_default();
                    flow.tx.track_one(s.packet_size_bytes);
                    flow.in_flight += 1;
                    drained = false;
                }
                MonitorStepKind::PacketReceived(s) => {
                    if self.in_flight.remove(&(s.flow_id, s.packet_id)).is_none() {
                        return Err(InvalidReplay::ReceivedPacketNotInFlight {
                            flow_id: s.flow_id,
                            packet_id: s.packet_id,
                        });
                    }

                    let flow = self.flows.entry(s.flow_id).or_default();
                    flow.rx.track_one(s.packet_size_bytes);
                    flow.in_flight -= 1;
                }
                MonitorStepKind::PacketLost(s) => {
                    if self.in_flight.remove(&(s.flow_id, s.packet_id)).is_none() {
                        return Err(InvalidReplay::LostPacketNotInFlight {
                            flow_id: s.flow_id,
                            packet_id: s.packet_id,
                        });
                    }

                    let flow = self.flows.entry(s.flow_id).or_default();
                    flow.lost.track_one(s.packet_size_bytes);
                    flow.in_flight -= 1;
                }
                MonitorStepKind::Sweep(s) => {
                    if s.still_in_flight != self.in_flight.len() {
                        return Err(InvalidReplay::InFlightMismatch {
                            reported: s.still_in_flight,
                            actual: self.in_flight.len(),
                        });
                    }

                    if s.terminal {
                        if !self.in_flight.is_empty() {
                            return Err(InvalidReplay::UnresolvedAfterTerminalSweep {
                                count: self.in_flight.len(),
                            });
                        }
                        drained = true;
                    }
                }
                MonitorStepKind::EventRejected(s) => rejected_events.push(s.reason),
                MonitorStepKind::PacketObserved(_) => {}
            }
        }

        Ok(VerifiedReplay {
            stats_by_flow: self.flows,
            rejected_events,
            unresolved_packets: self.in_flight.len(),
            drained,
        })
    }
}
