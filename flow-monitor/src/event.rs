use crate::classifier::FlowKey;
use crate::tracker::PacketId;
use std::time::Duration;

/// A batch of monitor events, ordered by time
pub struct MonitorEvents {
    pub(crate) sorted_events: Vec<MonitorEvent>,
}

impl MonitorEvents {
    pub fn new(mut events: Vec<MonitorEvent>) -> Self {
        // Stable sort: events sharing a timestamp keep the order in which they were produced
        events.sort_by_key(|e| e.relative_time);
        Self {
            sorted_events: events,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitorEvent> {
        self.sorted_events.iter()
    }

    pub fn len(&self) -> usize {
        self.sorted_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_events.is_empty()
    }

    /// Time of the last event, if any
    pub fn end_time(&self) -> Option<Duration> {
        self.sorted_events.last().map(|e| e.relative_time)
    }
}

impl IntoIterator for MonitorEvents {
    type Item = MonitorEvent;
    type IntoIter = std::vec::IntoIter<MonitorEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.sorted_events.into_iter()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorEvent {
    pub relative_time: Duration,
    pub payload: MonitorEventPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MonitorEventPayload {
    /// A packet left its source
    Transmit {
        key: FlowKey,
        packet_id: PacketId,
        size_bytes: u64,
    },
    /// A packet was seen at an intermediate hop
    Observe { key: FlowKey, packet_id: PacketId },
    /// A packet reached its destination
    Receive {
        key: FlowKey,
        packet_id: PacketId,
        size_bytes: u64,
    },
    /// Periodic trigger for the loss sweep
    Tick,
}
