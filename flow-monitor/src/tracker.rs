use crate::classifier::FlowId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;

/// Identifier of a packet, unique within its flow
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketId(pub u64);

impl Display for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("packet `{packet_id}` of flow {flow_id} was transmitted while still in flight")]
    DuplicateKey { flow_id: FlowId, packet_id: PacketId },
    #[error("packet `{packet_id}` of flow {flow_id} is not in flight (never sent or already resolved)")]
    UnknownPacket { flow_id: FlowId, packet_id: PacketId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedPacket {
    pub size_bytes: u64,
    pub first_seen: Duration,
    pub last_seen: Duration,
}

/// A tracked packet that the sweep declared lost
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LostPacket {
    pub flow_id: FlowId,
    pub packet_id: PacketId,
    pub size_bytes: u64,
}

/// Packets that were transmitted but whose fate is still unknown
///
/// Entries are created on transmit and removed either on receive or by [`PacketTracker::sweep`],
/// never both.
#[derive(Default)]
pub struct PacketTracker {
    in_flight: HashMap<(FlowId, PacketId), TrackedPacket>,
}

impl PacketTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_transmit(
        &mut self,
        flow_id: FlowId,
        packet_id: PacketId,
        size_bytes: u64,
        now: Duration,
    ) -> Result<(), TrackerError> {
        let key = (flow_id, packet_id);
        if self.in_flight.contains_key(&key) {
            return Err(TrackerError::DuplicateKey { flow_id, packet_id });
        }

        self.in_flight.insert(
            key,
            TrackedPacket {
                size_bytes,
                first_seen: now,
                last_seen: now,
            },
        );

        Ok(())
    }

    /// Refreshes the last-seen time of a packet, returning whether it was in flight
    ///
    /// Observing an unknown or already resolved packet is expected in multi-hop topologies and
    /// does nothing.
    pub fn on_observe(&mut self, flow_id: FlowId, packet_id: PacketId, now: Duration) -> bool {
        match self.in_flight.get_mut(&(flow_id, packet_id)) {
            Some(packet) => {
                packet.last_seen = packet.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    /// Resolves an in-flight packet and returns its end-to-end delay
    ///
    /// A receive time before the transmit time (clock skew) yields a zero delay.
    pub fn on_receive(
        &mut self,
        flow_id: FlowId,
        packet_id: PacketId,
        now: Duration,
    ) -> Result<Duration, TrackerError> {
        let packet = self
            .in_flight
            .remove(&(flow_id, packet_id))
            .ok_or(TrackerError::UnknownPacket { flow_id, packet_id })?;

        Ok(now.saturating_sub(packet.first_seen))
    }

    /// Removes and returns every packet that has not been seen for at least `max_delay`
    ///
    /// The threshold is inclusive: a packet last seen exactly `max_delay` ago is lost. The result is
    /// ordered by flow and packet id.
    pub fn sweep(&mut self, now: Duration, max_delay: Duration) -> Vec<LostPacket> {
        let mut lost = Vec::new();
        self.in_flight.retain(|&(flow_id, packet_id), packet| {
            if now.saturating_sub(packet.last_seen) >= max_delay {
                lost.push(LostPacket {
                    flow_id,
                    packet_id,
                    size_bytes: packet.size_bytes,
                });
                false
            } else {
                true
            }
        });

        lost.sort_by_key(|packet| (packet.flow_id, packet.packet_id));
        lost
    }

    pub fn get(&self, flow_id: FlowId, packet_id: PacketId) -> Option<&TrackedPacket> {
        self.in_flight.get(&(flow_id, packet_id))
    }

    pub fn contains(&self, flow_id: FlowId, packet_id: PacketId) -> bool {
        self.in_flight.contains_key(&(flow_id, packet_id))
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classifier::{FlowClassifier, FlowKey, IpProtocol};
    use fastrand::Rng;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn flow(classifier: &FlowClassifier, source_port: u16) -> FlowId {
        classifier.classify(FlowKey::new(
            IpProtocol::UDP,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), source_port),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(88, 88, 88, 88)), 9),
        ))
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_receive_returns_delay_and_resolves_packet() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let mut tracker = PacketTracker::new();

        tracker.on_transmit(a, PacketId(1), 1000, secs(0.0)).unwrap();
        let delay = tracker.on_receive(a, PacketId(1), secs(0.030)).unwrap();

        assert_eq!(delay, secs(0.030));
        assert!(tracker.is_empty());
        assert_eq!(
            tracker.on_receive(a, PacketId(1), secs(0.040)),
            Err(TrackerError::UnknownPacket {
                flow_id: a,
                packet_id: PacketId(1)
            })
        );
    }

    #[test]
    fn test_transmit_of_in_flight_packet_is_rejected() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let mut tracker = PacketTracker::new();

        tracker.on_transmit(a, PacketId(7), 100, secs(0.0)).unwrap();
        let result = tracker.on_transmit(a, PacketId(7), 200, secs(1.0));

        assert_eq!(
            result,
            Err(TrackerError::DuplicateKey {
                flow_id: a,
                packet_id: PacketId(7)
            })
        );
        let packet = tracker.get(a, PacketId(7)).unwrap();
        assert_eq!(packet.size_bytes, 100);
        assert_eq!(packet.first_seen, secs(0.0));
    }

    #[test]
    fn test_same_packet_id_in_different_flows_is_independent() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let b = flow(&classifier, 1001);
        let mut tracker = PacketTracker::new();

        tracker.on_transmit(a, PacketId(1), 100, secs(0.0)).unwrap();
        tracker.on_transmit(b, PacketId(1), 100, secs(0.0)).unwrap();
        assert_eq!(tracker.len(), 2);

        tracker.on_receive(b, PacketId(1), secs(0.1)).unwrap();
        assert!(tracker.contains(a, PacketId(1)));
        assert!(!tracker.contains(b, PacketId(1)));
    }

    #[test]
    fn test_sweep_returns_lost_packets_in_id_order() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let b = flow(&classifier, 1001);
        let mut tracker = PacketTracker::new();

        for packet_nr in (0..50).rev() {
            tracker.on_transmit(b, PacketId(packet_nr), 100, secs(0.0)).unwrap();
            tracker.on_transmit(a, PacketId(packet_nr), 100, secs(0.0)).unwrap();
        }

        let lost: Vec<_> = tracker
            .sweep(secs(1.0), secs(0.5))
            .into_iter()
            .map(|p| (p.flow_id, p.packet_id.0))
            .collect();
        let expected: Vec<_> = [a, b]
            .into_iter()
            .flat_map(|flow_id| (0..50).map(move |packet_nr| (flow_id, packet_nr)))
            .collect();
        assert_eq!(lost, expected);
    }

    #[test]
    fn test_clock_skew_clamps_delay_to_zero() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let mut tracker = PacketTracker::new();

        tracker.on_transmit(a, PacketId(1), 100, secs(2.0)).unwrap();
        let delay = tracker.on_receive(a, PacketId(1), secs(1.5)).unwrap();
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_observe_unknown_packet_is_a_no_op() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let mut tracker = PacketTracker::new();

        assert!(!tracker.on_observe(a, PacketId(3), secs(1.0)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_sweep_threshold_is_inclusive() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let mut tracker = PacketTracker::new();
        let max_delay = Duration::from_millis(500);

        tracker.on_transmit(a, PacketId(1), 100, Duration::from_millis(1000)).unwrap();
        tracker.on_transmit(a, PacketId(2), 100, Duration::from_millis(1001)).unwrap();

        let lost = tracker.sweep(Duration::from_millis(1500), max_delay);
        assert_eq!(
            lost,
            vec![LostPacket {
                flow_id: a,
                packet_id: PacketId(1),
                size_bytes: 100
            }]
        );
        assert!(tracker.contains(a, PacketId(2)));
    }

    #[test]
    fn test_sweep_uses_last_seen_time() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let mut tracker = PacketTracker::new();
        let max_delay = secs(0.5);

        tracker.on_transmit(a, PacketId(2), 100, secs(1.0)).unwrap();
        assert!(tracker.on_observe(a, PacketId(2), secs(1.4)));

        assert!(tracker.sweep(secs(1.6), max_delay).is_empty());
        assert_eq!(tracker.sweep(secs(2.0), max_delay).len(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_second_sweep_without_transmits_is_empty() {
        let classifier = FlowClassifier::new();
        let a = flow(&classifier, 1000);
        let mut tracker = PacketTracker::new();

        for id in 0..10 {
            tracker.on_transmit(a, PacketId(id), 100, secs(0.0)).unwrap();
        }

        assert_eq!(tracker.sweep(secs(10.0), secs(1.0)).len(), 10);
        assert!(tracker.sweep(secs(10.0), secs(1.0)).is_empty());
        assert!(tracker.sweep(secs(20.0), secs(1.0)).is_empty());
    }

    #[test]
    fn test_every_packet_is_resolved_exactly_once_in_any_order() {
        let classifier = FlowClassifier::new();
        let flows: Vec<_> = (0..5).map(|port| flow(&classifier, port)).collect();
        let mut tracker = PacketTracker::new();
        let mut rng = Rng::with_seed(42);

        let mut packets = Vec::new();
        for (i, flow_id) in flows.iter().enumerate() {
            for id in 0..200 {
                let sent_at = Duration::from_millis(i as u64 * 10 + id);
                tracker.on_transmit(*flow_id, PacketId(id), 1200, sent_at).unwrap();
                packets.push((*flow_id, PacketId(id)));
            }
        }
        rng.shuffle(&mut packets);

        let (received, remaining) = packets.split_at(packets.len() / 2);
        for &(flow_id, packet_id) in received {
            tracker.on_receive(flow_id, packet_id, secs(5.0)).unwrap();
        }

        let mut lost: Vec<_> = tracker
            .sweep(secs(100.0), secs(1.0))
            .into_iter()
            .map(|p| (p.flow_id, p.packet_id))
            .collect();
        let mut expected = remaining.to_vec();
        lost.sort();
        expected.sort();

        assert_eq!(lost, expected);
        assert!(tracker.is_empty());
    }
}
