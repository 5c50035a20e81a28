use crate::config::cli::SyntheticOpt;
use anyhow::bail;
use fastrand::Rng;
use flow_monitor::event::{MonitorEvent, MonitorEventPayload, MonitorEvents};
use flow_monitor::{FlowKey, IpProtocol, PacketId};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

const FIRST_SOURCE_PORT: u16 = 49153;
const DESTINATION_PORT: u16 = 9;

/// Generates the packet events of a constant bit rate run
///
/// Every flow sends `packets` packets, one each `interval`, starting with a 1 ms offset per flow.
/// Delivered packets are observed at each hop and then received after `base_delay` plus a random
/// jitter. Lost packets are never seen again.
pub fn generate(opt: &SyntheticOpt) -> anyhow::Result<MonitorEvents> {
    if !(0.0..=1.0).contains(&opt.loss_ratio) {
        bail!("the loss ratio must be between 0 and 1 (got {})", opt.loss_ratio);
    }
    if opt.flows == 0 || opt.flows > u16::MAX - FIRST_SOURCE_PORT {
        bail!("the number of flows must be between 1 and {}", u16::MAX - FIRST_SOURCE_PORT);
    }

    let mut rng = Rng::with_seed(opt.seed);
    let base_delay = Duration::from_millis(opt.base_delay_ms);

    let mut events = Vec::new();
    for flow in 0..opt.flows {
        let key = flow_key(flow);
        let flow_start = Duration::from_millis(u64::from(flow));

        for packet_nr in 0..opt.packets {
            let packet_id = PacketId(packet_nr);
            let sent = flow_start + Duration::from_millis(opt.interval_ms.saturating_mul(packet_nr));
            events.push(MonitorEvent {
                relative_time: sent,
                payload: MonitorEventPayload::Transmit {
                    key,
                    packet_id,
                    size_bytes: opt.packet_size,
                },
            });

            if rng.f64() < opt.loss_ratio {
                continue;
            }

            let delay = base_delay + Duration::from_millis(rng.u64(0..=opt.jitter_ms));
            let segments = u32::from(opt.hops) + 1;
            for hop in 1..segments {
                events.push(MonitorEvent {
                    relative_time: sent + delay * hop / segments,
                    payload: MonitorEventPayload::Observe { key, packet_id },
                });
            }

            events.push(MonitorEvent {
                relative_time: sent + delay,
                payload: MonitorEventPayload::Receive {
                    key,
                    packet_id,
                    size_bytes: opt.packet_size,
                },
            });
        }
    }

    Ok(MonitorEvents::new(events))
}

fn flow_key(flow: u16) -> FlowKey {
    let source = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        FIRST_SOURCE_PORT + flow,
    );
    let destination = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1)), DESTINATION_PORT);
    FlowKey::new(IpProtocol::UDP, source, destination)
}

#[cfg(test)]
mod test {
    use super::*;

    fn opt() -> SyntheticOpt {
        SyntheticOpt {
            flows: 2,
            packets: 50,
            interval_ms: 10,
            packet_size: 1000,
            base_delay_ms: 30,
            jitter_ms: 5,
            loss_ratio: 0.0,
            hops: 2,
            seed: 42,
        }
    }

    fn count(events: &MonitorEvents, f: impl Fn(&MonitorEventPayload) -> bool) -> usize {
        events.iter().filter(|e| f(&e.payload)).count()
    }

    #[test]
    fn test_lossless_run_receives_every_packet() {
        let events = generate(&opt()).unwrap();

        let transmits = count(&events, |p| matches!(p, MonitorEventPayload::Transmit { .. }));
        let observations = count(&events, |p| matches!(p, MonitorEventPayload::Observe { .. }));
        let receives = count(&events, |p| matches!(p, MonitorEventPayload::Receive { .. }));
        assert_eq!(transmits, 100);
        assert_eq!(observations, 200);
        assert_eq!(receives, 100);

        let times: Vec<_> = events.iter().map(|e| e.relative_time).collect();
        assert!(times.is_sorted());
    }

    #[test]
    fn test_same_seed_yields_same_events() {
        let opt = SyntheticOpt {
            loss_ratio: 0.3,
            ..opt()
        };

        let first: Vec<_> = generate(&opt).unwrap().into_iter().collect();
        let second: Vec<_> = generate(&opt).unwrap().into_iter().collect();
        assert_eq!(first, second);

        let receives = first
            .iter()
            .filter(|e| matches!(e.payload, MonitorEventPayload::Receive { .. }))
            .count();
        assert!(receives < 100);
    }

    #[test]
    fn test_invalid_loss_ratio_is_rejected() {
        let opt = SyntheticOpt {
            loss_ratio: 1.5,
            ..opt()
        };
        assert!(generate(&opt).is_err());
    }
}
