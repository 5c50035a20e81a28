use flow_monitor::event::{MonitorEvent, MonitorEventPayload};
use flow_monitor::{FlowKey, IpProtocol, PacketId};
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Deserialize, Clone)]
pub struct TraceJson {
    pub events: Vec<TraceEventJson>,
}

#[derive(Deserialize, Clone)]
pub struct TraceEventJson {
    relative_time_us: u64,
    #[serde(flatten)]
    payload: TraceEventPayloadJson,
}

#[derive(Deserialize, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
enum TraceEventPayloadJson {
    Transmit {
        flow: FlowJson,
        packet_id: u64,
        size_bytes: u64,
    },
    Observe {
        flow: FlowJson,
        packet_id: u64,
    },
    Receive {
        flow: FlowJson,
        packet_id: u64,
        size_bytes: u64,
    },
    Tick,
}

#[serde_as]
#[derive(Deserialize, Clone)]
struct FlowJson {
    #[serde_as(as = "DisplayFromStr")]
    protocol: IpProtocol,
    #[serde_as(as = "DisplayFromStr")]
    source: SocketAddr,
    #[serde_as(as = "DisplayFromStr")]
    destination: SocketAddr,
}

impl From<FlowJson> for FlowKey {
    fn from(json: FlowJson) -> Self {
        FlowKey::new(json.protocol, json.source, json.destination)
    }
}

impl From<TraceEventJson> for MonitorEvent {
    fn from(json: TraceEventJson) -> Self {
        let payload = match json.payload {
            TraceEventPayloadJson::Transmit {
                flow,
                packet_id,
                size_bytes,
            } => MonitorEventPayload::Transmit {
                key: flow.into(),
                packet_id: PacketId(packet_id),
                size_bytes,
            },
            TraceEventPayloadJson::Observe { flow, packet_id } => MonitorEventPayload::Observe {
                key: flow.into(),
                packet_id: PacketId(packet_id),
            },
            TraceEventPayloadJson::Receive {
                flow,
                packet_id,
                size_bytes,
            } => MonitorEventPayload::Receive {
                key: flow.into(),
                packet_id: PacketId(packet_id),
                size_bytes,
            },
            TraceEventPayloadJson::Tick => MonitorEventPayload::Tick,
        };

        MonitorEvent {
            relative_time: Duration::from_micros(json.relative_time_us),
            payload,
        }
    }
}
