//! Flow classification
//!
//! Maps addressing 5-tuples to stable, sequentially assigned flow ids

use anyhow::{Context, bail};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Identifier of a flow, unique for the lifetime of a [`FlowClassifier`]
///
/// Ids are handed out in first-seen order, starting at 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(u64);

impl FlowId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for FlowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The IP protocol number carried in a [`FlowKey`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpProtocol(pub u8);

impl IpProtocol {
    pub const ICMP: IpProtocol = IpProtocol(1);
    pub const TCP: IpProtocol = IpProtocol(6);
    pub const UDP: IpProtocol = IpProtocol(17);
}

impl Display for IpProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            IpProtocol::ICMP => write!(f, "icmp"),
            IpProtocol::TCP => write!(f, "tcp"),
            IpProtocol::UDP => write!(f, "udp"),
            IpProtocol(other) => write!(f, "{other}"),
        }
    }
}

impl FromStr for IpProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty protocol");
        }

        let protocol = match s.to_ascii_lowercase().as_str() {
            "icmp" => IpProtocol::ICMP,
            "tcp" => IpProtocol::TCP,
            "udp" => IpProtocol::UDP,
            number => IpProtocol(
                number
                    .parse()
                    .context("protocol must be `tcp`, `udp`, `icmp` or a protocol number")?,
            ),
        };

        Ok(protocol)
    }
}

/// The addressing 5-tuple that identifies a flow
///
/// Keys are direction sensitive: `a -> b` and `b -> a` are different flows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub protocol: IpProtocol,
    pub source_address: IpAddr,
    pub destination_address: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
}

impl FlowKey {
    pub fn new(protocol: IpProtocol, source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            protocol,
            source_address: source.ip(),
            destination_address: destination.ip(),
            source_port: source.port(),
            destination_port: destination.port(),
        }
    }

    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.source_address, self.source_port)
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.destination_address, self.destination_port)
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.protocol,
            self.source(),
            self.destination()
        )
    }
}

/// Lookup-or-insert table from [`FlowKey`] to [`FlowId`]
///
/// Keys are stored in an arena indexed by flow id, so reverse lookups are a plain index. The
/// table only grows. All methods take `&self` and may be called from several threads.
#[derive(Default)]
pub struct FlowClassifier {
    table: RwLock<FlowTable>,
}

#[derive(Default)]
struct FlowTable {
    /// Key of each flow, at index `flow_id - 1`
    keys: Vec<FlowKey>,
    ids: HashMap<FlowKey, FlowId>,
}

impl FlowClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of the flow `key` belongs to, assigning the next id if the key is new
    pub fn classify(&self, key: FlowKey) -> FlowId {
        if let Some(id) = self.table.read().ids.get(&key) {
            return *id;
        }

        // Another thread may have inserted the key between releasing the read lock and acquiring
        // the write lock, so look again
        let mut table = self.table.write();
        if let Some(id) = table.ids.get(&key) {
            return *id;
        }

        // The table would run out of memory long before exhausting the id space
        let id = FlowId(table.keys.len() as u64 + 1);
        table.keys.push(key);
        table.ids.insert(key, id);
        id
    }

    /// Returns the id of an already classified key, without assigning a new one
    pub fn lookup(&self, key: &FlowKey) -> Option<FlowId> {
        self.table.read().ids.get(key).copied()
    }

    pub fn find_flow(&self, id: FlowId) -> Option<FlowKey> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.table.read().keys.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.table.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All classified flows, in id order
    pub fn flows(&self) -> Vec<(FlowId, FlowKey)> {
        self.table
            .read()
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| (FlowId(index as u64 + 1), *key))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn key(source_port: u16, destination_port: u16) -> FlowKey {
        FlowKey::new(
            IpProtocol::UDP,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), source_port),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(88, 88, 88, 88)), destination_port),
        )
    }

    #[test]
    fn test_ids_are_assigned_in_first_seen_order() {
        let classifier = FlowClassifier::new();
        let a = classifier.classify(key(1000, 9));
        let b = classifier.classify(key(1001, 9));
        let a_again = classifier.classify(key(1000, 9));

        assert_eq!(a.as_u64(), 1);
        assert_eq!(b.as_u64(), 2);
        assert_eq!(a, a_again);
        assert_eq!(classifier.len(), 2);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let classifier = FlowClassifier::new();
        let ids: Vec<_> = (0..u16::MAX)
            .map(|port| classifier.classify(key(port, 9)))
            .collect();

        let distinct: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len());
        assert_eq!(ids.last().map(|id| id.as_u64()), Some(u64::from(u16::MAX)));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let later = classifier.classify(key(0, 10));
        assert!(!distinct.contains(&later));
        assert_eq!(later.as_u64(), u64::from(u16::MAX) + 1);
    }

    #[test]
    fn test_reverse_direction_is_a_different_flow() {
        let classifier = FlowClassifier::new();
        let forward = key(1000, 9);
        let reverse = FlowKey::new(forward.protocol, forward.destination(), forward.source());

        assert_ne!(classifier.classify(forward), classifier.classify(reverse));
    }

    #[test]
    fn test_find_flow_returns_the_original_key() {
        let classifier = FlowClassifier::new();
        let id = classifier.classify(key(5000, 80));

        assert_eq!(classifier.find_flow(id), Some(key(5000, 80)));
        assert_eq!(classifier.find_flow(FlowId(0)), None);
        assert_eq!(classifier.find_flow(FlowId(2)), None);
        assert_eq!(classifier.lookup(&key(5001, 80)), None);
    }

    #[test]
    fn test_concurrent_classification_assigns_each_key_once() {
        let classifier = Arc::new(FlowClassifier::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let classifier = classifier.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|port| classifier.classify(key(port, 9)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(classifier.len(), 100);
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }

        let flows = classifier.flows();
        for (id, key) in flows {
            assert_eq!(classifier.classify(key), id);
        }
    }

    #[test]
    fn test_parse_protocol() {
        assert_eq!("udp".parse::<IpProtocol>().unwrap(), IpProtocol::UDP);
        assert_eq!("TCP".parse::<IpProtocol>().unwrap(), IpProtocol::TCP);
        assert_eq!("132".parse::<IpProtocol>().unwrap(), IpProtocol(132));
        assert!("quic".parse::<IpProtocol>().is_err());
        assert!("".parse::<IpProtocol>().is_err());
        assert_eq!(IpProtocol(132).to_string(), "132");
    }
}
