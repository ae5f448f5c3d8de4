//! Direction classification.
//!
//! A connection is LOCAL when it never leaves the host, INCOMING when its
//! local port is one the host is listening on, OUTGOING otherwise. The
//! listening set is supplied per interval by the caller.

use crate::connection::ConnectionKey;
use crate::types::{ConnectionDirection, ConnectionType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One listening socket as reported alongside a probe frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListeningPort {
    #[serde(default)]
    pub netns: u32,
    #[serde(rename = "type")]
    pub conn_type: ConnectionType,
    pub port: u16,
}

/// Ports the host is listening on, valid for a single interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListeningPorts {
    ports: HashSet<ListeningPort>,
}

impl ListeningPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, netns: u32, conn_type: ConnectionType, port: u16) {
        self.ports.insert(ListeningPort {
            netns,
            conn_type,
            port,
        });
    }

    pub fn contains(&self, netns: u32, conn_type: ConnectionType, port: u16) -> bool {
        self.ports.contains(&ListeningPort {
            netns,
            conn_type,
            port,
        })
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl FromIterator<ListeningPort> for ListeningPorts {
    fn from_iter<I: IntoIterator<Item = ListeningPort>>(iter: I) -> Self {
        Self {
            ports: iter.into_iter().collect(),
        }
    }
}

/// Both endpoints are on this host. A single record lives in one namespace,
/// so loopback on both sides implies the same namespace.
fn is_host_local(key: &ConnectionKey) -> bool {
    (key.source.is_loopback() && key.dest.is_loopback()) || key.source == key.dest
}

/// Classifies `key`.
///
/// Returns `None` for non-local traffic when `listening` is unavailable: the
/// direction is then unknown and no default is assumed. An empty but present
/// set is a valid observation and yields OUTGOING.
pub fn classify(
    key: &ConnectionKey,
    listening: Option<&ListeningPorts>,
) -> Option<ConnectionDirection> {
    if is_host_local(key) {
        return Some(ConnectionDirection::Local);
    }

    let listening = listening?;
    if listening.contains(key.netns, key.conn_type, key.sport) {
        Some(ConnectionDirection::Incoming)
    } else {
        Some(ConnectionDirection::Outgoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::types::ConnectionFamily;

    fn key(source: Address, sport: u16, dest: Address, dport: u16) -> ConnectionKey {
        ConnectionKey {
            pid: 1,
            netns: 10,
            sport,
            dport,
            source,
            dest,
            family: ConnectionFamily::AfInet,
            conn_type: ConnectionType::Tcp,
        }
    }

    #[test]
    fn test_loopback_pair_is_local() {
        let k = key(Address::v4(127, 0, 0, 1), 40000, Address::v4(127, 0, 0, 1), 6379);
        assert_eq!(classify(&k, None), Some(ConnectionDirection::Local));
        assert_eq!(
            classify(&k, Some(&ListeningPorts::new())),
            Some(ConnectionDirection::Local)
        );
    }

    #[test]
    fn test_same_host_address_is_local() {
        let k = key(Address::v4(10, 0, 0, 5), 40000, Address::v4(10, 0, 0, 5), 8080);
        assert_eq!(classify(&k, None), Some(ConnectionDirection::Local));
    }

    #[test]
    fn test_listening_port_is_incoming() {
        let mut ports = ListeningPorts::new();
        ports.insert(10, ConnectionType::Tcp, 8080);

        let k = key(Address::v4(10, 0, 0, 5), 8080, Address::v4(192, 168, 1, 9), 51000);
        assert_eq!(classify(&k, Some(&ports)), Some(ConnectionDirection::Incoming));
    }

    #[test]
    fn test_listening_match_respects_namespace_and_transport() {
        let mut ports = ListeningPorts::new();
        ports.insert(99, ConnectionType::Tcp, 8080);
        ports.insert(10, ConnectionType::Udp, 8080);

        let k = key(Address::v4(10, 0, 0, 5), 8080, Address::v4(192, 168, 1, 9), 51000);
        assert_eq!(classify(&k, Some(&ports)), Some(ConnectionDirection::Outgoing));
    }

    #[test]
    fn test_empty_set_is_outgoing_missing_set_is_unclassified() {
        let k = key(Address::v4(10, 0, 0, 1), 5000, Address::v4(93, 184, 216, 34), 443);
        assert_eq!(
            classify(&k, Some(&ListeningPorts::new())),
            Some(ConnectionDirection::Outgoing)
        );
        assert_eq!(classify(&k, None), None);
    }

    #[test]
    fn test_from_iterator() {
        let ports: ListeningPorts = vec![
            ListeningPort { netns: 0, conn_type: ConnectionType::Tcp, port: 22 },
            ListeningPort { netns: 0, conn_type: ConnectionType::Tcp, port: 22 },
        ]
        .into_iter()
        .collect();
        assert_eq!(ports.len(), 1);
        assert!(ports.contains(0, ConnectionType::Tcp, 22));
    }
}
