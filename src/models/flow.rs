use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::models::packet::{ProtocolTag, TcpFlags, Timestamp};

/// Unordered address pair plus protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    /// The lower of the two addresses
    pub a: IpAddr,
    /// The higher of the two addresses
    pub b: IpAddr,
    pub protocol: ProtocolTag,
}

impl ConversationKey {
    /// Build a key that is the same whichever endpoint sent the packet
    pub fn new(x: IpAddr, y: IpAddr, protocol: ProtocolTag) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self { a, b, protocol }
    }

    /// Canonical string form, used for deterministic tie-breaking
    pub fn canonical(&self) -> String {
        format!("{}|{}|{}", self.a, self.b, self.protocol)
    }
}

/// Running totals for one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversationStats {
    pub packets: u64,
    pub bytes: u64,
}

impl ConversationStats {
    pub fn merge(&mut self, other: &ConversationStats) {
        self.packets += other.packets;
        self.bytes += other.bytes;
    }
}

/// Directional transport 5-tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub source: IpAddr,
    pub source_port: u16,
    pub destination: IpAddr,
    pub destination_port: u16,
    pub protocol: ProtocolTag,
}

impl FlowKey {
    pub fn canonical(&self) -> String {
        format!(
            "{}:{}>{}:{}/{}",
            self.source, self.source_port, self.destination, self.destination_port, self.protocol
        )
    }
}

/// Running totals for one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowStats {
    pub packets: u64,
    pub bytes: u64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    /// Union of TCP flags seen (always empty for UDP)
    pub flags: TcpFlags,
}

impl FlowStats {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            packets: 0,
            bytes: 0,
            first_seen: timestamp,
            last_seen: timestamp,
            flags: TcpFlags::default(),
        }
    }

    pub fn record(&mut self, timestamp: Timestamp, bytes: u64, flags: TcpFlags) {
        self.packets += 1;
        self.bytes += bytes;
        self.first_seen = self.first_seen.min(timestamp);
        self.last_seen = self.last_seen.max(timestamp);
        self.flags |= flags;
    }

    pub fn merge(&mut self, other: &FlowStats) {
        self.packets += other.packets;
        self.bytes += other.bytes;
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.flags |= other.flags;
    }
}

/// Rough TCP flow state derived from the flags seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    /// A RST was seen
    Reset,
    /// A FIN was seen
    Closed,
    /// A SYN was seen and the flow was not torn down
    Opened,
    /// No SYN/FIN/RST: the flow started before the capture did
    Midstream,
}

impl FlowState {
    pub fn classify(protocol: ProtocolTag, flags: TcpFlags) -> Option<FlowState> {
        if protocol != ProtocolTag::Tcp {
            return None;
        }
        let state = if flags.contains(TcpFlags::RST) {
            FlowState::Reset
        } else if flags.contains(TcpFlags::FIN) {
            FlowState::Closed
        } else if flags.contains(TcpFlags::SYN) {
            FlowState::Opened
        } else {
            FlowState::Midstream
        };
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_conversation_key_is_unordered() {
        let forward = ConversationKey::new(ip(1), ip(2), ProtocolTag::Tcp);
        let reverse = ConversationKey::new(ip(2), ip(1), ProtocolTag::Tcp);
        assert_eq!(forward, reverse);
        assert_eq!(forward.canonical(), "10.0.0.1|10.0.0.2|TCP");

        let udp = ConversationKey::new(ip(1), ip(2), ProtocolTag::Udp);
        assert_ne!(forward, udp);
    }

    #[test]
    fn test_flow_stats_record_and_merge() {
        let mut stats = FlowStats::new(Timestamp::from_parts(10, 0));
        stats.record(Timestamp::from_parts(10, 0), 60, TcpFlags::SYN);
        stats.record(Timestamp::from_parts(12, 0), 1500, TcpFlags::ACK);

        let mut earlier = FlowStats::new(Timestamp::from_parts(5, 0));
        earlier.record(Timestamp::from_parts(5, 0), 40, TcpFlags::FIN);

        stats.merge(&earlier);
        assert_eq!(stats.packets, 3);
        assert_eq!(stats.bytes, 1600);
        assert_eq!(stats.first_seen, Timestamp::from_parts(5, 0));
        assert_eq!(stats.last_seen, Timestamp::from_parts(12, 0));
        assert_eq!(stats.flags.names(), vec!["SYN", "ACK", "FIN"]);
    }

    #[test]
    fn test_flow_state_classification() {
        assert_eq!(FlowState::classify(ProtocolTag::Udp, TcpFlags::default()), None);
        assert_eq!(
            FlowState::classify(ProtocolTag::Tcp, TcpFlags::SYN | TcpFlags::RST),
            Some(FlowState::Reset)
        );
        assert_eq!(
            FlowState::classify(ProtocolTag::Tcp, TcpFlags::SYN | TcpFlags::FIN),
            Some(FlowState::Closed)
        );
        assert_eq!(
            FlowState::classify(ProtocolTag::Tcp, TcpFlags::SYN | TcpFlags::ACK),
            Some(FlowState::Opened)
        );
        assert_eq!(
            FlowState::classify(ProtocolTag::Tcp, TcpFlags::ACK),
            Some(FlowState::Midstream)
        );
    }
}
