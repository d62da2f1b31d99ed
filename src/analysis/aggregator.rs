use std::collections::HashMap;

use crate::models::flow::{ConversationKey, ConversationStats, FlowKey, FlowStats};
use crate::models::packet::{DecodedPacket, ProtocolTag, TcpFlags, Timestamp, Transport};

/// Running statistics for one analysis run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisState {
    protocols: HashMap<ProtocolTag, u64>,
    conversations: HashMap<ConversationKey, ConversationStats>,
    dns_queries: HashMap<String, u64>,
    flows: HashMap<FlowKey, FlowStats>,
    packet_count: u64,
    byte_count: u64,
    first_timestamp: Option<Timestamp>,
    last_timestamp: Option<Timestamp>,
    malformed: u64,
}

impl AnalysisState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one decoded packet into the running statistics
    pub fn observe(&mut self, packet: &DecodedPacket) {
        let bytes = packet.wire_len as u64;

        self.packet_count += 1;
        self.byte_count += bytes;
        if packet.malformed {
            self.malformed += 1;
        }

        self.first_timestamp = Some(match self.first_timestamp {
            Some(first) => first.min(packet.timestamp),
            None => packet.timestamp,
        });
        self.last_timestamp = Some(match self.last_timestamp {
            Some(last) => last.max(packet.timestamp),
            None => packet.timestamp,
        });

        let protocol = packet.protocol();
        *self.protocols.entry(protocol).or_insert(0) += 1;

        if let Some((source, destination)) = packet.network.addresses() {
            let conversation = self
                .conversations
                .entry(ConversationKey::new(source, destination, protocol))
                .or_default();
            conversation.packets += 1;
            conversation.bytes += bytes;

            let flow = match packet.transport {
                Transport::Tcp {
                    source_port,
                    destination_port,
                    flags,
                } => Some((source_port, destination_port, ProtocolTag::Tcp, flags)),
                Transport::Udp {
                    source_port,
                    destination_port,
                } => Some((source_port, destination_port, ProtocolTag::Udp, TcpFlags::default())),
                _ => None,
            };

            if let Some((source_port, destination_port, protocol, flags)) = flow {
                let key = FlowKey {
                    source,
                    source_port,
                    destination,
                    destination_port,
                    protocol,
                };
                self.flows
                    .entry(key)
                    .or_insert_with(|| FlowStats::new(packet.timestamp))
                    .record(packet.timestamp, bytes, flags);
            }
        }

        if let Some(name) = &packet.dns_query {
            *self.dns_queries.entry(name.clone()).or_insert(0) += 1;
        }
    }

    /// Combine another run's statistics into this one
    pub fn merge(&mut self, other: &AnalysisState) {
        self.packet_count += other.packet_count;
        self.byte_count += other.byte_count;
        self.malformed += other.malformed;

        self.first_timestamp = match (self.first_timestamp, other.first_timestamp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_timestamp = match (self.last_timestamp, other.last_timestamp) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        for (protocol, count) in &other.protocols {
            *self.protocols.entry(*protocol).or_insert(0) += count;
        }
        for (key, stats) in &other.conversations {
            self.conversations.entry(*key).or_default().merge(stats);
        }
        for (name, count) in &other.dns_queries {
            *self.dns_queries.entry(name.clone()).or_insert(0) += count;
        }
        for (key, stats) in &other.flows {
            self.flows
                .entry(*key)
                .and_modify(|existing| existing.merge(stats))
                .or_insert(*stats);
        }
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.first_timestamp
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    pub fn protocols(&self) -> &HashMap<ProtocolTag, u64> {
        &self.protocols
    }

    pub fn conversations(&self) -> &HashMap<ConversationKey, ConversationStats> {
        &self.conversations
    }

    pub fn dns_queries(&self) -> &HashMap<String, u64> {
        &self.dns_queries
    }

    pub fn flows(&self) -> &HashMap<FlowKey, FlowStats> {
        &self.flows
    }
}
