use std::cmp::Ordering;

use crate::analysis::aggregator::AnalysisState;
use crate::models::config::AnalyzerConfig;
use crate::models::flow::FlowState;
use crate::models::stats::{
    AnalysisReport, ConversationEntry, DnsQueryEntry, FlowEntry, ProtocolShare, Summary,
};

/// Share of `total`, as a percentage rounded to two decimals
fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(count as f64 / total as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Turn final aggregator state into a report.
///
/// Every ordering ends on a canonical string key, so the same state always
/// yields the same report.
pub fn build(state: &AnalysisState, config: &AnalyzerConfig) -> AnalysisReport {
    let packet_count = state.packet_count();
    let total_bytes = state.byte_count();

    let duration_seconds = match (state.first_timestamp(), state.last_timestamp()) {
        (Some(first), Some(last)) => last.seconds_since(first),
        _ => 0.0,
    };
    let (packets_per_second, bytes_per_second) = if duration_seconds > 0.0 {
        (
            packet_count as f64 / duration_seconds,
            total_bytes as f64 / duration_seconds,
        )
    } else {
        (0.0, 0.0)
    };

    let mut protocol_breakdown: Vec<ProtocolShare> = state
        .protocols()
        .iter()
        .map(|(protocol, count)| ProtocolShare {
            protocol: *protocol,
            count: *count,
            percent: percent(*count, packet_count),
        })
        .collect();
    protocol_breakdown.sort_by(|x, y| {
        y.count
            .cmp(&x.count)
            .then_with(|| x.protocol.as_str().cmp(y.protocol.as_str()))
    });

    let mut conversations: Vec<_> = state.conversations().iter().collect();
    conversations.sort_by(|(xk, xs), (yk, ys)| {
        ys.bytes
            .cmp(&xs.bytes)
            .then_with(|| ys.packets.cmp(&xs.packets))
            .then_with(|| xk.canonical().cmp(&yk.canonical()))
    });
    let top_conversations = conversations
        .into_iter()
        .take(config.top_conversations_limit)
        .map(|(key, stats)| ConversationEntry {
            a: key.a.to_string(),
            b: key.b.to_string(),
            protocol: key.protocol,
            packets: stats.packets,
            bytes: stats.bytes,
            percent: percent(stats.bytes, total_bytes),
        })
        .collect();

    let mut dns: Vec<_> = state.dns_queries().iter().collect();
    dns.sort_by(|(xn, xc), (yn, yc)| yc.cmp(xc).then_with(|| xn.cmp(yn)));
    let dns_queries = dns
        .into_iter()
        .take(config.top_dns_limit)
        .map(|(name, count)| DnsQueryEntry {
            name: name.clone(),
            count: *count,
        })
        .collect();

    let mut flow_list: Vec<_> = state.flows().iter().collect();
    flow_list.sort_by(|(xk, xs), (yk, ys)| match xs.first_seen.cmp(&ys.first_seen) {
        Ordering::Equal => xk.canonical().cmp(&yk.canonical()),
        other => other,
    });
    let flows = flow_list
        .into_iter()
        .map(|(key, stats)| FlowEntry {
            src: key.source.to_string(),
            src_port: key.source_port,
            dst: key.destination.to_string(),
            dst_port: key.destination_port,
            protocol: key.protocol,
            packets: stats.packets,
            bytes: stats.bytes,
            first_seen: stats.first_seen.as_secs_f64(),
            last_seen: stats.last_seen.as_secs_f64(),
            flags_seen: stats.flags.names(),
            state: FlowState::classify(key.protocol, stats.flags),
        })
        .collect();

    let summary = Summary {
        packet_count,
        duration_seconds,
        total_bytes,
        packets_per_second,
        bytes_per_second,
        unique_dns_queries: state.dns_queries().len() as u64,
        flow_count: state.flows().len() as u64,
        malformed_packets: state.malformed_count(),
        start_time: state.first_timestamp().and_then(|ts| ts.to_datetime()),
        end_time: state.last_timestamp().and_then(|ts| ts.to_datetime()),
    };

    AnalysisReport {
        summary,
        protocol_breakdown,
        top_conversations,
        dns_queries,
        flows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::packet::{
        DecodedPacket, LinkType, Network, ProtocolTag, TcpFlags, Timestamp, Transport,
    };
    use std::net::Ipv4Addr;

    fn packet(src: u8, dst: u8, secs: u64, len: u32, transport: Transport) -> DecodedPacket {
        DecodedPacket {
            timestamp: Timestamp::from_parts(secs, 0),
            wire_len: len,
            link_type: LinkType::ETHERNET,
            network: Network::Ipv4 {
                source: Ipv4Addr::new(10, 0, 0, src),
                destination: Ipv4Addr::new(10, 0, 0, dst),
            },
            transport,
            dns_query: None,
            malformed: false,
        }
    }

    fn udp(sport: u16, dport: u16) -> Transport {
        Transport::Udp {
            source_port: sport,
            destination_port: dport,
        }
    }

    #[test]
    fn test_empty_state() {
        let report = build(&AnalysisState::new(), &AnalyzerConfig::default());
        assert_eq!(report.summary.packet_count, 0);
        assert_eq!(report.summary.duration_seconds, 0.0);
        assert_eq!(report.summary.packets_per_second, 0.0);
        assert!(report.summary.start_time.is_none());
        assert!(report.protocol_breakdown.is_empty());
        assert!(report.top_conversations.is_empty());
        assert!(report.dns_queries.is_empty());
        assert!(report.flows.is_empty());
    }

    #[test]
    fn test_single_timestamp_has_zero_rate() {
        let mut state = AnalysisState::new();
        state.observe(&packet(1, 2, 7, 100, udp(1, 2)));
        state.observe(&packet(2, 1, 7, 100, udp(2, 1)));

        let report = build(&state, &AnalyzerConfig::default());
        assert_eq!(report.summary.duration_seconds, 0.0);
        assert_eq!(report.summary.packets_per_second, 0.0);
        assert_eq!(report.summary.bytes_per_second, 0.0);
        assert_eq!(report.summary.start_time, report.summary.end_time);
    }

    #[test]
    fn test_rates_and_percentages() {
        let mut state = AnalysisState::new();
        state.observe(&packet(1, 2, 0, 100, udp(1, 2)));
        state.observe(&packet(1, 2, 1, 100, udp(1, 2)));
        let mut arp = packet(1, 2, 2, 60, Transport::None);
        arp.network = Network::Arp {
            sender: None,
            target: None,
        };
        state.observe(&arp);

        let report = build(&state, &AnalyzerConfig::default());
        assert_eq!(report.summary.duration_seconds, 2.0);
        assert_eq!(report.summary.packets_per_second, 1.5);
        assert_eq!(report.summary.bytes_per_second, 130.0);

        assert_eq!(report.protocol_breakdown[0].protocol, ProtocolTag::Udp);
        assert_eq!(report.protocol_breakdown[0].percent, 66.67);
        assert_eq!(report.protocol_breakdown[1].protocol, ProtocolTag::Arp);
        assert_eq!(report.protocol_breakdown[1].percent, 33.33);
    }

    #[test]
    fn test_conversation_order_and_limit() {
        let mut state = AnalysisState::new();
        for _ in 0..3 {
            state.observe(&packet(1, 2, 1, 100, udp(1, 2)));
        }
        // Same bytes as the first pair but fewer packets
        state.observe(&packet(3, 4, 1, 300, udp(1, 2)));
        // Ties with the pair above on bytes and packets
        state.observe(&packet(6, 5, 1, 300, udp(1, 2)));
        state.observe(&packet(7, 8, 1, 10, udp(1, 2)));

        let config = AnalyzerConfig::default().with_top_conversations(3);
        let report = build(&state, &config);

        let pairs: Vec<(&str, &str)> = report
            .top_conversations
            .iter()
            .map(|c| (c.a.as_str(), c.b.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("10.0.0.1", "10.0.0.2"),
                ("10.0.0.3", "10.0.0.4"),
                ("10.0.0.5", "10.0.0.6"),
            ]
        );
        assert_eq!(report.top_conversations[0].percent, 32.97);
    }

    #[test]
    fn test_dns_order_and_limit() {
        let mut state = AnalysisState::new();
        for (name, times) in [("b.example", 2), ("a.example", 2), ("c.example", 5), ("d.example", 1)] {
            for _ in 0..times {
                let mut query = packet(1, 2, 1, 80, udp(4000, 53));
                query.dns_query = Some(name.to_string());
                state.observe(&query);
            }
        }

        let report = build(&state, &AnalyzerConfig::default().with_top_dns(3));
        let names: Vec<&str> = report.dns_queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["c.example", "a.example", "b.example"]);
        assert_eq!(report.summary.unique_dns_queries, 4);
    }

    #[test]
    fn test_flow_entries() {
        let mut state = AnalysisState::new();
        let tcp = |flags| Transport::Tcp {
            source_port: 40000,
            destination_port: 443,
            flags,
        };
        state.observe(&packet(1, 2, 5, 60, tcp(TcpFlags::SYN)));
        state.observe(&packet(1, 2, 6, 60, tcp(TcpFlags::ACK | TcpFlags::FIN)));
        state.observe(&packet(3, 4, 2, 60, udp(9, 10)));

        let report = build(&state, &AnalyzerConfig::default());
        assert_eq!(report.summary.flow_count, 2);
        assert_eq!(report.flows[0].protocol, ProtocolTag::Udp);
        assert!(report.flows[0].flags_seen.is_empty());
        assert_eq!(report.flows[0].state, None);

        let tcp_flow = &report.flows[1];
        assert_eq!(tcp_flow.src, "10.0.0.1");
        assert_eq!(tcp_flow.dst_port, 443);
        assert_eq!(tcp_flow.first_seen, 5.0);
        assert_eq!(tcp_flow.last_seen, 6.0);
        assert_eq!(tcp_flow.flags_seen, vec!["SYN", "ACK", "FIN"]);
        assert_eq!(tcp_flow.state, Some(FlowState::Closed));
    }

    #[test]
    fn test_build_is_repeatable() {
        let mut state = AnalysisState::new();
        for i in 0..20u8 {
            state.observe(&packet(i % 5, 100 + i % 3, 1, 64, udp(1000 + i as u16, 53)));
        }
        let config = AnalyzerConfig::default();
        assert_eq!(build(&state, &config), build(&state, &config));
    }
}
