use anyhow::Result;
use std::io::Write;

use crate::models::stats::{AnalysisReport, BatchReport, ConversationEntry};

const CONVERSATION_HEADER: [&str; 6] = ["a", "b", "protocol", "packets", "bytes", "percent"];

fn conversation_fields(entry: &ConversationEntry) -> [String; 6] {
    [
        entry.a.clone(),
        entry.b.clone(),
        entry.protocol.to_string(),
        entry.packets.to_string(),
        entry.bytes.to_string(),
        format!("{:.2}", entry.percent),
    ]
}

/// Write a report's top conversations as CSV
pub fn write_conversations<W: Write>(writer: W, report: &AnalysisReport) -> Result<()> {
    let mut wtr = ::csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(CONVERSATION_HEADER)?;
    for entry in &report.top_conversations {
        wtr.write_record(conversation_fields(entry))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write top conversations of several captures as one CSV, tagging each row
/// with its capture path (or `merged`)
pub fn write_batch_conversations<W: Write>(writer: W, batch: &BatchReport) -> Result<()> {
    let mut wtr = ::csv::WriterBuilder::new().from_writer(writer);

    let mut header = vec!["capture"];
    header.extend_from_slice(&CONVERSATION_HEADER);
    wtr.write_record(&header)?;

    let reports = batch
        .captures
        .iter()
        .filter_map(|outcome| outcome.report.as_ref().map(|r| (outcome.path.as_str(), r)))
        .chain(batch.merged.as_ref().map(|r| ("merged", r)));

    for (capture, report) in reports {
        for entry in &report.top_conversations {
            let fields = conversation_fields(entry);
            wtr.write_record(std::iter::once(capture).chain(fields.iter().map(String::as_str)))?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{report, AnalysisState};
    use crate::models::config::AnalyzerConfig;
    use crate::models::packet::{DecodedPacket, LinkType, Network, Timestamp, Transport};
    use crate::models::stats::CaptureOutcome;
    use std::net::Ipv4Addr;

    fn sample_report() -> AnalysisReport {
        let mut state = AnalysisState::new();
        for (src, len) in [(1u8, 300u32), (2, 100)] {
            state.observe(&DecodedPacket {
                timestamp: Timestamp::from_parts(1, 0),
                wire_len: len,
                link_type: LinkType::ETHERNET,
                network: Network::Ipv4 {
                    source: Ipv4Addr::new(192, 168, 0, src),
                    destination: Ipv4Addr::new(192, 168, 0, 254),
                },
                transport: Transport::Udp {
                    source_port: 4000,
                    destination_port: 53,
                },
                dns_query: None,
                malformed: false,
            });
        }
        report::build(&state, &AnalyzerConfig::default())
    }

    #[test]
    fn test_conversations_csv() {
        let mut out = Vec::new();
        write_conversations(&mut out, &sample_report()).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "a,b,protocol,packets,bytes,percent");
        assert_eq!(lines[1], "192.168.0.1,192.168.0.254,UDP,1,300,75.00");
        assert_eq!(lines[2], "192.168.0.2,192.168.0.254,UDP,1,100,25.00");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_batch_csv() {
        let report = sample_report();
        let batch = BatchReport {
            captures: vec![
                CaptureOutcome {
                    path: "one.pcap".to_string(),
                    report: Some(report.clone()),
                    error: None,
                },
                CaptureOutcome {
                    path: "broken.pcap".to_string(),
                    report: None,
                    error: None,
                },
            ],
            merged: Some(report),
        };

        let mut out = Vec::new();
        write_batch_conversations(&mut out, &batch).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "capture,a,b,protocol,packets,bytes,percent");
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("one.pcap,"));
        assert!(lines[4].starts_with("merged,"));
    }
}
