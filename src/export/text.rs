use std::io;
use termcolor::{Color, ColorSpec, WriteColor};

use crate::models::stats::AnalysisReport;

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Human-readable byte size, e.g. `1.50 KiB`
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

fn heading<W: WriteColor>(out: &mut W, title: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
    writeln!(out, "{}", title)?;
    out.reset()
}

fn field<W: WriteColor>(out: &mut W, label: &str, value: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_bold(true))?;
    write!(out, "  {:<20}", label)?;
    out.reset()?;
    writeln!(out, "{}", value)
}

/// Write a coloured summary of one report
pub fn render_report<W: WriteColor>(out: &mut W, title: &str, report: &AnalysisReport) -> io::Result<()> {
    let summary = &report.summary;

    heading(out, title)?;
    field(out, "Packets", &summary.packet_count.to_string())?;
    field(out, "Total size", &format_bytes(summary.total_bytes))?;
    field(out, "Duration", &format!("{:.3} s", summary.duration_seconds))?;
    field(out, "Packet rate", &format!("{:.2} pkt/s", summary.packets_per_second))?;
    field(
        out,
        "Data rate",
        &format!("{}/s", format_bytes(summary.bytes_per_second as u64)),
    )?;
    if let (Some(start), Some(end)) = (summary.start_time, summary.end_time) {
        field(out, "Start", &start.to_rfc3339())?;
        field(out, "End", &end.to_rfc3339())?;
    }
    field(out, "Flows", &summary.flow_count.to_string())?;
    field(out, "DNS names", &summary.unique_dns_queries.to_string())?;
    if summary.malformed_packets > 0 {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
        writeln!(out, "  {} frames could not be fully decoded", summary.malformed_packets)?;
        out.reset()?;
    }
    writeln!(out)?;

    if !report.protocol_breakdown.is_empty() {
        heading(out, "Protocols")?;
        for share in &report.protocol_breakdown {
            writeln!(out, "  {:<8} {:>10} {:>7.2}%", share.protocol, share.count, share.percent)?;
        }
        writeln!(out)?;
    }

    if !report.top_conversations.is_empty() {
        heading(out, "Top conversations")?;
        for conv in &report.top_conversations {
            writeln!(
                out,
                "  {} <-> {} {:<6} {:>8} pkts {:>12} {:>7.2}%",
                conv.a,
                conv.b,
                conv.protocol,
                conv.packets,
                format_bytes(conv.bytes),
                conv.percent
            )?;
        }
        writeln!(out)?;
    }

    if !report.dns_queries.is_empty() {
        heading(out, "DNS queries")?;
        for query in &report.dns_queries {
            writeln!(out, "  {:>6}  {}", query.count, query.name)?;
        }
        writeln!(out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{report, AnalysisState};
    use crate::models::config::AnalyzerConfig;
    use termcolor::Buffer;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn test_render_empty_report() {
        let report = report::build(&AnalysisState::new(), &AnalyzerConfig::default());
        let mut buffer = Buffer::no_color();
        render_report(&mut buffer, "capture.pcap", &report).unwrap();

        let text = String::from_utf8(buffer.into_inner()).unwrap();
        assert!(text.starts_with("capture.pcap\n"));
        assert!(text.contains("Packets"));
        assert!(!text.contains("Protocols"));
    }
}
