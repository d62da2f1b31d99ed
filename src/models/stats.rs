use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::flow::FlowState;
use crate::models::packet::ProtocolTag;
use crate::utils::error::ErrorReport;

/// Final, immutable result of analysing one capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summary: Summary,
    pub protocol_breakdown: Vec<ProtocolShare>,
    pub top_conversations: Vec<ConversationEntry>,
    pub dns_queries: Vec<DnsQueryEntry>,
    pub flows: Vec<FlowEntry>,
}

/// Capture-wide totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Total number of records read
    pub packet_count: u64,

    /// Last timestamp minus first timestamp
    pub duration_seconds: f64,

    /// Sum of on-the-wire packet lengths
    pub total_bytes: u64,

    /// Packet rate (0 when the capture spans no time)
    pub packets_per_second: f64,

    /// Data rate (0 when the capture spans no time)
    pub bytes_per_second: f64,

    pub unique_dns_queries: u64,

    pub flow_count: u64,

    /// Frames where some layer could not be decoded
    pub malformed_packets: u64,

    /// Timestamp of the earliest packet
    pub start_time: Option<DateTime<Utc>>,

    /// Timestamp of the latest packet
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolShare {
    pub protocol: ProtocolTag,
    pub count: u64,
    pub percent: f64,
}

/// One row of the top talkers table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub a: String,
    pub b: String,
    pub protocol: ProtocolTag,
    pub packets: u64,
    pub bytes: u64,
    /// Share of the capture's total bytes
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQueryEntry {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub src: String,
    pub src_port: u16,
    pub dst: String,
    pub dst_port: u16,
    pub protocol: ProtocolTag,
    pub packets: u64,
    pub bytes: u64,
    pub first_seen: f64,
    pub last_seen: f64,
    pub flags_seen: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FlowState>,
}

/// Outcome of one capture in a multi-file run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureOutcome {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<AnalysisReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Results of analysing several captures in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub captures: Vec<CaptureOutcome>,
    /// One report over every capture that was read successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<AnalysisReport>,
}
