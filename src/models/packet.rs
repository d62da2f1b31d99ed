use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::{BitOr, BitOrAssign};

/// Link-layer header type as declared by the capture container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkType(pub u32);

impl LinkType {
    /// BSD loopback, protocol family in host byte order
    pub const NULL: LinkType = LinkType(0);
    pub const ETHERNET: LinkType = LinkType(1);
    pub const RAW: LinkType = LinkType(101);
    /// OpenBSD loopback, protocol family in network byte order
    pub const LOOP: LinkType = LinkType(108);
    pub const LINUX_SLL: LinkType = LinkType(113);
    pub const IPV4: LinkType = LinkType(228);
    pub const IPV6: LinkType = LinkType(229);

    /// Whether the frame decoder knows how to interpret this link type
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            LinkType::NULL
                | LinkType::ETHERNET
                | LinkType::RAW
                | LinkType::LOOP
                | LinkType::LINUX_SLL
                | LinkType::IPV4
                | LinkType::IPV6
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            LinkType::NULL => "NULL",
            LinkType::ETHERNET => "Ethernet",
            LinkType::RAW => "Raw IP",
            LinkType::LOOP => "Loopback",
            LinkType::LINUX_SLL => "Linux SLL",
            LinkType::IPV4 => "Raw IPv4",
            LinkType::IPV6 => "Raw IPv6",
            _ => "Other",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Container flavour of a capture file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Pcap,
    PcapNg,
}

/// Resolution of the fractional part of record timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPrecision {
    Micro,
    Nano,
}

/// Global header of a capture, read once at stream start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHeader {
    /// Container flavour
    pub format: CaptureFormat,

    /// Magic number as it appears in the file's own byte order
    pub magic: u32,

    /// Format version
    pub version_major: u16,
    pub version_minor: u16,

    /// Snapshot length (0 when the container does not declare one)
    pub snaplen: u32,

    /// Link-layer type of the first (or only) interface
    pub link_type: LinkType,

    /// Timestamp resolution of classic pcap records
    pub precision: TimestampPrecision,

    /// Whether multi-byte fields are big-endian
    pub big_endian: bool,
}

/// Capture timestamp, kept as nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub fn from_parts(secs: u64, nanos: u32) -> Self {
        Timestamp(secs.saturating_mul(1_000_000_000).saturating_add(nanos as u64))
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        secs as f64 + nanos as f64 / 1e9
    }

    /// Seconds elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        let delta = self.0.saturating_sub(earlier.0);
        (delta / 1_000_000_000) as f64 + (delta % 1_000_000_000) as f64 / 1e9
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.0 / 1_000_000_000).ok()?;
        DateTime::from_timestamp(secs, (self.0 % 1_000_000_000) as u32)
    }
}

/// One raw record from the capture container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Capture timestamp
    pub timestamp: Timestamp,

    /// Bytes actually present in the file
    pub captured_len: u32,

    /// Length of the packet on the wire
    pub original_len: u32,

    /// Link-layer type of the interface the frame was captured on
    pub link_type: LinkType,

    /// Byte offset of the record header in the source
    pub offset: u64,

    /// The raw frame bytes
    pub data: Vec<u8>,
}

/// Protocol tag used for counting and conversation keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolTag {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "ICMPv6")]
    Icmpv6,
    #[serde(rename = "ARP")]
    Arp,
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
    Other,
}

impl ProtocolTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolTag::Tcp => "TCP",
            ProtocolTag::Udp => "UDP",
            ProtocolTag::Icmp => "ICMP",
            ProtocolTag::Icmpv6 => "ICMPv6",
            ProtocolTag::Arp => "ARP",
            ProtocolTag::Ipv4 => "IPv4",
            ProtocolTag::Ipv6 => "IPv6",
            ProtocolTag::Other => "Other",
        }
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP control bits observed on a segment (or the union across a flow)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcpFlags(u16);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);
    pub const ECE: TcpFlags = TcpFlags(0x40);
    pub const CWR: TcpFlags = TcpFlags(0x80);

    /// Display order for flag names
    const NAMED: [(TcpFlags, &'static str); 8] = [
        (TcpFlags::SYN, "SYN"),
        (TcpFlags::ACK, "ACK"),
        (TcpFlags::FIN, "FIN"),
        (TcpFlags::RST, "RST"),
        (TcpFlags::PSH, "PSH"),
        (TcpFlags::URG, "URG"),
        (TcpFlags::ECE, "ECE"),
        (TcpFlags::CWR, "CWR"),
    ];

    pub fn from_bits(bits: u16) -> Self {
        TcpFlags(bits & 0xff)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> Vec<String> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name.to_string())
            .collect()
    }
}

impl BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TcpFlags {
    fn bitor_assign(&mut self, rhs: TcpFlags) {
        self.0 |= rhs.0;
    }
}

/// Network layer of a decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Ipv4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
    },
    Ipv6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
    },
    /// Protocol addresses are only kept when the ARP payload carries IPv4
    Arp {
        sender: Option<Ipv4Addr>,
        target: Option<Ipv4Addr>,
    },
    Other,
}

impl Network {
    pub fn tag(&self) -> ProtocolTag {
        match self {
            Network::Ipv4 { .. } => ProtocolTag::Ipv4,
            Network::Ipv6 { .. } => ProtocolTag::Ipv6,
            Network::Arp { .. } => ProtocolTag::Arp,
            Network::Other => ProtocolTag::Other,
        }
    }

    /// Source and destination addresses, when both are known
    pub fn addresses(&self) -> Option<(IpAddr, IpAddr)> {
        match self {
            Network::Ipv4 {
                source,
                destination,
            } => Some((IpAddr::V4(*source), IpAddr::V4(*destination))),
            Network::Ipv6 {
                source,
                destination,
            } => Some((IpAddr::V6(*source), IpAddr::V6(*destination))),
            Network::Arp {
                sender: Some(sender),
                target: Some(target),
            } => Some((IpAddr::V4(*sender), IpAddr::V4(*target))),
            _ => None,
        }
    }
}

/// Transport layer of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp {
        source_port: u16,
        destination_port: u16,
        flags: TcpFlags,
    },
    Udp {
        source_port: u16,
        destination_port: u16,
    },
    Icmp {
        icmp_type: u8,
        code: u8,
    },
    Icmpv6 {
        icmp_type: u8,
        code: u8,
    },
    None,
}

impl Transport {
    pub fn tag(&self) -> Option<ProtocolTag> {
        match self {
            Transport::Tcp { .. } => Some(ProtocolTag::Tcp),
            Transport::Udp { .. } => Some(ProtocolTag::Udp),
            Transport::Icmp { .. } => Some(ProtocolTag::Icmp),
            Transport::Icmpv6 { .. } => Some(ProtocolTag::Icmpv6),
            Transport::None => None,
        }
    }

    pub fn ports(&self) -> Option<(u16, u16)> {
        match self {
            Transport::Tcp {
                source_port,
                destination_port,
                ..
            }
            | Transport::Udp {
                source_port,
                destination_port,
            } => Some((*source_port, *destination_port)),
            _ => None,
        }
    }
}

/// Normalized result of decoding one [`PacketRecord`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// Capture timestamp
    pub timestamp: Timestamp,

    /// Length of the packet on the wire
    pub wire_len: u32,

    /// Link-layer type the frame was decoded as
    pub link_type: LinkType,

    pub network: Network,

    pub transport: Transport,

    /// First question name of a DNS query carried on port 53
    pub dns_query: Option<String>,

    /// Set when some layer could not be decoded
    pub malformed: bool,
}

impl DecodedPacket {
    /// A packet nothing could be decoded from
    pub fn undecoded(record: &PacketRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            wire_len: record.original_len,
            link_type: record.link_type,
            network: Network::Other,
            transport: Transport::None,
            dns_query: None,
            malformed: false,
        }
    }

    /// Most specific protocol successfully decoded
    pub fn protocol(&self) -> ProtocolTag {
        self.transport.tag().unwrap_or_else(|| self.network.tag())
    }
}
