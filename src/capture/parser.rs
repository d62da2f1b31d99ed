use anyhow::{anyhow, bail, Result};
use log::{debug, log_enabled, trace, Level};
use pnet::packet::{
    arp::ArpPacket,
    ethernet::{EtherType, EtherTypes, EthernetPacket},
    icmp::IcmpPacket,
    icmpv6::Icmpv6Packet,
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::Ipv4Packet,
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
    vlan::VlanPacket,
};

use crate::capture::dns;
use crate::models::packet::{DecodedPacket, LinkType, Network, PacketRecord, TcpFlags, Transport};

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const LINUX_SLL_HEADER_LEN: usize = 16;
const LOOPBACK_HEADER_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Stacked VLAN tags beyond this are treated as garbage
const MAX_VLAN_TAGS: usize = 4;
const MAX_IPV6_EXTENSION_HEADERS: usize = 8;

const ETHERTYPE_8021AD: EtherType = EtherType(0x88a8);
const ETHERTYPE_QINQ: EtherType = EtherType(0x9100);

/// BSD protocol family values seen in loopback headers
const AF_INET: u32 = 2;
const AF_INET6_BSD: u32 = 24;
const AF_INET6_FREEBSD: u32 = 28;
const AF_INET6_DARWIN: u32 = 30;

/// Decodes raw frames into normalized packet records
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameDecoder {}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {}
    }

    /// Decode one record as far as its layers allow.
    ///
    /// Never fails: whatever cannot be decoded is left as Other/None and the
    /// packet is marked malformed.
    pub fn decode(&self, record: &PacketRecord) -> DecodedPacket {
        let mut packet = DecodedPacket::undecoded(record);
        let data = &record.data[..];

        let result = match record.link_type {
            LinkType::ETHERNET => self.parse_ethernet(data, &mut packet),
            LinkType::RAW => self.parse_raw_ip(data, &mut packet),
            LinkType::IPV4 => self.parse_ipv4(data, &mut packet),
            LinkType::IPV6 => self.parse_ipv6(data, &mut packet),
            LinkType::LINUX_SLL => self.parse_linux_sll(data, &mut packet),
            LinkType::NULL | LinkType::LOOP => {
                self.parse_loopback(data, record.link_type, &mut packet)
            }
            other => {
                if log_enabled!(Level::Trace) {
                    trace!("No decoder for link type {} at byte {}", other, record.offset);
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            packet.malformed = true;
            debug!("Frame at byte {} partially decoded: {}", record.offset, e);
        }

        packet
    }

    /// Parse Ethernet frame, skipping any VLAN tags
    fn parse_ethernet(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let eth_packet = EthernetPacket::new(data)
            .ok_or_else(|| anyhow!("Ethernet frame too short ({} bytes)", data.len()))?;

        let mut ethertype = eth_packet.get_ethertype();
        let mut payload = &data[ETHERNET_HEADER_LEN..];

        if log_enabled!(Level::Trace) {
            trace!(
                "EtherType: {:?}, src: {}, dst: {}",
                ethertype,
                eth_packet.get_source(),
                eth_packet.get_destination()
            );
        }

        let mut tags = 0;
        while ethertype == EtherTypes::Vlan
            || ethertype == ETHERTYPE_8021AD
            || ethertype == ETHERTYPE_QINQ
        {
            tags += 1;
            if tags > MAX_VLAN_TAGS {
                bail!("more than {} stacked VLAN tags", MAX_VLAN_TAGS);
            }
            let vlan_packet = VlanPacket::new(payload)
                .ok_or_else(|| anyhow!("VLAN tag truncated ({} bytes)", payload.len()))?;
            if log_enabled!(Level::Trace) {
                trace!("VLAN {} -> {:?}", vlan_packet.get_vlan_identifier(), vlan_packet.get_ethertype());
            }
            ethertype = vlan_packet.get_ethertype();
            payload = &payload[VLAN_TAG_LEN..];
        }

        self.parse_ethertype(ethertype, payload, packet)
    }

    /// Dispatch on EtherType
    fn parse_ethertype(&self, ethertype: EtherType, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        match ethertype {
            EtherTypes::Ipv4 => self.parse_ipv4(data, packet),
            EtherTypes::Ipv6 => self.parse_ipv6(data, packet),
            EtherTypes::Arp => self.parse_arp(data, packet),
            _ => {
                if log_enabled!(Level::Trace) {
                    trace!("Unhandled EtherType {:?}", ethertype);
                }
                Ok(())
            }
        }
    }

    /// Parse Linux "cooked" capture header
    fn parse_linux_sll(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        if data.len() < LINUX_SLL_HEADER_LEN {
            bail!("Linux SLL header too short ({} bytes)", data.len());
        }
        let protocol = EtherType(u16::from_be_bytes([data[14], data[15]]));
        self.parse_ethertype(protocol, &data[LINUX_SLL_HEADER_LEN..], packet)
    }

    /// Parse BSD loopback header
    fn parse_loopback(&self, data: &[u8], link_type: LinkType, packet: &mut DecodedPacket) -> Result<()> {
        if data.len() < LOOPBACK_HEADER_LEN {
            bail!("loopback header too short ({} bytes)", data.len());
        }
        let raw = [data[0], data[1], data[2], data[3]];
        let big = u32::from_be_bytes(raw);
        let little = u32::from_le_bytes(raw);
        // DLT_NULL uses the capturing host's byte order; family values are small
        let family = if link_type == LinkType::LOOP || little > 0xffff {
            big
        } else {
            little
        };

        let payload = &data[LOOPBACK_HEADER_LEN..];
        match family {
            AF_INET => self.parse_ipv4(payload, packet),
            AF_INET6_BSD | AF_INET6_FREEBSD | AF_INET6_DARWIN => self.parse_ipv6(payload, packet),
            other => {
                if log_enabled!(Level::Trace) {
                    trace!("Unhandled loopback family {}", other);
                }
                Ok(())
            }
        }
    }

    /// Parse a raw IP frame by its version nibble
    fn parse_raw_ip(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        match data.first().map(|b| b >> 4) {
            Some(4) => self.parse_ipv4(data, packet),
            Some(6) => self.parse_ipv6(data, packet),
            Some(version) => bail!("raw frame carries IP version {}", version),
            None => bail!("empty raw IP frame"),
        }
    }

    /// Parse IPv4 packet
    fn parse_ipv4(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let ipv4_packet = Ipv4Packet::new(data)
            .ok_or_else(|| anyhow!("IPv4 header truncated ({} bytes)", data.len()))?;

        if ipv4_packet.get_version() != 4 {
            bail!("IPv4 header carries version {}", ipv4_packet.get_version());
        }
        let header_len = ipv4_packet.get_header_length() as usize * 4;
        if header_len < IPV4_MIN_HEADER_LEN || header_len > data.len() {
            bail!("invalid IPv4 header length {}", header_len);
        }

        packet.network = Network::Ipv4 {
            source: ipv4_packet.get_source(),
            destination: ipv4_packet.get_destination(),
        };

        if log_enabled!(Level::Trace) {
            trace!(
                "IPv4 - src: {}, dst: {}, proto: {:?}",
                ipv4_packet.get_source(),
                ipv4_packet.get_destination(),
                ipv4_packet.get_next_level_protocol()
            );
        }

        // Segmentation offload can leave total length at zero
        let total_len = ipv4_packet.get_total_length() as usize;
        let end = if total_len >= header_len {
            total_len.min(data.len())
        } else {
            data.len()
        };

        // Only the first fragment carries the transport header
        if ipv4_packet.get_fragment_offset() != 0 {
            return Ok(());
        }

        self.parse_transport_protocol(
            ipv4_packet.get_next_level_protocol(),
            &data[header_len..end],
            packet,
        )
    }

    /// Parse IPv6 packet, walking extension headers
    fn parse_ipv6(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let ipv6_packet = Ipv6Packet::new(data)
            .ok_or_else(|| anyhow!("IPv6 header truncated ({} bytes)", data.len()))?;

        if ipv6_packet.get_version() != 6 {
            bail!("IPv6 header carries version {}", ipv6_packet.get_version());
        }

        packet.network = Network::Ipv6 {
            source: ipv6_packet.get_source(),
            destination: ipv6_packet.get_destination(),
        };

        // A zero payload length means a jumbogram; take what was captured
        let payload_len = ipv6_packet.get_payload_length() as usize;
        let end = if payload_len == 0 {
            data.len()
        } else {
            (IPV6_HEADER_LEN + payload_len).min(data.len())
        };

        let mut next_header = ipv6_packet.get_next_header();
        let mut payload = &data[IPV6_HEADER_LEN..end];

        for _ in 0..MAX_IPV6_EXTENSION_HEADERS {
            match next_header {
                IpNextHeaderProtocols::Hopopt
                | IpNextHeaderProtocols::Ipv6Route
                | IpNextHeaderProtocols::Ipv6Opts => {
                    if payload.len() < 8 {
                        bail!("IPv6 extension header truncated");
                    }
                    let len = (payload[1] as usize + 1) * 8;
                    if len > payload.len() {
                        bail!("IPv6 extension header overruns packet ({} bytes)", len);
                    }
                    next_header = IpNextHeaderProtocol(payload[0]);
                    payload = &payload[len..];
                }
                IpNextHeaderProtocols::Ipv6Frag => {
                    if payload.len() < 8 {
                        bail!("IPv6 fragment header truncated");
                    }
                    let fragment_offset = u16::from_be_bytes([payload[2], payload[3]]) >> 3;
                    next_header = IpNextHeaderProtocol(payload[0]);
                    payload = &payload[8..];
                    if fragment_offset != 0 {
                        return Ok(());
                    }
                }
                _ => break,
            }
        }

        if log_enabled!(Level::Trace) {
            trace!(
                "IPv6 - src: {}, dst: {}, next header: {:?}",
                ipv6_packet.get_source(),
                ipv6_packet.get_destination(),
                next_header
            );
        }

        self.parse_transport_protocol(next_header, payload, packet)
    }

    /// Parse ARP packet
    fn parse_arp(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let arp_packet = ArpPacket::new(data)
            .ok_or_else(|| anyhow!("ARP packet truncated ({} bytes)", data.len()))?;

        let carries_ipv4 =
            arp_packet.get_protocol_type() == EtherTypes::Ipv4 && arp_packet.get_proto_addr_len() == 4;

        packet.network = if carries_ipv4 {
            Network::Arp {
                sender: Some(arp_packet.get_sender_proto_addr()),
                target: Some(arp_packet.get_target_proto_addr()),
            }
        } else {
            Network::Arp {
                sender: None,
                target: None,
            }
        };

        if log_enabled!(Level::Trace) {
            trace!(
                "ARP {:?} - sender: {}, target: {}",
                arp_packet.get_operation(),
                arp_packet.get_sender_proto_addr(),
                arp_packet.get_target_proto_addr()
            );
        }

        Ok(())
    }

    /// Parse transport layer protocols
    fn parse_transport_protocol(
        &self,
        proto: IpNextHeaderProtocol,
        data: &[u8],
        packet: &mut DecodedPacket,
    ) -> Result<()> {
        if log_enabled!(Level::Trace) {
            trace!("Transport protocol: {:?}, data length: {}", proto, data.len());
        }

        match proto {
            IpNextHeaderProtocols::Tcp => self.parse_tcp(data, packet),
            IpNextHeaderProtocols::Udp => self.parse_udp(data, packet),
            IpNextHeaderProtocols::Icmp => self.parse_icmp(data, packet),
            IpNextHeaderProtocols::Icmpv6 => self.parse_icmpv6(data, packet),
            _ => Ok(()),
        }
    }

    /// Parse TCP segment
    fn parse_tcp(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let tcp_packet = TcpPacket::new(data)
            .ok_or_else(|| anyhow!("TCP header truncated ({} bytes)", data.len()))?;

        let source_port = tcp_packet.get_source();
        let destination_port = tcp_packet.get_destination();
        packet.transport = Transport::Tcp {
            source_port,
            destination_port,
            flags: TcpFlags::from_bits(tcp_packet.get_flags() as u16),
        };

        let header_len = tcp_packet.get_data_offset() as usize * 4;
        if header_len < TCP_MIN_HEADER_LEN || header_len > data.len() {
            bail!("invalid TCP data offset {}", header_len);
        }
        let payload = &data[header_len..];

        if log_enabled!(Level::Trace) {
            trace!(
                "TCP - src port: {}, dst port: {}, payload: {} bytes",
                source_port,
                destination_port,
                payload.len()
            );
        }

        if dns::is_dns_port(source_port, destination_port) && !payload.is_empty() {
            packet.dns_query = dns::query_name_tcp(payload)?;
        }

        Ok(())
    }

    /// Parse UDP datagram
    fn parse_udp(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let udp_packet = UdpPacket::new(data)
            .ok_or_else(|| anyhow!("UDP header truncated ({} bytes)", data.len()))?;

        let source_port = udp_packet.get_source();
        let destination_port = udp_packet.get_destination();
        packet.transport = Transport::Udp {
            source_port,
            destination_port,
        };

        let length = udp_packet.get_length() as usize;
        let end = if length >= UDP_HEADER_LEN {
            length.min(data.len())
        } else {
            data.len()
        };
        let payload = &data[UDP_HEADER_LEN..end];

        if dns::is_dns_port(source_port, destination_port) && !payload.is_empty() {
            packet.dns_query = dns::query_name(payload)?;
        }

        Ok(())
    }

    /// Parse ICMP message
    fn parse_icmp(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let icmp_packet = IcmpPacket::new(data)
            .ok_or_else(|| anyhow!("ICMP header truncated ({} bytes)", data.len()))?;

        packet.transport = Transport::Icmp {
            icmp_type: icmp_packet.get_icmp_type().0,
            code: icmp_packet.get_icmp_code().0,
        };
        Ok(())
    }

    /// Parse ICMPv6 message
    fn parse_icmpv6(&self, data: &[u8], packet: &mut DecodedPacket) -> Result<()> {
        let icmpv6_packet = Icmpv6Packet::new(data)
            .ok_or_else(|| anyhow!("ICMPv6 header truncated ({} bytes)", data.len()))?;

        packet.transport = Transport::Icmpv6 {
            icmp_type: icmpv6_packet.get_icmpv6_type().0,
            code: icmpv6_packet.get_icmpv6_code().0,
        };
        Ok(())
    }
}
