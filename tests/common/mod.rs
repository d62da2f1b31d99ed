#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};

pub const LINKTYPE_ETHERNET: u32 = 1;

/// Builds a classic little-endian microsecond pcap in memory
pub struct PcapBuilder {
    bytes: Vec<u8>,
}

impl PcapBuilder {
    pub fn new(link_type: u32) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&65535u32.to_le_bytes());
        bytes.extend_from_slice(&link_type.to_le_bytes());
        Self { bytes }
    }

    pub fn packet(mut self, secs: u32, micros: u32, frame: &[u8]) -> Self {
        self.bytes.extend_from_slice(&secs.to_le_bytes());
        self.bytes.extend_from_slice(&micros.to_le_bytes());
        self.bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(frame);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Builds a pcapng capture with one interface in either byte order
pub struct PcapngBuilder {
    big_endian: bool,
    bytes: Vec<u8>,
}

impl PcapngBuilder {
    pub fn new(big_endian: bool, link_type: u16) -> Self {
        let mut builder = Self {
            big_endian,
            bytes: Vec::new(),
        };
        let mut shb = builder.u32(0x1a2b_3c4d);
        shb.extend(builder.u16(1));
        shb.extend(builder.u16(0));
        shb.extend_from_slice(&[0xff; 8]);
        builder.block(0x0a0d_0d0a, &shb);

        let mut idb = builder.u16(link_type);
        idb.extend(builder.u16(0));
        idb.extend(builder.u32(65535));
        builder.block(1, &idb);
        builder
    }

    fn u16(&self, v: u16) -> Vec<u8> {
        if self.big_endian { v.to_be_bytes().to_vec() } else { v.to_le_bytes().to_vec() }
    }

    fn u32(&self, v: u32) -> Vec<u8> {
        if self.big_endian { v.to_be_bytes().to_vec() } else { v.to_le_bytes().to_vec() }
    }

    fn block(&mut self, block_type: u32, body: &[u8]) {
        let mut padded = body.to_vec();
        while padded.len() % 4 != 0 {
            padded.push(0);
        }
        let total = (padded.len() + 12) as u32;
        let head = [self.u32(block_type), self.u32(total)].concat();
        let tail = self.u32(total);
        self.bytes.extend(head);
        self.bytes.extend(padded);
        self.bytes.extend(tail);
    }

    /// Enhanced packet block on interface 0, microsecond timestamps
    pub fn packet(mut self, secs: u64, micros: u64, frame: &[u8]) -> Self {
        let ticks = secs * 1_000_000 + micros;
        let mut epb = self.u32(0);
        epb.extend(self.u32((ticks >> 32) as u32));
        epb.extend(self.u32(ticks as u32));
        epb.extend(self.u32(frame.len() as u32));
        epb.extend(self.u32(frame.len() as u32));
        epb.extend_from_slice(frame);
        self.block(6, &epb);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn ethernet_ipv6_udp(src: Ipv6Addr, sport: u16, dst: Ipv6Addr, dport: u16, payload: &[u8]) -> Vec<u8> {
    let datagram = udp_datagram(sport, dport, payload);
    let mut frame = vec![0x02, 0, 0, 0, 0, 0x02, 0x02, 0, 0, 0, 0, 0x01, 0x86, 0xdd];
    frame.extend_from_slice(&[0x60, 0, 0, 0]);
    frame.extend_from_slice(&(datagram.len() as u16).to_be_bytes());
    frame.extend_from_slice(&[17, 64]);
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(&datagram);
    frame
}

pub fn ethernet_ipv4(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, transport: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x02, 0, 0, 0, 0, 0x02, 0x02, 0, 0, 0, 0, 0x01, 0x08, 0x00];
    let total = (20 + transport.len()) as u16;
    frame.extend_from_slice(&[0x45, 0]);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(&[0, 1, 0x40, 0, 64, protocol, 0, 0]);
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(transport);
    frame
}

pub fn tcp_segment(sport: u16, dport: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut segment = Vec::new();
    segment.extend_from_slice(&sport.to_be_bytes());
    segment.extend_from_slice(&dport.to_be_bytes());
    segment.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0, 0x50, flags, 0x20, 0x00, 0, 0, 0, 0]);
    segment.extend_from_slice(payload);
    segment
}

pub fn udp_datagram(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::new();
    datagram.extend_from_slice(&sport.to_be_bytes());
    datagram.extend_from_slice(&dport.to_be_bytes());
    datagram.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    datagram
}

pub fn tcp_frame(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
    ethernet_ipv4(6, src, dst, &tcp_segment(sport, dport, flags, payload))
}

pub fn udp_frame(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16, payload: &[u8]) -> Vec<u8> {
    ethernet_ipv4(17, src, dst, &udp_datagram(sport, dport, payload))
}

/// A DNS message with one question; `response` sets the QR bit
pub fn dns_message(id: u16, name: &str, response: bool) -> Vec<u8> {
    let flags: u16 = if response { 0x8180 } else { 0x0100 };
    let mut message = Vec::new();
    message.extend_from_slice(&id.to_be_bytes());
    message.extend_from_slice(&flags.to_be_bytes());
    message.extend_from_slice(&1u16.to_be_bytes());
    message.extend_from_slice(&(if response { 1u16 } else { 0 }).to_be_bytes());
    message.extend_from_slice(&[0, 0, 0, 0]);
    for label in name.split('.') {
        message.push(label.len() as u8);
        message.extend_from_slice(label.as_bytes());
    }
    message.extend_from_slice(&[0, 0, 1, 0, 1]);
    if response {
        message.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0x0e, 0x10, 0, 4, 93, 184, 216, 34]);
    }
    message
}

pub const SYN: u8 = 0x02;
pub const ACK: u8 = 0x10;
pub const PSH: u8 = 0x08;
pub const FIN: u8 = 0x01;

pub fn host(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, last)
}

/// A small capture exercising TCP, UDP/DNS and ARP
pub fn mixed_capture() -> Vec<u8> {
    let client = host(10);
    let server = host(20);
    let resolver = Ipv4Addr::new(8, 8, 8, 8);

    let mut arp = vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02, 0, 0, 0, 0, 0x01, 0x08, 0x06];
    arp.extend_from_slice(&[0, 1, 0x08, 0x00, 6, 4, 0, 1]);
    arp.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    arp.extend_from_slice(&client.octets());
    arp.extend_from_slice(&[0; 6]);
    arp.extend_from_slice(&server.octets());

    PcapBuilder::new(LINKTYPE_ETHERNET)
        .packet(1_700_000_000, 0, &arp)
        .packet(1_700_000_000, 100, &udp_frame(client, 51000, resolver, 53, &dns_message(7, "example.com", false)))
        .packet(1_700_000_000, 20_000, &udp_frame(resolver, 53, client, 51000, &dns_message(7, "example.com", true)))
        .packet(1_700_000_000, 30_000, &tcp_frame(client, 40000, server, 443, SYN, &[]))
        .packet(1_700_000_000, 40_000, &tcp_frame(server, 443, client, 40000, SYN | ACK, &[]))
        .packet(1_700_000_000, 50_000, &tcp_frame(client, 40000, server, 443, ACK, &[]))
        .packet(1_700_000_001, 0, &tcp_frame(client, 40000, server, 443, PSH | ACK, &[0x16; 200]))
        .packet(1_700_000_002, 0, &tcp_frame(server, 443, client, 40000, FIN | ACK, &[]))
        .build()
}
