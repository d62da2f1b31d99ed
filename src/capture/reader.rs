//! Capture container reader.
//!
//! Drives `pcap_parser` over classic pcap (micro- and nanosecond, either byte
//! order) and pcapng, turning its blocks into a lazy sequence of owned
//! [`PacketRecord`]s with absolute byte offsets. Any framing problem is fatal:
//! the iterator yields one error and then stops.

use log::{debug, trace};
use pcap_parser::pcapng::{build_ts_resolution, Block};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::packet::{
    CaptureFormat, CaptureHeader, LinkType, PacketRecord, TimestampPrecision, Timestamp,
};
use crate::utils::error::{AnalyzerError, AnalyzerResult};

/// Classic pcap magic numbers, read little-endian
const PCAP_MAGIC_MICRO: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_MICRO_SWAPPED: u32 = 0xd4c3_b2a1;
const PCAP_MAGIC_NANO: u32 = 0xa1b2_3c4d;
const PCAP_MAGIC_NANO_SWAPPED: u32 = 0x4d3c_b2a1;
/// pcapng section header block type (a palindrome, so byte order does not matter)
const PCAPNG_SHB_TYPE: u32 = 0x0a0d_0d0a;
/// pcapng byte-order magic as the parser stores it for little-endian sections
const BYTE_ORDER_MAGIC: u32 = 0x1a2b_3c4d;
/// Pre-standard pcapng packet block, left to us by the parser as an unknown block
const BLOCK_OBSOLETE_PACKET: u32 = 0x0000_0002;

/// Parser buffer size; one block must fit in it
const BUFFER_SIZE: usize = 262144;
/// Byte offset of the classic global header's version field
const PCAP_VERSION_OFFSET: u64 = 4;
/// Byte offset of the pcapng section header's version field
const SHB_VERSION_OFFSET: u64 = 12;
/// `if_tsresol` default: microseconds
const DEFAULT_UNITS_PER_SECOND: u64 = 1_000_000;

/// How much of the source has been handed to the parser
#[derive(Debug, Default)]
struct SourceProgress {
    bytes_read: AtomicU64,
    exhausted: AtomicBool,
    error: Mutex<Option<io::Error>>,
}

impl SourceProgress {
    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    fn exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// The I/O error behind a parser `ReadError`
    fn take_error(&self) -> AnalyzerError {
        let stored = self.error.lock().ok().and_then(|mut slot| slot.take());
        AnalyzerError::Io(stored.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "capture source could not be read")
        }))
    }
}

/// Byte source handed to the parser.
///
/// Replays the magic number read during format detection, fills each buffer
/// as far as the source allows and records how much was delivered.
struct CaptureSource<R> {
    magic: [u8; 4],
    magic_pos: usize,
    inner: R,
    progress: Arc<SourceProgress>,
}

impl<R: Read> CaptureSource<R> {
    fn new(inner: R, progress: Arc<SourceProgress>) -> Self {
        Self {
            magic: [0; 4],
            magic_pos: 4,
            inner,
            progress,
        }
    }

    /// Read the 4-byte magic number; it is replayed to the parser afterwards
    fn read_magic(&mut self) -> AnalyzerResult<u32> {
        let mut magic = [0u8; 4];
        let mut read = 0;
        while read < magic.len() {
            match self.inner.read(&mut magic[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if read < magic.len() {
            return Err(AnalyzerError::format(
                0,
                format!("source holds {} bytes, too short for a capture magic number", read),
            ));
        }
        self.magic = magic;
        self.magic_pos = 0;
        Ok(u32::from_le_bytes(magic))
    }
}

impl<R: Read> Read for CaptureSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = if self.magic_pos < self.magic.len() {
                let pending = &self.magic[self.magic_pos..];
                let n = pending.len().min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&pending[..n]);
                self.magic_pos += n;
                n
            } else {
                match self.inner.read(&mut buf[filled..]) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let report = io::Error::new(e.kind(), e.to_string());
                        if let Ok(mut slot) = self.progress.error.lock() {
                            *slot = Some(e);
                        }
                        return Err(report);
                    }
                }
            };
            if n == 0 {
                self.progress.exhausted.store(true, Ordering::Relaxed);
                break;
            }
            filled += n;
        }
        self.progress
            .bytes_read
            .fetch_add(filled as u64, Ordering::Relaxed);
        Ok(filled)
    }
}

/// Interface described by a pcapng IDB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interface {
    link_type: LinkType,
    snaplen: u32,
    /// Timestamp ticks per second, from `if_tsresol`
    units_per_second: u64,
    /// Seconds added to every timestamp, from `if_tsoffset`
    offset_secs: i64,
}

impl Interface {
    fn timestamp(&self, high: u32, low: u32) -> Timestamp {
        let ticks = ((high as u128) << 32) | low as u128;
        let nanos = (ticks * 1_000_000_000 / self.units_per_second as u128) as i128
            + self.offset_secs as i128 * 1_000_000_000;
        Timestamp::from_nanos(nanos.clamp(0, u64::MAX as i128) as u64)
    }

    fn precision(&self) -> TimestampPrecision {
        if self.units_per_second > DEFAULT_UNITS_PER_SECOND {
            TimestampPrecision::Nano
        } else {
            TimestampPrecision::Micro
        }
    }
}

/// State of the current pcapng section
#[derive(Debug)]
struct Section {
    big_endian: bool,
    version: (u16, u16),
    interfaces: Vec<Interface>,
    /// Simple packet blocks carry no timestamp; they inherit the previous one
    last_timestamp: Timestamp,
}

impl Default for Section {
    fn default() -> Self {
        Self {
            big_endian: false,
            version: (1, 0),
            interfaces: Vec::new(),
            last_timestamp: Timestamp::default(),
        }
    }
}

impl Section {
    fn interface(&self, id: u32, offset: u64) -> AnalyzerResult<Interface> {
        self.interfaces.get(id as usize).copied().ok_or_else(|| {
            AnalyzerError::format(
                offset,
                format!(
                    "packet references interface {} but the section declares {}",
                    id,
                    self.interfaces.len()
                ),
            )
        })
    }

    fn packet(
        &mut self,
        iface: Interface,
        timestamp: Timestamp,
        captured_len: u32,
        original_len: u32,
        data: &[u8],
        offset: u64,
    ) -> AnalyzerResult<PacketRecord> {
        self.last_timestamp = timestamp;
        owned_record(timestamp, captured_len, original_len, iface.link_type, data, offset)
    }

    /// Interpret one pcapng block
    fn block(&mut self, block: Block, offset: u64) -> AnalyzerResult<Step> {
        match block {
            Block::SectionHeader(shb) => {
                if shb.major_version != 1 {
                    return Err(AnalyzerError::format(
                        offset + SHB_VERSION_OFFSET,
                        format!(
                            "unsupported pcapng version {}.{}",
                            shb.major_version, shb.minor_version
                        ),
                    ));
                }
                *self = Section {
                    big_endian: shb.bom != BYTE_ORDER_MAGIC,
                    version: (shb.major_version, shb.minor_version),
                    ..Section::default()
                };
                Ok(Step::Section)
            }
            Block::InterfaceDescription(idb) => {
                let units_per_second = match build_ts_resolution(idb.if_tsresol) {
                    Some(units) if units > 0 => units,
                    _ => {
                        debug!(
                            "Interface {} declares unusable if_tsresol {}, assuming microseconds",
                            self.interfaces.len(),
                            idb.if_tsresol
                        );
                        DEFAULT_UNITS_PER_SECOND
                    }
                };
                self.interfaces.push(Interface {
                    link_type: LinkType(idb.linktype.0 as u32 & 0xffff),
                    snaplen: idb.snaplen,
                    units_per_second,
                    offset_secs: idb.if_tsoffset as i64,
                });
                Ok(Step::Interface)
            }
            Block::EnhancedPacket(epb) => {
                let iface = self.interface(epb.if_id, offset)?;
                let timestamp = iface.timestamp(epb.ts_high, epb.ts_low);
                let record =
                    self.packet(iface, timestamp, epb.caplen, epb.origlen, epb.data, offset)?;
                Ok(Step::Record(record))
            }
            Block::SimplePacket(spb) => {
                let iface = self.interface(0, offset)?;
                let mut captured = spb.origlen.min(spb.data.len() as u32);
                if iface.snaplen > 0 {
                    captured = captured.min(iface.snaplen);
                }
                let timestamp = self.last_timestamp;
                let record = self.packet(iface, timestamp, captured, spb.origlen, spb.data, offset)?;
                Ok(Step::Record(record))
            }
            Block::Unknown(unknown) if unknown.block_type == BLOCK_OBSOLETE_PACKET => {
                self.obsolete_packet(unknown.data, offset)
            }
            _ => {
                trace!("Skipping pcapng block at byte {}", offset);
                Ok(Step::Skipped)
            }
        }
    }

    /// Obsolete packet block body: interface id, drops, timestamp, lengths, data
    fn obsolete_packet(&mut self, body: &[u8], offset: u64) -> AnalyzerResult<Step> {
        if body.len() < 20 {
            return Err(AnalyzerError::format(
                offset,
                format!("packet block body of {} bytes is too short", body.len()),
            ));
        }
        let big_endian = self.big_endian;
        let u32_at = |at: usize| {
            let raw = [body[at], body[at + 1], body[at + 2], body[at + 3]];
            if big_endian {
                u32::from_be_bytes(raw)
            } else {
                u32::from_le_bytes(raw)
            }
        };
        let if_id = if big_endian {
            u16::from_be_bytes([body[0], body[1]])
        } else {
            u16::from_le_bytes([body[0], body[1]])
        };

        let iface = self.interface(if_id as u32, offset)?;
        let timestamp = iface.timestamp(u32_at(4), u32_at(8));
        let record = self.packet(iface, timestamp, u32_at(12), u32_at(16), &body[20..], offset)?;
        Ok(Step::Record(record))
    }
}

/// What one parsed block turned out to be
#[derive(Debug)]
enum Step {
    /// Classic global header: version and snaplen
    LegacyHeader((u16, u16), u32),
    Section,
    Interface,
    Record(PacketRecord),
    Skipped,
    End,
}

/// Check the block lengths and copy the captured bytes out of the parser's buffer
fn owned_record(
    timestamp: Timestamp,
    captured_len: u32,
    original_len: u32,
    link_type: LinkType,
    data: &[u8],
    offset: u64,
) -> AnalyzerResult<PacketRecord> {
    if captured_len > original_len {
        return Err(AnalyzerError::format(
            offset,
            format!(
                "captured length {} exceeds original length {}",
                captured_len, original_len
            ),
        ));
    }
    let data = data.get(..captured_len as usize).ok_or_else(|| {
        AnalyzerError::format(
            offset,
            format!(
                "captured length {} overruns the {} bytes of the block",
                captured_len,
                data.len()
            ),
        )
    })?;

    Ok(PacketRecord {
        timestamp,
        captured_len,
        original_len,
        link_type,
        offset,
        data: data.to_vec(),
    })
}

/// Position of the parser in the byte stream
#[derive(Debug)]
struct StreamCursor {
    /// Bytes consumed so far; the offset of the next block
    consumed: u64,
    progress: Arc<SourceProgress>,
}

impl StreamCursor {
    fn advance(&mut self, len: usize) {
        self.consumed += len as u64;
    }

    /// Decide what an incomplete parse means.
    ///
    /// `Ok(true)` asks for a refill. `Ok(false)` is a clean end of stream.
    fn incomplete(&self) -> AnalyzerResult<bool> {
        if !self.progress.exhausted() {
            return Ok(true);
        }
        let remaining = self.progress.bytes_read().saturating_sub(self.consumed);
        if remaining == 0 {
            Ok(false)
        } else {
            Err(AnalyzerError::truncated(
                self.consumed,
                format!("block starts {} bytes before the end of the capture and is cut short", remaining),
            ))
        }
    }

    fn failure<I: fmt::Debug>(&self, error: &PcapError<I>) -> AnalyzerError {
        match error {
            PcapError::ReadError => self.progress.take_error(),
            PcapError::UnexpectedEof => {
                AnalyzerError::truncated(self.consumed, "capture ends inside a block")
            }
            other => AnalyzerError::format(self.consumed, other.to_string()),
        }
    }
}

/// Error from constructing a parser, which reads the file header
fn header_error<I: fmt::Debug>(error: &PcapError<I>, progress: &SourceProgress) -> AnalyzerError {
    match error {
        PcapError::Incomplete(_) | PcapError::UnexpectedEof => {
            AnalyzerError::truncated(0, "file header ends early")
        }
        PcapError::ReadError => progress.take_error(),
        other => AnalyzerError::format(0, other.to_string()),
    }
}

/// Per-format parser and its state
enum Container<R: Read> {
    Legacy {
        reader: LegacyPcapReader<CaptureSource<R>>,
        link_type: LinkType,
        precision: TimestampPrecision,
    },
    Ng {
        reader: PcapNGReader<CaptureSource<R>>,
        section: Section,
    },
}

impl<R: Read> Container<R> {
    /// Parse the next block and consume it
    fn step(&mut self, cursor: &mut StreamCursor) -> AnalyzerResult<Step> {
        match self {
            Container::Legacy {
                reader,
                link_type,
                precision,
            } => loop {
                let offset = cursor.consumed;
                match reader.next() {
                    Ok((len, block)) => {
                        let step = match block {
                            PcapBlockOwned::LegacyHeader(header) => {
                                if header.version_major != 2 {
                                    return Err(AnalyzerError::format(
                                        PCAP_VERSION_OFFSET,
                                        format!(
                                            "unsupported pcap version {}.{}",
                                            header.version_major, header.version_minor
                                        ),
                                    ));
                                }
                                // The upper bits of the link type field carry FCS information
                                *link_type = LinkType(header.network.0 as u32 & 0xffff);
                                *precision = if header.is_nanosecond_precision() {
                                    TimestampPrecision::Nano
                                } else {
                                    TimestampPrecision::Micro
                                };
                                Step::LegacyHeader(
                                    (header.version_major, header.version_minor),
                                    header.snaplen,
                                )
                            }
                            PcapBlockOwned::Legacy(packet) => {
                                let nanos = match *precision {
                                    TimestampPrecision::Micro => packet.ts_usec.saturating_mul(1_000),
                                    TimestampPrecision::Nano => packet.ts_usec,
                                };
                                Step::Record(owned_record(
                                    Timestamp::from_parts(packet.ts_sec as u64, nanos),
                                    packet.caplen,
                                    packet.origlen,
                                    *link_type,
                                    packet.data,
                                    offset,
                                )?)
                            }
                            _ => Step::Skipped,
                        };
                        reader.consume(len);
                        cursor.advance(len);
                        return Ok(step);
                    }
                    Err(PcapError::Eof) => return Ok(Step::End),
                    Err(PcapError::Incomplete(_)) => {
                        if !cursor.incomplete()? {
                            return Ok(Step::End);
                        }
                        reader.refill().map_err(|e| cursor.failure(&e))?;
                    }
                    Err(e) => return Err(cursor.failure(&e)),
                }
            },
            Container::Ng { reader, section } => loop {
                let offset = cursor.consumed;
                match reader.next() {
                    Ok((len, block)) => {
                        let step = match block {
                            PcapBlockOwned::NG(block) => section.block(block, offset)?,
                            _ => Step::Skipped,
                        };
                        reader.consume(len);
                        cursor.advance(len);
                        return Ok(step);
                    }
                    Err(PcapError::Eof) => return Ok(Step::End),
                    Err(PcapError::Incomplete(_)) => {
                        if !cursor.incomplete()? {
                            return Ok(Step::End);
                        }
                        reader.refill().map_err(|e| cursor.failure(&e))?;
                    }
                    Err(e) => return Err(cursor.failure(&e)),
                }
            },
        }
    }
}

/// Single-pass reader over a capture file
pub struct CaptureReader<R: Read> {
    container: Container<R>,
    cursor: StreamCursor,
    header: CaptureHeader,
    records_read: u64,
    finished: bool,
}

impl CaptureReader<File> {
    /// Open a capture file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> AnalyzerResult<Self> {
        let path = path.as_ref();
        debug!("Opening capture file {}", path.display());
        let file = File::open(path)?;
        Self::new(file)
    }
}

impl<R: Read> CaptureReader<R> {
    /// Create a reader, consuming and validating the container header
    pub fn new(source: R) -> AnalyzerResult<Self> {
        let progress = Arc::new(SourceProgress::default());
        let mut source = CaptureSource::new(source, progress.clone());
        let magic = source.read_magic()?;

        let cursor = StreamCursor {
            consumed: 0,
            progress: progress.clone(),
        };

        match magic {
            PCAP_MAGIC_MICRO | PCAP_MAGIC_MICRO_SWAPPED | PCAP_MAGIC_NANO
            | PCAP_MAGIC_NANO_SWAPPED => {
                let reader = LegacyPcapReader::new(BUFFER_SIZE, source)
                    .map_err(|e| header_error(&e, &progress))?;
                let big_endian = is_swapped_magic(magic);
                Self::new_legacy(reader, cursor, magic, big_endian)
            }
            PCAPNG_SHB_TYPE => {
                let reader = PcapNGReader::new(BUFFER_SIZE, source)
                    .map_err(|e| header_error(&e, &progress))?;
                Self::new_pcapng(reader, cursor)
            }
            _ => Err(AnalyzerError::format(
                0,
                format!("unrecognized capture magic 0x{:08x}", magic),
            )),
        }
    }

    fn new_legacy(
        reader: LegacyPcapReader<CaptureSource<R>>,
        mut cursor: StreamCursor,
        magic: u32,
        big_endian: bool,
    ) -> AnalyzerResult<Self> {
        let mut container = Container::Legacy {
            reader,
            link_type: LinkType::ETHERNET,
            precision: TimestampPrecision::Micro,
        };

        // The parser hands the global header out as the first block
        let ((version_major, version_minor), snaplen) = match container.step(&mut cursor)? {
            Step::LegacyHeader(version, snaplen) => (version, snaplen),
            _ => return Err(AnalyzerError::format(0, "pcap global header missing")),
        };

        let (link_type, precision) = match &container {
            Container::Legacy {
                link_type,
                precision,
                ..
            } => (*link_type, *precision),
            Container::Ng { .. } => (LinkType::ETHERNET, TimestampPrecision::Micro),
        };

        debug!(
            "Classic pcap v{}.{}, {} endian, {:?} timestamps, snaplen {}, link type {}",
            version_major,
            version_minor,
            if big_endian { "big" } else { "little" },
            precision,
            snaplen,
            link_type
        );

        let header = CaptureHeader {
            format: CaptureFormat::Pcap,
            magic,
            version_major,
            version_minor,
            snaplen,
            link_type,
            precision,
            big_endian,
        };

        Ok(Self {
            container,
            cursor,
            header,
            records_read: 0,
            finished: false,
        })
    }

    fn new_pcapng(
        reader: PcapNGReader<CaptureSource<R>>,
        mut cursor: StreamCursor,
    ) -> AnalyzerResult<Self> {
        let mut container = Container::Ng {
            reader,
            section: Section::default(),
        };

        // Interface descriptions precede the packets that reference them; read
        // ahead to the first one so the header can report a link type.
        loop {
            match container.step(&mut cursor)? {
                Step::Interface | Step::End => break,
                Step::LegacyHeader(..) | Step::Section | Step::Skipped => continue,
                Step::Record(record) => {
                    return Err(AnalyzerError::format(
                        record.offset,
                        "packet block precedes every interface description",
                    ))
                }
            }
        }

        let (section_version, big_endian, first) = match &container {
            Container::Ng { section, .. } => (
                section.version,
                section.big_endian,
                section.interfaces.first().copied(),
            ),
            Container::Legacy { .. } => ((1, 0), false, None),
        };

        let (link_type, snaplen, precision) = match first {
            Some(iface) => (iface.link_type, iface.snaplen, iface.precision()),
            None => {
                debug!("pcapng section declares no interfaces");
                (LinkType::ETHERNET, 0, TimestampPrecision::Micro)
            }
        };

        debug!(
            "pcapng v{}.{}, {} endian, first interface link type {}, {:?} timestamps",
            section_version.0,
            section_version.1,
            if big_endian { "big" } else { "little" },
            link_type,
            precision
        );

        let header = CaptureHeader {
            format: CaptureFormat::PcapNg,
            magic: PCAPNG_SHB_TYPE,
            version_major: section_version.0,
            version_minor: section_version.1,
            snaplen,
            link_type,
            precision,
            big_endian,
        };

        Ok(Self {
            container,
            cursor,
            header,
            records_read: 0,
            finished: false,
        })
    }

    /// Container header read at stream start
    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// Number of packet records yielded so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Byte offset of the next block in the source
    pub fn offset(&self) -> u64 {
        self.cursor.consumed
    }

    /// Read the next packet record.
    ///
    /// Returns `Ok(None)` at a clean end of stream.
    pub fn next_record(&mut self) -> AnalyzerResult<Option<PacketRecord>> {
        while !self.finished {
            match self.container.step(&mut self.cursor) {
                Ok(Step::Record(record)) => {
                    self.records_read += 1;
                    trace!(
                        "Record {} at byte {}: {} of {} bytes",
                        self.records_read,
                        record.offset,
                        record.captured_len,
                        record.original_len
                    );
                    return Ok(Some(record));
                }
                Ok(Step::End) => self.finished = true,
                Ok(_) => continue,
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = AnalyzerResult<PacketRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Classic magic written by a big-endian host
fn is_swapped_magic(magic: u32) -> bool {
    matches!(magic, PCAP_MAGIC_MICRO_SWAPPED | PCAP_MAGIC_NANO_SWAPPED)
}
