//! DNS question extraction.

use thiserror::Error;

/// DNS well-known port
pub const DNS_PORT: u16 = 53;

const DNS_HEADER_LEN: usize = 12;
/// QR bit of the flags word; set on responses
const FLAG_RESPONSE: u16 = 0x8000;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 32;

/// Why a DNS message could not be read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("DNS message shorter than its {0}")]
    Truncated(&'static str),

    #[error("reserved DNS label type 0x{0:02x}")]
    BadLabelType(u8),

    #[error("DNS compression pointer to offset {0} is out of range")]
    BadPointer(usize),

    #[error("DNS compression pointers loop")]
    PointerLoop,

    #[error("DNS name longer than 255 bytes")]
    NameTooLong,
}

/// Whether either port is the DNS port
pub fn is_dns_port(source_port: u16, destination_port: u16) -> bool {
    source_port == DNS_PORT || destination_port == DNS_PORT
}

/// First question name of a DNS query message.
///
/// Returns `Ok(None)` for well-formed messages that are responses or carry no
/// question. Names are lower-cased.
pub fn query_name(message: &[u8]) -> Result<Option<String>, DnsError> {
    if message.len() < DNS_HEADER_LEN {
        return Err(DnsError::Truncated("header"));
    }

    let flags = u16::from_be_bytes([message[2], message[3]]);
    if flags & FLAG_RESPONSE != 0 {
        return Ok(None);
    }

    let question_count = u16::from_be_bytes([message[4], message[5]]);
    if question_count == 0 {
        return Ok(None);
    }

    read_name(message, DNS_HEADER_LEN).map(Some)
}

/// Same as [`query_name`] for a DNS-over-TCP segment, which starts with a 2-byte length
pub fn query_name_tcp(segment: &[u8]) -> Result<Option<String>, DnsError> {
    if segment.len() < 2 {
        return Err(DnsError::Truncated("TCP length prefix"));
    }
    let declared = u16::from_be_bytes([segment[0], segment[1]]) as usize;
    let end = (2 + declared).min(segment.len());
    query_name(&segment[2..end])
}

/// Decode a possibly compressed domain name starting at `start`
fn read_name(message: &[u8], start: usize) -> Result<String, DnsError> {
    let mut labels: Vec<String> = Vec::with_capacity(4);
    let mut pos = start;
    let mut jumps = 0;
    let mut name_len = 0;

    loop {
        let len = *message.get(pos).ok_or(DnsError::Truncated("question name"))? as usize;

        match len & 0xc0 {
            0x00 => {
                if len == 0 {
                    break;
                }
                let label = message
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(DnsError::Truncated("question label"))?;
                name_len += len + 1;
                if name_len > MAX_NAME_LEN {
                    return Err(DnsError::NameTooLong);
                }
                labels.push(label_text(label));
                pos += 1 + len;
            }
            0xc0 => {
                let low = *message
                    .get(pos + 1)
                    .ok_or(DnsError::Truncated("compression pointer"))? as usize;
                let target = ((len & 0x3f) << 8) | low;
                if target >= message.len() {
                    return Err(DnsError::BadPointer(target));
                }
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(DnsError::PointerLoop);
                }
                pos = target;
            }
            _ => return Err(DnsError::BadLabelType(len as u8)),
        }
    }

    if labels.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(labels.join("."))
    }
}

/// Printable form of one label, escaping bytes that are not plain text
fn label_text(label: &[u8]) -> String {
    let mut text = String::with_capacity(label.len());
    for &byte in label {
        if byte.is_ascii_graphic() && byte != b'.' && byte != b'\\' {
            text.push(byte.to_ascii_lowercase() as char);
        } else {
            text.push_str(&format!("\\{:03}", byte));
        }
    }
    text
}
