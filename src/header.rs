//! On-disk layout of a capture file.
//!
//! A capture file is the classic tcpdump layout: one fixed file header
//! followed by packet records laid end to end.
//!
//! ```text
//! offset 0   FileHeader   (24 bytes)
//! offset 24  RecordHeader (16 bytes) + stored payload
//!            RecordHeader (16 bytes) + stored payload
//!            ...
//! ```
//!
//! Every field is written in host byte order. A reader that sees
//! [`SWAPPED_MAGIC`] instead of [`MAGIC`] must byte-swap every field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::capture::{CaptureError, Result};

/// Magic number as seen by a reader with the writer's byte order.
pub const MAGIC: u32 = 0xa1b2_c3d4;

/// Magic number as seen by a reader with the opposite byte order.
pub const SWAPPED_MAGIC: u32 = 0xd4c3_b2a1;

/// Format major version.
pub const VERSION_MAJOR: u16 = 2;

/// Format minor version.
pub const VERSION_MINOR: u16 = 4;

/// Size of the file header in bytes.
pub const FILE_HEADER_SIZE: usize = 24;

/// Size of a packet record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 16;

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Link-layer type tag stored in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    /// No link-layer header.
    Null,
    /// Ethernet II frames.
    #[default]
    Ethernet,
    /// Point-to-point protocol.
    Ppp,
    /// Raw IP packets.
    Ip,
    /// Cisco HDLC.
    Hdlc,
}

impl PacketType {
    /// All packet types, in code order.
    pub const ALL: [PacketType; 5] = [
        PacketType::Null,
        PacketType::Ethernet,
        PacketType::Ppp,
        PacketType::Ip,
        PacketType::Hdlc,
    ];

    /// Numeric code written to the file header.
    pub const fn code(self) -> u32 {
        match self {
            PacketType::Null => 0,
            PacketType::Ethernet => 1,
            PacketType::Ppp => 9,
            PacketType::Ip => 12,
            PacketType::Hdlc => 104,
        }
    }

    /// Looks up a packet type by its numeric code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Lowercase name, as accepted by [`FromStr`].
    pub const fn name(self) -> &'static str {
        match self {
            PacketType::Null => "null",
            PacketType::Ethernet => "ethernet",
            PacketType::Ppp => "ppp",
            PacketType::Ip => "ip",
            PacketType::Hdlc => "hdlc",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PacketType {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CaptureError::Config(format!("unknown packet type: {s}")))
    }
}

/// The fixed header at offset 0 of every capture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format major version.
    pub major_version: u16,
    /// Format minor version.
    pub minor_version: u16,
    /// Time zone offset from GMT, always 0 when written here.
    pub time_zone: u32,
    /// Timestamp accuracy hint, always 0 when written here.
    pub sigfigs: u32,
    /// Largest packet size the file advertises.
    pub max_packet_size: u32,
    /// Link-layer type of every record.
    pub packet_type: PacketType,
    /// Whether the file was written with the opposite byte order.
    pub byte_swapped: bool,
}

impl FileHeader {
    /// Creates a header for a new capture file.
    pub fn new(packet_type: PacketType, max_packet_size: u32) -> Self {
        Self {
            major_version: VERSION_MAJOR,
            minor_version: VERSION_MINOR,
            time_zone: 0,
            sigfigs: 0,
            max_packet_size,
            packet_type,
            byte_swapped: false,
        }
    }

    /// Serializes the header in host byte order.
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_ne_bytes());
        buf[4..6].copy_from_slice(&self.major_version.to_ne_bytes());
        buf[6..8].copy_from_slice(&self.minor_version.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.time_zone.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.sigfigs.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.max_packet_size.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.packet_type.code().to_ne_bytes());
        buf
    }

    /// Parses a header, accepting either byte order.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::InvalidFormat` if the buffer is shorter than
    /// [`FILE_HEADER_SIZE`], the magic is unknown, or the packet type code
    /// is not one of the supported link types.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(CaptureError::InvalidFormat {
                reason: format!(
                    "file header needs {FILE_HEADER_SIZE} bytes, have {}",
                    data.len()
                ),
            });
        }

        let byte_swapped = match read_u32(data, 0, false) {
            MAGIC => false,
            SWAPPED_MAGIC => true,
            other => {
                return Err(CaptureError::InvalidFormat {
                    reason: format!("unknown magic: 0x{other:08x}"),
                })
            }
        };

        let code = read_u32(data, 20, byte_swapped);
        let packet_type = PacketType::from_code(code).ok_or_else(|| CaptureError::InvalidFormat {
            reason: format!("unsupported packet type code: {code}"),
        })?;

        Ok(Self {
            major_version: read_u16(data, 4, byte_swapped),
            minor_version: read_u16(data, 6, byte_swapped),
            time_zone: read_u32(data, 8, byte_swapped),
            sigfigs: read_u32(data, 12, byte_swapped),
            max_packet_size: read_u32(data, 16, byte_swapped),
            packet_type,
            byte_swapped,
        })
    }
}

/// Header preceding each packet's stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    /// Whole seconds of the capture timestamp.
    pub time_in_sec: u32,
    /// Microsecond remainder of the capture timestamp.
    pub time_in_usec: u32,
    /// Bytes of the packet stored in the file.
    pub n_packet_bytes_stored_in_file: u32,
    /// Length of the packet on the wire.
    pub n_bytes_in_packet: u32,
}

impl RecordHeader {
    /// Builds a record header from a timestamp in seconds.
    ///
    /// The fractional part is rounded to the nearest microsecond, carrying
    /// into the seconds field when it rounds up to a full second. Negative
    /// and NaN timestamps are recorded as zero; timestamps past the range of
    /// the seconds field saturate.
    pub fn from_timestamp(timestamp: f64, stored: u32, original: u32) -> Self {
        let (time_in_sec, time_in_usec) = split_timestamp(timestamp);
        Self {
            time_in_sec,
            time_in_usec,
            n_packet_bytes_stored_in_file: stored,
            n_bytes_in_packet: original,
        }
    }

    /// Serializes the record header in host byte order.
    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.time_in_sec.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.time_in_usec.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.n_packet_bytes_stored_in_file.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.n_bytes_in_packet.to_ne_bytes());
        buf
    }

    /// Parses a record header; `None` if `data` is too short.
    pub fn decode(data: &[u8], byte_swapped: bool) -> Option<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return None;
        }
        Some(Self {
            time_in_sec: read_u32(data, 0, byte_swapped),
            time_in_usec: read_u32(data, 4, byte_swapped),
            n_packet_bytes_stored_in_file: read_u32(data, 8, byte_swapped),
            n_bytes_in_packet: read_u32(data, 12, byte_swapped),
        })
    }

    /// Timestamp as fractional seconds.
    pub fn timestamp(&self) -> f64 {
        f64::from(self.time_in_sec) + f64::from(self.time_in_usec) / MICROS_PER_SEC
    }

    /// Bytes this record occupies in the file, header included.
    pub fn footprint(&self) -> usize {
        RECORD_HEADER_SIZE + self.n_packet_bytes_stored_in_file as usize
    }
}

fn split_timestamp(timestamp: f64) -> (u32, u32) {
    if timestamp.is_nan() || timestamp <= 0.0 {
        return (0, 0);
    }
    let whole = timestamp.floor();
    if whole >= f64::from(u32::MAX) {
        return (u32::MAX, 0);
    }
    let secs = whole as u32;
    let micros = (MICROS_PER_SEC * (timestamp - whole)).round() as u32;
    if micros >= 1_000_000 {
        (secs.saturating_add(1), 0)
    } else {
        (secs, micros)
    }
}

fn read_u16(data: &[u8], offset: usize, swapped: bool) -> u16 {
    let raw = u16::from_ne_bytes([data[offset], data[offset + 1]]);
    if swapped {
        raw.swap_bytes()
    } else {
        raw
    }
}

fn read_u32(data: &[u8], offset: usize, swapped: bool) -> u32 {
    let raw = u32::from_ne_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]);
    if swapped {
        raw.swap_bytes()
    } else {
        raw
    }
}
