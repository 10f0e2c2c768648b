//! Synthetic packet generation for testing
//!
//! Generates Ethernet/IPv4/UDP frames with known payloads and splits them into
//! segmented buffer chains, so the capture path can be exercised without a
//! live network.
//!
//! # Example
//!
//! ```rust,ignore
//! use mpcap::test_utils::PacketGenerator;
//!
//! let mut gen = PacketGenerator::default();
//!
//! // One 128-byte UDP payload, as a single contiguous frame
//! let frame = gen.udp_frame(128);
//!
//! // The same kind of frame split into 64-byte segments
//! let chain = gen.udp_chain(1400, 64);
//! ```

/// Length of an Ethernet II header.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Length of an IPv4 header without options.
pub const IPV4_HEADER_LEN: usize = 20;

/// Length of a UDP header.
pub const UDP_HEADER_LEN: usize = 8;

/// Bytes in front of the UDP payload of a generated frame.
pub const FRAME_OVERHEAD: usize = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN;

/// Ethernet II header builder
#[derive(Debug, Clone)]
pub struct EthernetHeader {
    /// Destination MAC address
    pub dst: [u8; 6],
    /// Source MAC address
    pub src: [u8; 6],
    /// EtherType (0x0800 for IPv4)
    pub ether_type: u16,
}

impl EthernetHeader {
    /// IPv4 frame between two locally administered addresses
    pub fn ipv4() -> Self {
        Self {
            dst: [0x02, 0x00, 0x00, 0x00, 0x00, 0x02],
            src: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            ether_type: 0x0800,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ETHERNET_HEADER_LEN);
        bytes.extend_from_slice(&self.dst);
        bytes.extend_from_slice(&self.src);
        bytes.extend_from_slice(&self.ether_type.to_be_bytes());
        bytes
    }
}

/// IPv4 + UDP header builder
#[derive(Debug, Clone)]
pub struct UdpHeader {
    /// Source IPv4 address
    pub src_ip: [u8; 4],
    /// Destination IPv4 address
    pub dst_ip: [u8; 4],
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// IPv4 identification field
    pub ident: u16,
}

impl UdpHeader {
    /// Serialize IPv4 and UDP headers for a payload of `payload_len` bytes
    pub fn to_bytes(&self, payload_len: usize) -> Vec<u8> {
        let udp_len = (UDP_HEADER_LEN + payload_len) as u16;
        let total_len = (IPV4_HEADER_LEN + UDP_HEADER_LEN + payload_len) as u16;

        let mut bytes = Vec::with_capacity(IPV4_HEADER_LEN + UDP_HEADER_LEN);

        // IPv4: version 4, IHL 5
        bytes.push(0x45);
        bytes.push(0x00);
        bytes.extend_from_slice(&total_len.to_be_bytes());
        bytes.extend_from_slice(&self.ident.to_be_bytes());
        bytes.extend_from_slice(&[0x40, 0x00]); // Don't fragment
        bytes.push(64); // TTL
        bytes.push(17); // UDP
        bytes.extend_from_slice(&[0x00, 0x00]); // Checksum placeholder
        bytes.extend_from_slice(&self.src_ip);
        bytes.extend_from_slice(&self.dst_ip);

        let checksum = ipv4_checksum(&bytes);
        bytes[10..12].copy_from_slice(&checksum.to_be_bytes());

        // UDP, checksum 0 (not computed)
        bytes.extend_from_slice(&self.src_port.to_be_bytes());
        bytes.extend_from_slice(&self.dst_port.to_be_bytes());
        bytes.extend_from_slice(&udp_len.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x00]);

        bytes
    }
}

/// Internet checksum over an IPv4 header
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| {
            let hi = u32::from(pair[0]) << 8;
            let lo = pair.get(1).copied().map_or(0, u32::from);
            hi | lo
        })
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Generates synthetic UDP frames for testing
pub struct PacketGenerator {
    /// Base source port; the generator cycles through 16 ports from here
    pub base_port: u16,
    /// Frames generated so far (drives IP ident and payload pattern)
    sequence: u16,
}

impl Default for PacketGenerator {
    fn default() -> Self {
        Self::new(40000)
    }
}

impl PacketGenerator {
    /// Create a new packet generator with the given base source port
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            sequence: 0,
        }
    }

    /// Number of frames generated so far
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Generate one contiguous Ethernet/IPv4/UDP frame with `payload_len` payload bytes
    ///
    /// The payload is a counting pattern starting at the frame's sequence number,
    /// so every byte of a frame is predictable.
    pub fn udp_frame(&mut self, payload_len: usize) -> Vec<u8> {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let udp = UdpHeader {
            src_ip: [10, 0, 0, 1],
            dst_ip: [10, 0, 0, 2],
            src_port: self.base_port.wrapping_add(seq % 16),
            dst_port: 4789,
            ident: seq,
        };

        let mut frame = EthernetHeader::ipv4().to_bytes();
        frame.extend_from_slice(&udp.to_bytes(payload_len));
        frame.extend(payload_pattern(seq, payload_len));
        frame
    }

    /// Generate a frame and split it into segments of at most `segment_size` bytes
    pub fn udp_chain(&mut self, payload_len: usize, segment_size: usize) -> Vec<Vec<u8>> {
        let frame = self.udp_frame(payload_len);
        segment(&frame, segment_size)
    }
}

/// Split `data` into segments of at most `segment_size` bytes
///
/// A zero `segment_size` yields the whole buffer as one segment.
pub fn segment(data: &[u8], segment_size: usize) -> Vec<Vec<u8>> {
    if segment_size == 0 || data.is_empty() {
        return vec![data.to_vec()];
    }
    data.chunks(segment_size).map(<[u8]>::to_vec).collect()
}

fn payload_pattern(seq: u16, len: usize) -> impl Iterator<Item = u8> {
    let start = seq as usize;
    (0..len).map(move |i| ((start + i) & 0xFF) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ethernet_header_layout() {
        let bytes = EthernetHeader::ipv4().to_bytes();
        assert_eq!(bytes.len(), ETHERNET_HEADER_LEN);
        assert_eq!(&bytes[12..14], &[0x08, 0x00]);
    }

    #[test]
    fn test_ipv4_checksum_validates() {
        let header = UdpHeader {
            src_ip: [192, 168, 1, 1],
            dst_ip: [192, 168, 1, 2],
            src_port: 1234,
            dst_port: 53,
            ident: 7,
        }
        .to_bytes(100);

        // Re-summing a header that carries its checksum gives zero
        assert_eq!(ipv4_checksum(&header[..IPV4_HEADER_LEN]), 0);
    }

    #[test]
    fn test_udp_frame_size() {
        let mut gen = PacketGenerator::default();
        let frame = gen.udp_frame(128);
        assert_eq!(frame.len(), FRAME_OVERHEAD + 128);

        let total_len = u16::from_be_bytes([frame[16], frame[17]]);
        assert_eq!(total_len as usize, IPV4_HEADER_LEN + UDP_HEADER_LEN + 128);
    }

    #[test]
    fn test_payload_pattern_follows_sequence() {
        let mut gen = PacketGenerator::default();
        let first = gen.udp_frame(4);
        let second = gen.udp_frame(4);

        assert_eq!(&first[FRAME_OVERHEAD..], &[0, 1, 2, 3]);
        assert_eq!(&second[FRAME_OVERHEAD..], &[1, 2, 3, 4]);
        assert_eq!(gen.sequence(), 2);
    }

    #[test]
    fn test_chain_reassembles_to_frame() {
        let mut a = PacketGenerator::new(5000);
        let mut b = PacketGenerator::new(5000);

        let chain = a.udp_chain(300, 64);
        let frame = b.udp_frame(300);

        assert_eq!(chain.len(), frame.len().div_ceil(64));
        assert!(chain.iter().all(|s| s.len() <= 64));
        assert_eq!(chain.concat(), frame);
    }

    #[test]
    fn test_segment_zero_size() {
        let data = vec![1u8; 10];
        assert_eq!(segment(&data, 0), vec![data.clone()]);
    }
}
