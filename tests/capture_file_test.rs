//! Integration tests for the on-disk capture file.
//!
//! Drives full capture runs through the public API and checks the finished
//! file byte by byte:
//! ```text
//! init → add_buffer × N → close → file on disk → map
//! ```

use mpcap::test_utils::{PacketGenerator, FRAME_OVERHEAD};
use mpcap::{
    init, map, AppendOutcome, BufferChain, CaptureConfig, PacketType, Segment, FILE_HEADER_SIZE,
    RECORD_HEADER_SIZE,
};
use std::path::{Path, PathBuf};

/// One record parsed straight from file bytes, independent of `map`.
#[derive(Debug)]
struct ParsedRecord {
    sec: u32,
    usec: u32,
    stored: u32,
    original: u32,
    data: Vec<u8>,
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

/// Parse a finished capture file as header + contiguous records.
fn parse_file(path: &Path) -> Vec<ParsedRecord> {
    let bytes = std::fs::read(path).unwrap();
    assert!(bytes.len() >= FILE_HEADER_SIZE);
    assert_eq!(u32_at(&bytes, 0), 0xa1b2_c3d4);

    let mut records = Vec::new();
    let mut offset = FILE_HEADER_SIZE;
    while offset < bytes.len() {
        let stored = u32_at(&bytes, offset + 8);
        let start = offset + RECORD_HEADER_SIZE;
        let end = start + stored as usize;
        assert!(end <= bytes.len(), "record at {offset} runs past end of file");
        records.push(ParsedRecord {
            sec: u32_at(&bytes, offset),
            usec: u32_at(&bytes, offset + 4),
            stored,
            original: u32_at(&bytes, offset + 12),
            data: bytes[start..end].to_vec(),
        });
        offset = end;
    }
    records
}

fn capture_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

// ============================================================================
// Worked Example
// ============================================================================

#[test]
fn test_two_packet_capture_example() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "example.pcap");
    let config = CaptureConfig::new(&path)
        .with_max_file_size(1024)
        .with_packets_to_capture(2);
    let session = init(config).unwrap();

    let first = vec![0x11u8; 40];
    assert_eq!(session.add_buffer(1.5, &first, 1500), AppendOutcome::Written);
    assert!(session.is_open());

    let second = vec![0x22u8; 2000];
    assert_eq!(session.add_buffer(2.0, &second, 100), AppendOutcome::Written);

    // Target count reached: closed without an explicit close()
    assert!(!session.is_open());
    let expected = FILE_HEADER_SIZE + (16 + 40) + (16 + 100);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), expected as u64);

    let records = parse_file(&path);
    assert_eq!(records.len(), 2);

    assert_eq!(records[0].sec, 1);
    assert_eq!(records[0].usec, 500_000);
    assert_eq!(records[0].original, 40);
    assert_eq!(records[0].data, first);

    assert_eq!(records[1].stored, 100);
    assert_eq!(records[1].original, 2000);
    assert_eq!(records[1].data, vec![0x22u8; 100]);
}

// ============================================================================
// File Properties
// ============================================================================

#[test]
fn test_file_holds_every_written_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "many.pcap");
    let session = init(
        CaptureConfig::new(&path)
            .with_max_file_size(16 * 1024)
            .with_packets_to_capture(1_000),
    )
    .unwrap();

    let mut gen = PacketGenerator::default();
    let mut written = 0;
    let mut expected_size = FILE_HEADER_SIZE;
    for i in 0..500usize {
        let chain = gen.udp_chain(i % 300, 48);
        let snaplen = 96;
        let outcome = session.add_buffer(i as f64 * 0.001, &chain[..], snaplen);
        if outcome.is_written() {
            written += 1;
            expected_size += RECORD_HEADER_SIZE + (FRAME_OVERHEAD + i % 300).min(snaplen);
        }
    }
    session.close().unwrap();

    let records = parse_file(&path);
    assert_eq!(records.len(), written);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), expected_size as u64);
    assert!(expected_size <= 16 * 1024);

    for record in &records {
        assert!(record.original >= record.stored);
        assert_eq!(record.data.len(), record.stored as usize);
    }
}

#[test]
fn test_close_twice_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "twice.pcap");
    let session = init(CaptureConfig::new(&path)).unwrap();
    session.add_buffer(5.0, &vec![9u8; 33], 1500);

    session.close().unwrap();
    let once = std::fs::read(&path).unwrap();
    session.close().unwrap();
    let twice = std::fs::read(&path).unwrap();

    assert_eq!(once, twice);
}

#[test]
fn test_exact_fill_then_one_byte_more() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "fill.pcap");
    let capacity = FILE_HEADER_SIZE + 2 * (16 + 100);
    let session = init(
        CaptureConfig::new(&path)
            .with_max_file_size(capacity as u64)
            .with_packets_to_capture(10),
    )
    .unwrap();

    assert!(session.add_buffer(1.0, &vec![1u8; 100], 100).is_written());
    // Exactly the remaining capacity
    assert!(session.add_buffer(2.0, &vec![2u8; 100], 100).is_written());
    assert!(session.is_open());

    assert_eq!(
        session.add_buffer(3.0, &vec![3u8; 1], 1),
        AppendOutcome::OutOfSpace
    );
    assert!(!session.is_open());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), capacity as u64);
}

#[test]
fn test_one_byte_over_remaining_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "over.pcap");
    let capacity = FILE_HEADER_SIZE + 16 + 100;
    let session = init(CaptureConfig::new(&path).with_max_file_size(capacity as u64)).unwrap();

    assert_eq!(
        session.add_buffer(1.0, &vec![1u8; 101], 101),
        AppendOutcome::OutOfSpace
    );

    // Exhaustion is terminal but never an error
    for _ in 0..5 {
        assert_eq!(
            session.add_buffer(1.0, &vec![1u8; 10], 10),
            AppendOutcome::Closed
        );
    }
    assert!(session.close().is_ok());
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        FILE_HEADER_SIZE as u64
    );
}

#[test]
fn test_timestamp_rounding_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "round.pcap");
    let session = init(CaptureConfig::new(&path)).unwrap();

    session.add_buffer(2.000_000_5, &vec![0u8; 8], 8);
    session.add_buffer(1_700_000_123.654_321, &vec![0u8; 8], 8);
    session.close().unwrap();

    let records = parse_file(&path);
    assert_eq!(records[0].sec, 2);
    assert!(records[0].usec <= 1);
    assert_eq!(records[1].sec, 1_700_000_123);
    assert!(records[1].usec.abs_diff(654_321) <= 1);
}

// ============================================================================
// Segmented And Malformed Chains
// ============================================================================

/// Chain whose last segment claims a successor that never arrives.
struct DanglingChain {
    head: Vec<u8>,
    claimed_length: usize,
}

impl BufferChain for DanglingChain {
    fn total_length(&self) -> usize {
        self.claimed_length
    }

    fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        std::iter::once(Segment::new(&self.head, true))
    }
}

#[test]
fn test_segmented_frame_stored_contiguously() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "segments.pcap");
    let session = init(CaptureConfig::new(&path)).unwrap();

    let mut gen = PacketGenerator::default();
    let chain = gen.udp_chain(500, 128);
    let frame = chain.concat();
    session.add_buffer(1.0, &chain[..], 1500);
    session.close().unwrap();

    let records = parse_file(&path);
    assert_eq!(records[0].data, frame);
}

#[test]
fn test_dangling_chain_keeps_file_parseable() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "dangling.pcap");
    let session = init(CaptureConfig::new(&path)).unwrap();

    let chain = DanglingChain {
        head: vec![0xABu8; 10],
        claimed_length: 30,
    };
    assert!(session.add_buffer(1.0, &chain, 1500).is_written());
    assert!(session.add_buffer(2.0, &vec![0xCDu8; 5], 1500).is_written());
    session.close().unwrap();

    let records = parse_file(&path);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].stored, 30);
    assert_eq!(&records[0].data[..10], &[0xABu8; 10]);
    assert_eq!(&records[0].data[10..], &[0u8; 20]);
    assert_eq!(records[1].data, vec![0xCDu8; 5]);
}

// ============================================================================
// Mapping Finished Files
// ============================================================================

#[test]
fn test_map_agrees_with_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = capture_path(&dir, "agree.pcap");
    let session = init(
        CaptureConfig::new(&path)
            .with_packet_type(PacketType::Ip)
            .with_packets_to_capture(25),
    )
    .unwrap();

    let mut gen = PacketGenerator::default();
    while session.is_open() {
        let frame = gen.udp_frame(usize::from(gen.sequence()) * 10);
        session.add_buffer(f64::from(gen.sequence()), &frame, 256);
    }
    let status = session.status();

    let capture = map(&path).unwrap();
    assert_eq!(capture.header().packet_type, PacketType::Ip);
    assert_eq!(capture.packet_count(), u64::from(status.packets_captured));
    assert_eq!(capture.packet_count(), 25);
    assert_eq!(capture.file_len() as u64, status.file_bytes_used);
    assert_eq!(capture.min_packet_bytes(), status.min_packet_bytes);
    assert_eq!(capture.max_packet_bytes(), status.max_packet_bytes);

    let stored: u64 = capture
        .records()
        .map(|(h, _)| u64::from(h.n_packet_bytes_stored_in_file))
        .sum();
    assert_eq!(stored, status.bytes_written);
}

#[test]
fn test_independent_sessions_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let a = init(CaptureConfig::new(capture_path(&dir, "a.pcap"))).unwrap();
    let b = init(
        CaptureConfig::new(capture_path(&dir, "b.pcap")).with_packet_type(PacketType::Hdlc),
    )
    .unwrap();

    a.add_buffer(1.0, &vec![1u8; 10], 10);
    b.add_buffer(1.0, &vec![2u8; 20], 20);
    b.add_buffer(2.0, &vec![2u8; 20], 20);
    a.close().unwrap();
    b.close().unwrap();

    assert_eq!(map(a.path()).unwrap().packet_count(), 1);
    let mapped_b = map(b.path()).unwrap();
    assert_eq!(mapped_b.packet_count(), 2);
    assert_eq!(mapped_b.header().packet_type, PacketType::Hdlc);
}
