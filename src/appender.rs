//! Per-session mutable state and the record append path.

use std::fs::File;
use std::path::PathBuf;

use crate::chain::{flatten, BufferChain};
use crate::header::{RecordHeader, RECORD_HEADER_SIZE};
use crate::region::CaptureRegion;

/// What happened to a packet handed to the capture path.
///
/// Only [`Written`](AppendOutcome::Written) means a record was stored. The
/// other variants are normal end-of-capture conditions, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The packet was recorded.
    Written,
    /// The session was already closed; nothing was recorded.
    Closed,
    /// The record did not fit; the session has been closed.
    OutOfSpace,
    /// Another producer was appending to an unlocked session; nothing was recorded.
    Contended,
}

impl AppendOutcome {
    /// Whether a record was stored.
    pub fn is_written(self) -> bool {
        self == AppendOutcome::Written
    }
}

/// Everything about a session that changes while it runs.
pub(crate) struct SessionState {
    pub(crate) path: PathBuf,
    pub(crate) region: Option<CaptureRegion>,
    pub(crate) file: Option<File>,
    pub(crate) open: bool,
    pub(crate) packets_to_capture: u32,
    pub(crate) packets_captured: u32,
    pub(crate) bytes_written: u64,
    pub(crate) file_bytes_used: u64,
    pub(crate) min_packet_bytes: u32,
    pub(crate) max_packet_bytes: u32,
}

impl SessionState {
    /// State for a freshly initialized file whose header is already in `region`.
    pub(crate) fn new(
        path: PathBuf,
        region: CaptureRegion,
        file: File,
        packets_to_capture: u32,
    ) -> Self {
        Self {
            path,
            file_bytes_used: region.cursor() as u64,
            region: Some(region),
            file: Some(file),
            open: true,
            packets_to_capture,
            packets_captured: 0,
            bytes_written: 0,
            min_packet_bytes: 0,
            max_packet_bytes: 0,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn packets_captured(&self) -> u32 {
        self.packets_captured
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub(crate) fn file_bytes_used(&self) -> u64 {
        self.region
            .as_ref()
            .map_or(self.file_bytes_used, |r| r.cursor() as u64)
    }

    pub(crate) fn min_packet_bytes(&self) -> u32 {
        self.min_packet_bytes
    }

    pub(crate) fn max_packet_bytes(&self) -> u32 {
        self.max_packet_bytes
    }

    /// Appends one record: a 16-byte header followed by at most `max_bytes`
    /// of the packet.
    ///
    /// The space check uses the length the chain reports, before anything is
    /// copied, so a record is either written whole or not at all. A record
    /// that does not fit closes the session. Reaching the target packet count
    /// also closes it, after the record is stored.
    pub(crate) fn append<C>(&mut self, timestamp: f64, chain: &C, max_bytes: usize) -> AppendOutcome
    where
        C: BufferChain + ?Sized,
    {
        if !self.open {
            return AppendOutcome::Closed;
        }
        let Some(region) = self.region.as_mut() else {
            return AppendOutcome::Closed;
        };

        let original = chain.total_length();
        let n_captured = original.min(max_bytes).min(u32::MAX as usize);
        let footprint = RECORD_HEADER_SIZE.saturating_add(n_captured);

        let Some(record) = region.reserve(footprint) else {
            log::debug!(
                "Capture file {} full: {} byte record, {} bytes left",
                self.path.display(),
                footprint,
                region.remaining()
            );
            self.close_quietly();
            return AppendOutcome::OutOfSpace;
        };

        let original = u32::try_from(original).unwrap_or(u32::MAX);
        let header = RecordHeader::from_timestamp(timestamp, n_captured as u32, original);
        let (head, payload) = record.split_at_mut(RECORD_HEADER_SIZE);
        head.copy_from_slice(&header.encode());

        // Count the record before copying so a panicking chain still leaves
        // the counters in step with the reserved bytes
        self.packets_captured += 1;
        self.bytes_written += n_captured as u64;
        if self.packets_captured == 1 {
            self.min_packet_bytes = original;
            self.max_packet_bytes = original;
        } else {
            self.min_packet_bytes = self.min_packet_bytes.min(original);
            self.max_packet_bytes = self.max_packet_bytes.max(original);
        }

        let copied = flatten(chain, n_captured, payload);
        // Keep a short chain's record parseable
        payload[copied..].fill(0);

        if self.packets_captured >= self.packets_to_capture {
            log::debug!(
                "Captured {} packets, closing {}",
                self.packets_captured,
                self.path.display()
            );
            self.close_quietly();
        }

        AppendOutcome::Written
    }

    /// Closes from the append path, where errors cannot be returned.
    fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to finalize capture: {}", e);
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("path", &self.path)
            .field("region", &self.region)
            .field("open", &self.open)
            .field("packets_captured", &self.packets_captured)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}
