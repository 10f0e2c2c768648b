//! `mpcap` - Memory-mapped packet capture
//!
//! Records packets into a pre-sized, memory-mapped file in the classic
//! tcpdump format, readable by any standard packet-trace tool once closed.
//!
//! The flow of a capture run:
//!
//! 1. [`init`] validates a [`CaptureConfig`], reserves and maps the file,
//!    and writes the file header.
//! 2. Packet-processing threads call [`CaptureSession::add_buffer`] with a
//!    timestamp and a (possibly segmented) [`BufferChain`].
//! 3. The session closes itself when the target packet count is reached or
//!    the next record would not fit; [`CaptureSession::close`] or dropping
//!    the session does the same. Closing truncates the file to the bytes
//!    actually used.
//!
//! [`map`] re-opens a finished file read-only.

pub mod appender;
pub mod capture;
pub mod chain;
pub mod header;
pub mod lifecycle;
pub mod region;
pub mod test_utils;

pub use appender::AppendOutcome;
pub use capture::{CaptureConfig, CaptureError, CaptureSession, CaptureStatus, Result};
pub use chain::{flatten, BufferChain, Segment};
pub use header::{FileHeader, PacketType, RecordHeader, FILE_HEADER_SIZE, RECORD_HEADER_SIZE};
pub use lifecycle::{init, map, MappedCapture, Records};
