//! Capture session: configuration, status reporting, and the append entry point.
//!
//! A [`CaptureSession`] records packets into one pre-sized, memory-mapped
//! capture file. It is created by [`crate::lifecycle::init`], fed through
//! [`CaptureSession::add_buffer`] from one or more packet-processing threads,
//! and finalized by [`CaptureSession::close`], which also happens on its own
//! once the target packet count is reached or the file runs out of space.
//!
//! # Example
//!
//! ```no_run
//! use mpcap::{init, CaptureConfig, PacketType};
//!
//! let config = CaptureConfig::new("/tmp/trace.pcap")
//!     .with_packet_type(PacketType::Ethernet)
//!     .with_packets_to_capture(1000)
//!     .with_thread_safe(true);
//! let session = init(config)?;
//!
//! // In the packet path:
//! let frame = vec![0u8; 64];
//! session.add_buffer(1_700_000_000.25, &frame, 128);
//!
//! // When done (also happens on drop):
//! session.close()?;
//! # Ok::<(), mpcap::CaptureError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use thiserror::Error;

use crate::appender::{AppendOutcome, SessionState};
use crate::chain::BufferChain;
use crate::header::{PacketType, FILE_HEADER_SIZE};

/// Default capture file location.
pub const DEFAULT_PATH: &str = "/tmp/vnet.mpcap";

/// Default size reserved for a capture file (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 << 20;

/// Default largest packet size advertised in the file header.
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 1 << 16;

/// Default number of packets after which a session closes itself.
pub const DEFAULT_PACKETS_TO_CAPTURE: u32 = 1000;

/// Errors that can occur while setting up, inspecting, or finalizing a capture.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The capture configuration is unusable.
    #[error("invalid capture configuration: {0}")]
    Config(String),

    /// A file operation on the capture file failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File the operation was on.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Mapping the capture file into memory failed.
    #[error("failed to map {}: {source}", .path.display())]
    Mmap {
        /// File that could not be mapped.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// An existing file is not a well-formed capture file.
    #[error("invalid capture file: {reason}")]
    InvalidFormat {
        /// What is wrong with the file.
        reason: String,
    },

    /// JSON (de)serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CaptureError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type alias for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Settings for one capture run. Fixed once the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Destination capture file. Replaced if it already exists.
    pub path: PathBuf,
    /// Link-layer type of the captured packets.
    pub packet_type: PacketType,
    /// Number of packets after which the session closes itself.
    pub packets_to_capture: u32,
    /// Bytes reserved for the capture file, header included.
    pub max_file_size: u64,
    /// Largest packet size written to the file header.
    ///
    /// Advisory only: truncation is decided per call by the
    /// `max_bytes` argument of [`CaptureSession::add_buffer`].
    pub max_packet_size: u32,
    /// Serialize concurrent [`CaptureSession::add_buffer`] calls with a lock.
    pub thread_safe: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            packet_type: PacketType::default(),
            packets_to_capture: DEFAULT_PACKETS_TO_CAPTURE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            thread_safe: false,
        }
    }
}

impl CaptureConfig {
    /// Creates a configuration with defaults for everything but the path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the link-layer type.
    pub fn with_packet_type(mut self, packet_type: PacketType) -> Self {
        self.packet_type = packet_type;
        self
    }

    /// Sets the packet count after which the session closes itself.
    pub fn with_packets_to_capture(mut self, n: u32) -> Self {
        self.packets_to_capture = n;
        self
    }

    /// Sets the number of bytes reserved for the file.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the packet size advertised in the file header.
    pub fn with_max_packet_size(mut self, bytes: u32) -> Self {
        self.max_packet_size = bytes;
        self
    }

    /// Enables or disables locking around appends.
    pub fn with_thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = thread_safe;
        self
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Io` if the file cannot be read.
    /// Returns `CaptureError::Json` if the JSON is invalid.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CaptureError::io(path, e))?;
        let config: CaptureConfig = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Checks that a session can be created from this configuration.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Config` if the path is empty, the target packet
    /// count is zero, or the file size is zero, too small for the file
    /// header, or too large to map.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(CaptureError::Config("capture file path is empty".into()));
        }
        if self.packets_to_capture == 0 {
            return Err(CaptureError::Config(
                "number of packets to capture must be non-zero".into(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(CaptureError::Config(
                "maximum file size must be non-zero".into(),
            ));
        }
        if self.max_file_size < FILE_HEADER_SIZE as u64 {
            return Err(CaptureError::Config(format!(
                "maximum file size {} is smaller than the {FILE_HEADER_SIZE}-byte file header",
                self.max_file_size
            )));
        }
        if usize::try_from(self.max_file_size).is_err() {
            return Err(CaptureError::Config(format!(
                "maximum file size {} exceeds the address space",
                self.max_file_size
            )));
        }
        Ok(())
    }
}

/// Snapshot of a session's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatus {
    /// Whether the session still accepts packets.
    pub is_open: bool,
    /// Packets recorded so far.
    pub packets_captured: u32,
    /// Packet count at which the session closes itself.
    pub packets_to_capture: u32,
    /// Payload bytes stored so far, record headers excluded.
    pub bytes_written: u64,
    /// Bytes of the file in use, file header and record headers included.
    pub file_bytes_used: u64,
    /// Smallest original packet length seen (0 before the first packet).
    pub min_packet_bytes: u32,
    /// Largest original packet length seen.
    pub max_packet_bytes: u32,
}

/// Lock-free mirror of the session state. Readers use only this, so they
/// never hold the lock a producer needs.
#[derive(Debug, Default)]
struct SharedCounters {
    open: AtomicBool,
    packets_captured: AtomicU32,
    bytes_written: AtomicU64,
    file_bytes_used: AtomicU64,
    min_packet_bytes: AtomicU32,
    max_packet_bytes: AtomicU32,
}

impl SharedCounters {
    fn publish(&self, state: &SessionState) {
        self.packets_captured
            .store(state.packets_captured(), Ordering::Relaxed);
        self.bytes_written
            .store(state.bytes_written(), Ordering::Relaxed);
        self.file_bytes_used
            .store(state.file_bytes_used(), Ordering::Relaxed);
        self.min_packet_bytes
            .store(state.min_packet_bytes(), Ordering::Relaxed);
        self.max_packet_bytes
            .store(state.max_packet_bytes(), Ordering::Relaxed);
        self.open.store(state.is_open(), Ordering::Release);
    }
}

/// One capture run writing to one file.
///
/// `CaptureSession` is `Send + Sync`; share it between packet-processing
/// threads with an `Arc`. When the session was configured with
/// `thread_safe`, concurrent [`add_buffer`](Self::add_buffer) calls are
/// serialized by a per-session lock and records land in lock order. Without
/// it, callers must keep to one producer at a time; a call that collides with
/// another producer (or with [`close`](Self::close)) is dropped and reported
/// as [`AppendOutcome::Contended`]. Status readers never take the lock and
/// cannot cause a drop.
pub struct CaptureSession {
    config: CaptureConfig,
    state: Mutex<SessionState>,
    counters: SharedCounters,
}

impl CaptureSession {
    pub(crate) fn new(config: CaptureConfig, state: SessionState) -> Self {
        let counters = SharedCounters::default();
        counters.publish(&state);
        Self {
            config,
            state: Mutex::new(state),
            counters,
        }
    }

    /// Records one packet.
    ///
    /// Stores at most `max_bytes` of the packet, while the record keeps the
    /// packet's full original length. Never fails: once the session has
    /// closed (target count reached, file full, or closed explicitly) every
    /// call is a no-op returning a non-written outcome.
    pub fn add_buffer<C>(&self, timestamp: f64, chain: &C, max_bytes: usize) -> AppendOutcome
    where
        C: BufferChain + ?Sized,
    {
        // Fast path: skip the lock once capture has finished
        if !self.counters.open.load(Ordering::Acquire) {
            return AppendOutcome::Closed;
        }

        let mut state = if self.config.thread_safe {
            self.lock_state()
        } else {
            match self.state.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => recover(poisoned),
                Err(TryLockError::WouldBlock) => {
                    if !self.counters.open.load(Ordering::Acquire) {
                        return AppendOutcome::Closed;
                    }
                    log::warn!(
                        "Concurrent append on unlocked capture session {}, packet dropped",
                        self.config.path.display()
                    );
                    return AppendOutcome::Contended;
                }
            }
        };

        let outcome = state.append(timestamp, chain, max_bytes);
        self.counters.publish(&state);
        outcome
    }

    /// Records one packet through an exclusive borrow, without any locking.
    ///
    /// Same behavior as [`add_buffer`](Self::add_buffer).
    pub fn add_buffer_exclusive<C>(
        &mut self,
        timestamp: f64,
        chain: &C,
        max_bytes: usize,
    ) -> AppendOutcome
    where
        C: BufferChain + ?Sized,
    {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let outcome = state.append(timestamp, chain, max_bytes);
        self.counters.publish(state);
        outcome
    }

    /// Finalizes the capture file. Closing a closed session does nothing.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Io` if flushing or truncating the file fails.
    /// The session is closed either way.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock_state();
        let result = state.close();
        self.counters.publish(&state);
        result
    }

    /// Whether the session still accepts packets.
    pub fn is_open(&self) -> bool {
        self.counters.open.load(Ordering::Acquire)
    }

    /// Packets recorded so far (lock-free).
    pub fn packets_captured(&self) -> u32 {
        self.counters.packets_captured.load(Ordering::Relaxed)
    }

    /// Payload bytes stored so far (lock-free).
    pub fn bytes_written(&self) -> u64 {
        self.counters.bytes_written.load(Ordering::Relaxed)
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Path of the capture file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Full progress snapshot (lock-free).
    ///
    /// Each field is current as of the latest finished append; while
    /// producers are running the fields may come from neighbouring appends.
    pub fn status(&self) -> CaptureStatus {
        let counters = &self.counters;
        CaptureStatus {
            is_open: counters.open.load(Ordering::Acquire),
            packets_captured: counters.packets_captured.load(Ordering::Relaxed),
            packets_to_capture: self.config.packets_to_capture,
            bytes_written: counters.bytes_written.load(Ordering::Relaxed),
            file_bytes_used: counters.file_bytes_used.load(Ordering::Relaxed),
            min_packet_bytes: counters.min_packet_bytes.load(Ordering::Relaxed),
            max_packet_bytes: counters.max_packet_bytes.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(recover)
    }
}

// A panic mid-append leaves at most one counted record whose payload is
// partly zero. The counters catch up on the next append or close.
fn recover<T>(poisoned: PoisonError<T>) -> T {
    log::warn!("Capture session lock was poisoned, continuing");
    poisoned.into_inner()
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = state.close() {
            log::warn!("Failed to finalize capture on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("path", &self.config.path)
            .field("is_open", &self.is_open())
            .field("packets_captured", &self.packets_captured())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}
