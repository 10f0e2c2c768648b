//! Creating, finalizing, and re-opening capture files.
//!
//! [`init`] reserves the whole file up front and maps it, so the append path
//! is nothing but memory writes. Closing flushes and keeps only the bytes
//! actually used: the file on disk ends exactly after the last record.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::appender::SessionState;
use crate::capture::{CaptureConfig, CaptureError, CaptureSession, Result};
use crate::header::{FileHeader, RecordHeader, FILE_HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::region::CaptureRegion;

/// Creates the capture file and opens a session on it.
///
/// Any existing file at the configured path is replaced. The file is sized
/// to `max_file_size`, mapped, and given its header; the session accepts
/// packets as soon as this returns.
///
/// # Errors
///
/// Returns `CaptureError::Config` if the configuration fails validation.
/// Returns `CaptureError::Io` if the file cannot be created or sized.
/// Returns `CaptureError::Mmap` if the file cannot be mapped.
pub fn init(config: CaptureConfig) -> Result<CaptureSession> {
    config.validate()?;
    let path = config.path.clone();
    let capacity = usize::try_from(config.max_file_size)
        .map_err(|_| CaptureError::Config("maximum file size exceeds the address space".into()))?;

    match fs::remove_file(&path) {
        Ok(()) => log::debug!("Removed previous capture file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(CaptureError::io(&path, e)),
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| CaptureError::io(&path, e))?;

    file.set_len(config.max_file_size)
        .map_err(|e| CaptureError::io(&path, e))?;

    // SAFETY: the file was just created by us and is only written through this mapping.
    let map = unsafe {
        MmapOptions::new()
            .len(capacity)
            .map_mut(&file)
            .map_err(|source| CaptureError::Mmap {
                path: path.clone(),
                source,
            })?
    };

    let mut region = CaptureRegion::new(map);
    let header = FileHeader::new(config.packet_type, config.max_packet_size);
    region
        .reserve(FILE_HEADER_SIZE)
        .ok_or_else(|| {
            CaptureError::Config(format!(
                "maximum file size {} cannot hold the file header",
                config.max_file_size
            ))
        })?
        .copy_from_slice(&header.encode());

    log::info!(
        "Packet capture started: {} ({}, {} packets, {} bytes reserved)",
        path.display(),
        config.packet_type,
        config.packets_to_capture,
        config.max_file_size
    );

    let state = SessionState::new(path, region, file, config.packets_to_capture);
    Ok(CaptureSession::new(config, state))
}

impl SessionState {
    /// Flushes the used bytes, unmaps, and truncates the file to its used length.
    ///
    /// The session stops accepting packets before anything else happens, so
    /// it stays closed even if the flush or truncate fails. Closing twice is a
    /// no-op.
    pub(crate) fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let Some(region) = self.region.take() else {
            return Ok(());
        };
        let used = region.cursor() as u64;
        self.file_bytes_used = used;

        let flushed = region
            .flush_used()
            .map_err(|e| CaptureError::io(&self.path, e));
        drop(region);

        if let Some(file) = self.file.take() {
            file.set_len(used)
                .map_err(|e| CaptureError::io(&self.path, e))?;
        }
        flushed?;

        log::info!(
            "Capture closed: {} packets, {} bytes, {} bytes on disk in {}",
            self.packets_captured,
            self.bytes_written,
            used,
            self.path.display()
        );
        Ok(())
    }
}

/// A finished capture file mapped read-only.
///
/// Opening validates the file header and walks every record, so a
/// `MappedCapture` always describes a well-formed file.
pub struct MappedCapture {
    path: PathBuf,
    map: Mmap,
    header: FileHeader,
    packet_count: u64,
    min_packet_bytes: u32,
    max_packet_bytes: u32,
}

/// Maps an existing capture file for inspection.
///
/// # Errors
///
/// Returns `CaptureError::Io` if the file cannot be opened.
/// Returns `CaptureError::InvalidFormat` if the file is shorter than the file
/// header, has an unknown magic or packet type, or ends in the middle of a
/// record.
/// Returns `CaptureError::Mmap` if the file cannot be mapped.
pub fn map(path: impl AsRef<Path>) -> Result<MappedCapture> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path).map_err(|e| CaptureError::io(&path, e))?;
    let len = file
        .metadata()
        .map_err(|e| CaptureError::io(&path, e))?
        .len();

    if len < FILE_HEADER_SIZE as u64 {
        return Err(CaptureError::InvalidFormat {
            reason: format!(
                "{} is {len} bytes, smaller than the {FILE_HEADER_SIZE}-byte file header",
                path.display()
            ),
        });
    }

    // SAFETY: read-only mapping; the file is expected not to change while mapped.
    let map = unsafe {
        Mmap::map(&file).map_err(|source| CaptureError::Mmap {
            path: path.clone(),
            source,
        })?
    };

    let header = FileHeader::decode(&map).map_err(|e| match e {
        CaptureError::InvalidFormat { reason } => CaptureError::InvalidFormat {
            reason: format!("{}: {reason}", path.display()),
        },
        other => other,
    })?;

    let mut packet_count = 0u64;
    let mut min_packet_bytes = 0u32;
    let mut max_packet_bytes = 0u32;
    let mut offset = FILE_HEADER_SIZE;

    while offset < map.len() {
        let rest = &map[offset..];
        let record = RecordHeader::decode(rest, header.byte_swapped).ok_or_else(|| {
            CaptureError::InvalidFormat {
                reason: format!(
                    "{}: truncated record header at offset {offset}",
                    path.display()
                ),
            }
        })?;
        if record.footprint() > rest.len() {
            return Err(CaptureError::InvalidFormat {
                reason: format!(
                    "{}: record at offset {offset} needs {} bytes, {} left",
                    path.display(),
                    record.footprint(),
                    rest.len()
                ),
            });
        }

        let n = record.n_bytes_in_packet;
        if packet_count == 0 {
            min_packet_bytes = n;
            max_packet_bytes = n;
        } else {
            min_packet_bytes = min_packet_bytes.min(n);
            max_packet_bytes = max_packet_bytes.max(n);
        }
        packet_count += 1;
        offset += record.footprint();
    }

    log::debug!(
        "Mapped {}: {} packets, {} bytes",
        path.display(),
        packet_count,
        map.len()
    );

    Ok(MappedCapture {
        path,
        map,
        header,
        packet_count,
        min_packet_bytes,
        max_packet_bytes,
    })
}

impl MappedCapture {
    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Number of records in the file.
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Smallest original packet length (0 for an empty capture).
    pub fn min_packet_bytes(&self) -> u32 {
        self.min_packet_bytes
    }

    /// Largest original packet length.
    pub fn max_packet_bytes(&self) -> u32 {
        self.max_packet_bytes
    }

    /// Size of the file in bytes.
    pub fn file_len(&self) -> usize {
        self.map.len()
    }

    /// Raw file contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// Records in file order, each with its stored bytes.
    pub fn records(&self) -> Records<'_> {
        Records {
            data: &self.map,
            offset: FILE_HEADER_SIZE,
            byte_swapped: self.header.byte_swapped,
        }
    }
}

impl std::fmt::Debug for MappedCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedCapture")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("packet_count", &self.packet_count)
            .field("file_len", &self.map.len())
            .finish()
    }
}

/// Iterator over the records of a [`MappedCapture`].
#[derive(Debug, Clone)]
pub struct Records<'a> {
    data: &'a [u8],
    offset: usize,
    byte_swapped: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = (RecordHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.data.get(self.offset..)?;
        let header = RecordHeader::decode(rest, self.byte_swapped)?;
        let payload = rest.get(RECORD_HEADER_SIZE..header.footprint())?;
        self.offset += header.footprint();
        Some((header, payload))
    }
}
