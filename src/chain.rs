//! Read-only view of a segmented packet buffer and the copy that flattens it.
//!
//! Packet buffers handed to the capture path may be split across several
//! segments (a head buffer plus chained continuation buffers). The capture
//! path only ever reads them: it asks for the packet's total length and walks
//! the segments in order.

/// One contiguous piece of a packet buffer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Bytes held by this segment. May be empty.
    pub data: &'a [u8],
    /// Whether the chain claims another segment follows this one.
    pub has_next: bool,
}

impl<'a> Segment<'a> {
    /// Creates a segment.
    pub fn new(data: &'a [u8], has_next: bool) -> Self {
        Self { data, has_next }
    }
}

/// A packet stored as an ordered chain of byte segments.
///
/// `total_length` is the length of the packet as the owner of the chain
/// reports it. It is normally the sum of the segment lengths, but the
/// flattener never trusts that and stops wherever the segments run out.
pub trait BufferChain {
    /// Logical length of the whole packet in bytes.
    fn total_length(&self) -> usize;

    /// Segments in packet order.
    fn segments(&self) -> impl Iterator<Item = Segment<'_>>;
}

impl BufferChain for [u8] {
    fn total_length(&self) -> usize {
        self.len()
    }

    fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        std::iter::once(Segment::new(self, false))
    }
}

impl BufferChain for Vec<u8> {
    fn total_length(&self) -> usize {
        self.len()
    }

    fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        self.as_slice().segments()
    }
}

impl<'s> BufferChain for [&'s [u8]] {
    fn total_length(&self) -> usize {
        self.iter().map(|s| s.len()).sum()
    }

    fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        let last = self.len().saturating_sub(1);
        self.iter()
            .enumerate()
            .map(move |(i, data)| Segment::new(data, i < last))
    }
}

impl BufferChain for [Vec<u8>] {
    fn total_length(&self) -> usize {
        self.iter().map(Vec::len).sum()
    }

    fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        let last = self.len().saturating_sub(1);
        self.iter()
            .enumerate()
            .map(move |(i, data)| Segment::new(data.as_slice(), i < last))
    }
}

/// Copies up to `max_bytes` of `chain` into the front of `dest`.
///
/// Copies `min(chain.total_length(), max_bytes, dest.len())` bytes segment
/// by segment and returns the number of bytes actually copied. A chain that
/// runs out of segments early (a segment claims a successor that never
/// arrives, or the segments hold fewer bytes than `total_length`) ends the
/// copy at the last available segment, so the return value can be smaller
/// than requested.
pub fn flatten<C>(chain: &C, max_bytes: usize, dest: &mut [u8]) -> usize
where
    C: BufferChain + ?Sized,
{
    let wanted = chain.total_length().min(max_bytes).min(dest.len());
    let mut copied = 0;
    let mut expect_more = wanted > 0;

    for segment in chain.segments() {
        if copied == wanted {
            expect_more = false;
            break;
        }
        let n = segment.data.len().min(wanted - copied);
        dest[copied..copied + n].copy_from_slice(&segment.data[..n]);
        copied += n;
        expect_more = segment.has_next;
        if !segment.has_next {
            break;
        }
    }

    if copied < wanted {
        if expect_more {
            log::debug!(
                "buffer chain ended before its last segment: copied {copied} of {wanted} bytes"
            );
        } else {
            log::debug!("buffer chain shorter than its length: copied {copied} of {wanted} bytes");
        }
    }

    copied
}
