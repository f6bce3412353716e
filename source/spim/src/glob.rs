//! Packing transfer sequences into hardware transactions.
//!
//! The ISU SPI master can only run one transaction at a time, and each
//! transaction is limited by the size of its data buffers. A *glob* is a run
//! of consecutive [`Transfer`]s that fits in a single transaction. [`build`]
//! walks a transfer sequence once, appending each transfer to the current
//! glob when it fits and starting a new glob when it doesn't. Boundaries are
//! never revisited.
use core::ops::Range;

use mt3620::spi::{BUFFER_SIZE_FULL_DUPLEX, BUFFER_SIZE_HALF_DUPLEX, OPCODE_SIZE_FULL_DUPLEX};
use serde::{Deserialize, Serialize};

use crate::{Error, Transfer};

/// Maximum number of globs in one transfer sequence.
pub const MAX_GLOBS: usize = 16;

/// Largest payload of a half-duplex write. The last byte of `SDOR` is kept
/// for the idle-high workaround.
const WRITE_PAYLOAD_MAX: usize = BUFFER_SIZE_HALF_DUPLEX - 1;

/// The globs of one transfer sequence, in order.
pub type Globs = heapless::Vec<Glob, MAX_GLOBS>;

/// How a glob drives the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GlobKind {
    /// Half-duplex write. Only produced when
    /// [`GlobPolicy::half_duplex_writes`] is set.
    Write,
    /// Half-duplex read.
    Read,
    /// An opcode, followed by a payload clocked out and in at the same time.
    FullDuplex,
}

/// Tunables for [`build`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GlobPolicy {
    /// Turn write-only globs into half-duplex [`GlobKind::Write`]
    /// transactions, which can carry up to 31 bytes instead of an opcode and
    /// 16 bytes of payload.
    ///
    /// Off by default: the MT3620 appears to clock out one opcode bit even in
    /// half-duplex mode, so the data arrives shifted by one bit.
    pub half_duplex_writes: bool,
}

/// A run of consecutive transfers executed as one hardware transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Glob {
    kind: GlobKind,
    opcode_len: usize,
    payload_len: usize,
    first: usize,
    transfer_count: usize,
}

/// Partitions `transfers` into globs.
///
/// # Errors
///
/// - [`Error::InvalidParameter`] if `transfers` is empty or contains an empty
///   transfer.
/// - [`Error::Unsupported`] if a transfer both writes and reads, a single
///   transfer is too long for its kind of transaction, or more than
///   [`MAX_GLOBS`] globs would be needed.
pub fn build(transfers: &[Transfer<'_>], policy: GlobPolicy) -> Result<Globs, Error> {
    let first = transfers.first().ok_or(Error::InvalidParameter)?;
    if transfers.iter().any(Transfer::is_empty) {
        return Err(Error::InvalidParameter);
    }

    let mut globs = Globs::new();
    let mut glob = Glob::seed(0, first)?;
    for (index, transfer) in transfers.iter().enumerate().skip(1) {
        if glob.try_append(transfers, index, policy) {
            continue;
        }

        glob.finalize(transfers, policy);
        globs.push(glob).map_err(|_| Error::Unsupported)?;
        glob = Glob::seed(index, transfer)?;
    }
    glob.finalize(transfers, policy);
    globs.push(glob).map_err(|_| Error::Unsupported)?;

    tracing::trace!(globs = globs.len(), transfers = transfers.len(), "built globs");
    Ok(globs)
}

// === impl GlobKind ===

impl GlobKind {
    /// The largest payload a glob of this kind can carry.
    #[must_use]
    pub const fn payload_limit(self) -> usize {
        match self {
            GlobKind::Write => WRITE_PAYLOAD_MAX,
            GlobKind::Read => BUFFER_SIZE_HALF_DUPLEX,
            GlobKind::FullDuplex => BUFFER_SIZE_FULL_DUPLEX,
        }
    }
}

// === impl Glob ===

impl Glob {
    #[must_use]
    pub fn kind(&self) -> GlobKind {
        self.kind
    }

    /// Bytes sent from `SOAR` before the payload. Only non-zero for
    /// [`GlobKind::FullDuplex`] globs.
    #[must_use]
    pub fn opcode_len(&self) -> usize {
        self.opcode_len
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    #[must_use]
    pub fn transfer_count(&self) -> usize {
        self.transfer_count
    }

    /// Indices of the transfers this glob covers.
    #[must_use]
    pub fn transfers(&self) -> Range<usize> {
        self.first..self.first + self.transfer_count
    }

    /// Bytes moved on the bus when this glob completes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.opcode_len + self.payload_len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn seed(index: usize, transfer: &Transfer<'_>) -> Result<Self, Error> {
        let len = transfer.len();
        let (kind, opcode_len) = match (transfer.is_write(), transfer.is_read()) {
            (true, true) => return Err(Error::Unsupported),
            (true, false) => {
                if len > BUFFER_SIZE_FULL_DUPLEX + OPCODE_SIZE_FULL_DUPLEX {
                    return Err(Error::Unsupported);
                }
                (GlobKind::FullDuplex, len.min(OPCODE_SIZE_FULL_DUPLEX))
            }
            (false, _) => {
                if len > BUFFER_SIZE_HALF_DUPLEX {
                    return Err(Error::Unsupported);
                }
                (GlobKind::Read, 0)
            }
        };

        Ok(Self {
            kind,
            opcode_len,
            payload_len: len - opcode_len,
            first: index,
            transfer_count: 1,
        })
    }

    /// Tries to append `transfers[index]`, which must directly follow the
    /// last transfer of this glob.
    fn try_append(&mut self, transfers: &[Transfer<'_>], index: usize, policy: GlobPolicy) -> bool {
        debug_assert_eq!(index, self.first + self.transfer_count);
        let transfer = &transfers[index];

        // A transfer that writes and reads starts its own glob, which rejects
        // it.
        if transfer.is_write() && transfer.is_read() {
            return false;
        }

        // A write followed by a write-and-read is not globbed: a read can only
        // be globbed onto the write directly before it.
        if transfer.is_write() {
            if let Some(next) = transfers.get(index + 1) {
                if next.is_write() && next.is_read() {
                    return false;
                }
            }
        }

        match self.kind {
            GlobKind::Read if transfer.is_write() => return false,
            GlobKind::Write if transfer.is_read() => return false,
            _ => {}
        }

        let len = transfer.len();
        if self.payload_len + len > self.kind.payload_limit()
            && !self.try_widen(transfers, transfer, policy)
        {
            return false;
        }

        self.transfer_count += 1;
        self.payload_len += len;
        true
    }

    /// A full-duplex glob that overflows its payload buffer can still take a
    /// write if it holds no reads and becomes a half-duplex write.
    fn try_widen(&mut self, transfers: &[Transfer<'_>], transfer: &Transfer<'_>, policy: GlobPolicy) -> bool {
        let fits = self.len() + transfer.len() <= WRITE_PAYLOAD_MAX;
        if !policy.half_duplex_writes
            || self.kind != GlobKind::FullDuplex
            || transfer.is_read()
            || !fits
            || self.has_reads(transfers)
        {
            return false;
        }

        self.make_write();
        true
    }

    fn finalize(&mut self, transfers: &[Transfer<'_>], policy: GlobPolicy) {
        if policy.half_duplex_writes
            && self.kind == GlobKind::FullDuplex
            && !self.has_reads(transfers)
        {
            self.make_write();
        }
    }

    fn make_write(&mut self) {
        self.kind = GlobKind::Write;
        self.payload_len += self.opcode_len;
        self.opcode_len = 0;
    }

    fn has_reads(&self, transfers: &[Transfer<'_>]) -> bool {
        transfers[self.transfers()].iter().any(Transfer::is_read)
    }
}
