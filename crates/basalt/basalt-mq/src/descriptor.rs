//! Queue descriptor: out-of-band metadata naming the shared-memory regions
//! that make up one queue.
//!
//! A descriptor is produced by whoever allocated the backing memory and is
//! handed to each endpoint during an IPC handshake (the handshake itself is
//! not this crate's business). It carries the ring capacity, the record
//! quantum, a handle owning the shared-memory file descriptors, and a grantor
//! table mapping each logical region onto (fd index, byte offset, extent).
//!
//! The first three grantor positions are fixed; richer descriptor variants may
//! append event-flag regions behind them, which this crate accepts and
//! ignores.

use std::mem::size_of;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

/// Byte extent of each position-counter region: one shared `u64`.
pub const COUNTER_EXTENT: u64 = 8;

/// Minimum number of grantors a descriptor must carry.
pub const MIN_GRANTOR_COUNT: usize = 3;

/// Fixed positions in the grantor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Counter of total bytes ever consumed. Mutated only by the reader.
    ReadPointer = 0,
    /// Counter of total bytes ever written. Mutated only by the writer.
    WritePointer = 1,
    /// The data ring itself.
    DataRing = 2,
}

/// One entry in the descriptor's region table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grantor {
    /// Index into the native handle's fd array.
    pub fd_index: u32,
    /// Byte offset of the region within the referenced object.
    pub offset: u64,
    /// Byte extent of the region.
    pub extent: u64,
}

/// Ordered collection of shared-memory file descriptors.
#[derive(Debug, Default)]
pub struct NativeHandle {
    fds: Vec<OwnedFd>,
}

impl NativeHandle {
    pub fn new(fds: Vec<OwnedFd>) -> Self {
        Self { fds }
    }

    /// A handle carrying no descriptors; binding against it yields an invalid
    /// endpoint.
    pub fn empty() -> Self {
        Self { fds: Vec::new() }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.fds.is_empty()
    }

    #[inline]
    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    #[inline]
    pub fn fd(&self, index: usize) -> Option<BorrowedFd<'_>> {
        self.fds.get(index).map(|fd| fd.as_fd())
    }
}

/// Why a descriptor was rejected at bind time.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("native handle holds no file descriptors")]
    InvalidHandle,

    #[error("descriptor names {found} grantors, need at least {MIN_GRANTOR_COUNT}")]
    TooFewGrantors { found: usize },

    #[error("descriptor quantum is {quantum} bytes but the record width is {record} bytes")]
    QuantumMismatch { quantum: u64, record: u64 },

    #[error("capacity {capacity} is not a positive multiple of the {quantum}-byte quantum")]
    BadCapacity { capacity: u64, quantum: u64 },

    #[error("grantor {region:?} references fd index {fd_index}, handle holds {fd_count}")]
    FdIndexOutOfRange {
        region: Region,
        fd_index: u32,
        fd_count: usize,
    },

    #[error("grantor {region:?} extent {extent} is below the required {required} bytes")]
    ShortExtent {
        region: Region,
        extent: u64,
        required: u64,
    },

    #[error("counter grantor {region:?} at offset {offset} is not 8-byte aligned")]
    MisalignedCounter { region: Region, offset: u64 },
}

/// The three core grantors, pulled out of a descriptor that passed validation.
pub(crate) struct CoreRegions {
    pub read: Grantor,
    pub write: Grantor,
    pub data: Grantor,
}

/// Immutable description of one queue's shared-memory layout.
///
/// Consumed, not owned, by endpoints: the endpoint keeps the descriptor alive
/// for the life of its mappings and re-exposes it for rebroadcast to a peer.
#[derive(Debug)]
pub struct QueueDescriptor {
    size: u64,
    quantum: u64,
    handle: NativeHandle,
    grantors: Vec<Grantor>,
}

impl QueueDescriptor {
    /// Assemble a descriptor. No validation happens here; endpoints validate
    /// when they bind, and a malformed descriptor yields an invalid endpoint
    /// rather than an error.
    pub fn new(size: u64, quantum: u64, handle: NativeHandle, grantors: Vec<Grantor>) -> Self {
        Self {
            size,
            quantum,
            handle,
            grantors,
        }
    }

    /// Total bytes in the data ring.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes per record.
    #[inline]
    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    #[inline]
    pub fn grantor_count(&self) -> usize {
        self.grantors.len()
    }

    #[inline]
    pub fn grantors(&self) -> &[Grantor] {
        &self.grantors
    }

    #[inline]
    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    #[inline]
    pub fn is_handle_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Check this descriptor against the record type `T`.
    ///
    /// The stored quantum must equal `size_of::<T>()`, the capacity must be a
    /// positive multiple of it, and every core grantor must be satisfiable
    /// from the handle.
    pub fn validate<T: Copy>(&self) -> Result<(), DescriptorError> {
        self.core_regions::<T>().map(|_| ())
    }

    pub(crate) fn core_regions<T: Copy>(&self) -> Result<CoreRegions, DescriptorError> {
        if !self.handle.is_valid() {
            return Err(DescriptorError::InvalidHandle);
        }
        if self.grantors.len() < MIN_GRANTOR_COUNT {
            return Err(DescriptorError::TooFewGrantors {
                found: self.grantors.len(),
            });
        }

        let record = size_of::<T>() as u64;
        if self.quantum != record {
            return Err(DescriptorError::QuantumMismatch {
                quantum: self.quantum,
                record,
            });
        }
        // Checked in this order so the modulo below can never divide by zero.
        if self.quantum == 0 || self.size == 0 || self.size % self.quantum != 0 {
            return Err(DescriptorError::BadCapacity {
                capacity: self.size,
                quantum: self.quantum,
            });
        }

        let core = [
            (Region::ReadPointer, self.grantors[Region::ReadPointer as usize]),
            (Region::WritePointer, self.grantors[Region::WritePointer as usize]),
            (Region::DataRing, self.grantors[Region::DataRing as usize]),
        ];
        for (region, grantor) in core {
            if grantor.fd_index as usize >= self.handle.fd_count() {
                return Err(DescriptorError::FdIndexOutOfRange {
                    region,
                    fd_index: grantor.fd_index,
                    fd_count: self.handle.fd_count(),
                });
            }
            let required = match region {
                Region::DataRing => self.size,
                Region::ReadPointer | Region::WritePointer => COUNTER_EXTENT,
            };
            if grantor.extent < required {
                return Err(DescriptorError::ShortExtent {
                    region,
                    extent: grantor.extent,
                    required,
                });
            }
            // The counters alias AtomicU64 words, which need natural alignment.
            if region != Region::DataRing && grantor.offset % COUNTER_EXTENT != 0 {
                return Err(DescriptorError::MisalignedCounter {
                    region,
                    offset: grantor.offset,
                });
            }
        }

        Ok(CoreRegions {
            read: core[0].1,
            write: core[1].1,
            data: core[2].1,
        })
    }
}
