//! The queue endpoint: one process's handle to a descriptor-bound ring.
//!
//! Exactly one endpoint per queue may write and exactly one may read; the
//! discipline is contractual, matching the single-writer-per-counter protocol
//! below. An endpoint exposes both roles because the descriptor does not say
//! which side of the queue this process plays.

use crate::descriptor::{CoreRegions, Grantor, NativeHandle, QueueDescriptor, Region};
use crate::ring::{self, Transaction};
use basalt_mmap::SharedRegion;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// A single-producer / single-reader byte ring over shared memory, typed over
/// a fixed-width `Copy` record.
///
/// # Roles and counters
///
/// Two counters live in shared memory: the write position `W` (total bytes
/// ever written) and the read position `R` (total bytes ever consumed). Only
/// the writer endpoint advances `W`, only the reader advances `R`; each side
/// acquire-loads the peer's counter before touching ring bytes, pairing with
/// the release-store the peer issued when it committed. That pairing is the
/// entire synchronization story — there is no lock and no blocking anywhere.
///
/// ```text
/// ┌──────────────┐   W,R counters + C-byte ring    ┌──────────────┐
/// │   writer     │ ─────── shared memory ────────► │   reader     │
/// │ (Process A)  │      named by a descriptor      │ (Process B)  │
/// └──────────────┘                                 └──────────────┘
/// ```
///
/// # Validity
///
/// Binding a malformed descriptor produces a permanently invalid endpoint:
/// `is_valid()` is false, capacity queries return 0 and operations return
/// false. A descriptor that validates but cannot be mapped aborts the
/// process, because the descriptor asserted the regions are mappable.
pub struct MessageQueue<T: Copy> {
    desc: QueueDescriptor,
    inner: Option<RawQueue>,
    /// Marker to tie the endpoint to the record type without storing a `T`.
    _pd: PhantomData<T>,
}

/// The three mapped regions plus the capacity, shared by both typed roles.
struct RawQueue {
    read_region: SharedRegion,
    write_region: SharedRegion,
    ring_region: SharedRegion,
    capacity: u64,
}

impl RawQueue {
    /// Map the three core regions in their fixed order. Any failure here is
    /// fatal: the descriptor promised the regions exist and are mappable.
    fn map(desc: &QueueDescriptor, core: &CoreRegions) -> Self {
        let handle = desc.handle();
        let read_region = map_required(handle, Region::ReadPointer, core.read);
        let write_region = map_required(handle, Region::WritePointer, core.write);
        let ring_region = map_required(handle, Region::DataRing, core.data);
        Self {
            read_region,
            write_region,
            ring_region,
            capacity: desc.size(),
        }
    }

    #[inline(always)]
    fn read_pos(&self) -> &AtomicU64 {
        // SAFETY: the region is mapped shared, at least 8 bytes long, and the
        // grantor offset was validated to be 8-byte aligned.
        unsafe { &*(self.read_region.as_ptr() as *const AtomicU64) }
    }

    #[inline(always)]
    fn write_pos(&self) -> &AtomicU64 {
        // SAFETY: as for read_pos.
        unsafe { &*(self.write_region.as_ptr() as *const AtomicU64) }
    }

    /// Occupancy hint. Relaxed on both counters: any dependent access goes
    /// through begin_read/begin_write, which redo the load with acquire.
    #[inline(always)]
    fn available_to_read(&self) -> u64 {
        ring::occupancy(
            self.write_pos().load(Ordering::Relaxed),
            self.read_pos().load(Ordering::Relaxed),
        )
    }

    #[inline(always)]
    fn available_to_write(&self) -> u64 {
        ring::free_space(
            self.capacity,
            self.write_pos().load(Ordering::Relaxed),
            self.read_pos().load(Ordering::Relaxed),
        )
    }

    /// Producer side: acquire the reader's progress, then name the runs for
    /// `len` bytes at the current write position. The acquire pairs with the
    /// reader's release in commit_read, so every byte the split lets us
    /// overwrite has already been consumed.
    #[inline(always)]
    fn begin_write(&self, len: u64) -> Option<Transaction> {
        let read = self.read_pos().load(Ordering::Acquire);
        let write = self.write_pos().load(Ordering::Relaxed);
        if ring::free_space(self.capacity, write, read) < len {
            return None;
        }
        Some(ring::split(write, len, self.capacity))
    }

    /// Publish `len` freshly written bytes. The release makes them visible to
    /// any reader that acquires the new write position.
    #[inline(always)]
    fn commit_write(&self, len: u64) {
        // Sole writer of W, so the relaxed read-modify cannot race.
        let write = self.write_pos().load(Ordering::Relaxed);
        self.write_pos().store(write.wrapping_add(len), Ordering::Release);
    }

    /// Consumer side: acquire the writer's progress, then name the runs for
    /// `len` bytes at the current read position.
    #[inline(always)]
    fn begin_read(&self, len: u64) -> Option<Transaction> {
        let write = self.write_pos().load(Ordering::Acquire);
        let read = self.read_pos().load(Ordering::Relaxed);
        if ring::occupancy(write, read) < len {
            return None;
        }
        Some(ring::split(read, len, self.capacity))
    }

    /// Retire `len` consumed bytes, releasing them for the writer to reuse.
    #[inline(always)]
    fn commit_read(&self, len: u64) {
        let read = self.read_pos().load(Ordering::Relaxed);
        self.read_pos().store(read.wrapping_add(len), Ordering::Release);
    }

    /// Copy `tx.len()` bytes from `src` into the ring runs named by `tx`.
    ///
    /// # Safety
    /// `src` must be valid for reading `tx.len()` bytes and `tx` must have
    /// been produced by begin_write on this queue.
    #[inline(always)]
    unsafe fn copy_in(&self, tx: Transaction, src: *const u8) {
        let base = self.ring_region.as_mut_ptr();
        // SAFETY: both runs lie inside the mapped ring by construction of the
        // split, and the caller vouches for `src`.
        unsafe {
            ptr::copy_nonoverlapping(src, base.add(tx.first_offset as usize), tx.first_len as usize);
            ptr::copy_nonoverlapping(src.add(tx.first_len as usize), base, tx.second_len as usize);
        }
    }

    /// Copy `tx.len()` bytes out of the ring runs named by `tx` into `dst`.
    ///
    /// # Safety
    /// `dst` must be valid for writing `tx.len()` bytes and `tx` must have
    /// been produced by begin_read on this queue.
    #[inline(always)]
    unsafe fn copy_out(&self, tx: Transaction, dst: *mut u8) {
        let base = self.ring_region.as_ptr();
        // SAFETY: as for copy_in, with the roles of source and destination swapped.
        unsafe {
            ptr::copy_nonoverlapping(base.add(tx.first_offset as usize), dst, tx.first_len as usize);
            ptr::copy_nonoverlapping(base, dst.add(tx.first_len as usize), tx.second_len as usize);
        }
    }
}

fn map_required(handle: &NativeHandle, region: Region, grantor: Grantor) -> SharedRegion {
    let Some(fd) = handle.fd(grantor.fd_index as usize) else {
        error!(?region, fd_index = grantor.fd_index, "grantor references a missing file descriptor");
        panic!("grantor {region:?} references fd index {} beyond the handle", grantor.fd_index);
    };
    match SharedRegion::map(fd, grantor.offset, grantor.extent as usize) {
        Ok(mapped) => mapped,
        Err(e) => {
            error!(
                ?region,
                offset = grantor.offset,
                extent = grantor.extent,
                error = %e,
                "failed to map shared-memory region"
            );
            panic!("failed to map {region:?} region: {e}");
        }
    }
}

impl<T: Copy> MessageQueue<T> {
    /// Bind to a descriptor as the first endpoint on the queue.
    ///
    /// Both position counters are zeroed, with release semantics, before the
    /// endpoint becomes valid. Binding a second endpoint to an already-active
    /// queue therefore resets the stream; the peer of a live queue must
    /// [`join`](Self::join) instead.
    pub fn bind(desc: QueueDescriptor) -> Self {
        Self::construct(desc, true)
    }

    /// Bind to a descriptor without touching the counters, joining a queue
    /// another endpoint already initialised.
    pub fn join(desc: QueueDescriptor) -> Self {
        Self::construct(desc, false)
    }

    fn construct(desc: QueueDescriptor, initialise: bool) -> Self {
        let core = match desc.core_regions::<T>() {
            Ok(core) => core,
            Err(e) => {
                warn!(error = %e, "descriptor rejected; endpoint is permanently invalid");
                return Self {
                    desc,
                    inner: None,
                    _pd: PhantomData,
                };
            }
        };

        let raw = RawQueue::map(&desc, &core);
        if initialise {
            raw.read_pos().store(0, Ordering::Release);
            raw.write_pos().store(0, Ordering::Release);
        }
        debug!(
            capacity = raw.capacity,
            quantum = desc.quantum(),
            initialise,
            "queue endpoint bound"
        );

        Self {
            desc,
            inner: Some(raw),
            _pd: PhantomData,
        }
    }

    /// True when all three regions are mapped.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Bytes written but not yet consumed. A hint: the authoritative check is
    /// redone inside read/write.
    #[inline]
    pub fn available_to_read(&self) -> u64 {
        self.inner.as_ref().map_or(0, RawQueue::available_to_read)
    }

    /// Bytes the writer may produce before the ring is full.
    #[inline]
    pub fn available_to_write(&self) -> u64 {
        self.inner.as_ref().map_or(0, RawQueue::available_to_write)
    }

    /// Bytes per record.
    #[inline]
    pub fn quantum_size(&self) -> u64 {
        self.desc.quantum()
    }

    /// Records the ring can hold when empty.
    #[inline]
    pub fn quantum_count(&self) -> u64 {
        match &self.inner {
            Some(raw) => raw.capacity / self.desc.quantum(),
            None => 0,
        }
    }

    /// The bound descriptor, for rebroadcast to a peer by an outer handshake
    /// layer.
    #[inline]
    pub fn descriptor(&self) -> &QueueDescriptor {
        &self.desc
    }

    /// Write one record. Forwards to [`write_slice`](Self::write_slice) with
    /// count 1.
    #[inline]
    pub fn write(&mut self, record: &T) -> bool {
        self.write_slice(slice::from_ref(record))
    }

    /// Write `records.len()` records, all or nothing.
    ///
    /// Returns false, with no side effect, unless the free space observed at
    /// the atomic check point covers the whole slice.
    pub fn write_slice(&mut self, records: &[T]) -> bool {
        let Some(raw) = self.inner.as_ref() else {
            return false;
        };
        let len = (records.len() * size_of::<T>()) as u64;
        let Some(tx) = raw.begin_write(len) else {
            return false;
        };
        // SAFETY: the slice spans exactly `len` readable bytes and `tx` came
        // from begin_write on this queue.
        unsafe { raw.copy_in(tx, records.as_ptr() as *const u8) };
        raw.commit_write(len);
        true
    }

    /// Read one record. Forwards to [`read_slice`](Self::read_slice) with
    /// count 1.
    #[inline]
    pub fn read(&mut self, record: &mut T) -> bool {
        self.read_slice(slice::from_mut(record))
    }

    /// Read `records.len()` records, all or nothing.
    pub fn read_slice(&mut self, records: &mut [T]) -> bool {
        let Some(raw) = self.inner.as_ref() else {
            return false;
        };
        let len = (records.len() * size_of::<T>()) as u64;
        let Some(tx) = raw.begin_read(len) else {
            return false;
        };
        // SAFETY: the slice spans exactly `len` writable bytes and `tx` came
        // from begin_read on this queue.
        unsafe { raw.copy_out(tx, records.as_mut_ptr() as *mut u8) };
        raw.commit_read(len);
        true
    }
}
