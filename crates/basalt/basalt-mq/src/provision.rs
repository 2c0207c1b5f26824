//! Descriptor provisioning over a single file-backed shared-memory object.
//!
//! The queue core never allocates backing memory; this module plays the
//! descriptor-provider role for tests, benches and demos. Real deployments
//! build descriptors in whatever handshake layer duplicates the fds across
//! processes.
//!
//! Layout inside the one fd: the read counter at offset 0, the write counter
//! one cache line later so the two hot words never share a line, and the data
//! ring from [`RING_OFFSET`].

use crate::descriptor::{COUNTER_EXTENT, Grantor, NativeHandle, QueueDescriptor};
use basalt_mmap::ShmFile;
use std::io;
use std::path::Path;

pub const READ_COUNTER_OFFSET: u64 = 0;
pub const WRITE_COUNTER_OFFSET: u64 = 64;
pub const RING_OFFSET: u64 = 128;

/// Create a backing object at `path` sized for `capacity_bytes` of ring and
/// describe it.
pub fn create<P: AsRef<Path>>(
    path: P,
    capacity_bytes: u64,
    quantum: u64,
) -> io::Result<QueueDescriptor> {
    let file = ShmFile::create_rw(path, RING_OFFSET + capacity_bytes)?;
    Ok(descriptor_over(file, capacity_bytes, quantum))
}

/// Describe an existing backing object at `path`, inferring the ring capacity
/// from the object length.
pub fn open<P: AsRef<Path>>(path: P, quantum: u64) -> io::Result<QueueDescriptor> {
    let file = ShmFile::open_rw(path)?;
    let len = file.len();
    if len < RING_OFFSET {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "backing object too small for the queue layout",
        ));
    }
    let capacity_bytes = len - RING_OFFSET;
    Ok(descriptor_over(file, capacity_bytes, quantum))
}

fn descriptor_over(file: ShmFile, capacity_bytes: u64, quantum: u64) -> QueueDescriptor {
    let grantors = vec![
        Grantor {
            fd_index: 0,
            offset: READ_COUNTER_OFFSET,
            extent: COUNTER_EXTENT,
        },
        Grantor {
            fd_index: 0,
            offset: WRITE_COUNTER_OFFSET,
            extent: COUNTER_EXTENT,
        },
        Grantor {
            fd_index: 0,
            offset: RING_OFFSET,
            extent: capacity_bytes,
        },
    ];
    QueueDescriptor::new(
        capacity_bytes,
        quantum,
        NativeHandle::new(vec![file.into_fd()]),
        grantors,
    )
}
