//! Position arithmetic for the byte ring.
//!
//! The two position counters count total bytes ever written / consumed, not
//! ring indices. All physical addressing is derived from them modulo the
//! capacity, and a request that crosses the ring boundary decomposes into at
//! most two contiguous runs. Capacity only has to be a multiple of the record
//! quantum, not a power of two, so indices come from `%` rather than a mask.

/// Bytes written but not yet consumed.
///
/// Unsigned wrapping subtraction keeps the result meaningful even if the
/// counters ever wrapped, provided the occupancy invariant `W - R <= C` held
/// throughout.
#[inline(always)]
pub fn occupancy(write_pos: u64, read_pos: u64) -> u64 {
    write_pos.wrapping_sub(read_pos)
}

/// Bytes the writer may produce before the ring is full.
#[inline(always)]
pub fn free_space(capacity: u64, write_pos: u64, read_pos: u64) -> u64 {
    capacity.saturating_sub(occupancy(write_pos, read_pos))
}

/// The (possibly wrapping) byte runs one bulk operation touches.
///
/// The first run starts at `first_offset` inside the ring; the second run is
/// empty unless the request wraps, and always starts at ring offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub first_offset: u64,
    pub first_len: u64,
    pub second_len: u64,
}

impl Transaction {
    #[inline(always)]
    pub fn len(&self) -> u64 {
        self.first_len + self.second_len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn wraps(&self) -> bool {
        self.second_len != 0
    }
}

/// Split `len` bytes starting at absolute position `pos` over a ring of
/// `capacity` bytes.
///
/// With `capacity = 8`, `pos = 6`, `len = 4` the split is a 2-byte run at
/// offset 6 followed by a 2-byte run at offset 0. A request that ends exactly
/// on the boundary keeps a single run.
#[inline(always)]
pub fn split(pos: u64, len: u64, capacity: u64) -> Transaction {
    let first_offset = pos % capacity;
    let first_len = len.min(capacity - first_offset);
    Transaction {
        first_offset,
        first_len,
        second_len: len - first_len,
    }
}
