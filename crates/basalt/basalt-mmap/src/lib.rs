use memmap2::{MmapOptions, MmapRaw};
use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    path::Path,
};

/// Host page size in bytes.
#[inline]
pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions and does not touch errno state we rely on.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 }
}

/// One shared read-write mapping of a byte range inside a shared-memory object.
///
/// mmap only accepts page-aligned file offsets while callers address arbitrary
/// intra-object byte ranges, so the requested offset is aligned downward and the
/// pre-pad bytes are mapped but never handed out. The mapping is released
/// exactly once, when the region is dropped.
pub struct SharedRegion {
    /// Page-aligned mapping; owns the munmap on drop.
    map: MmapRaw,
    /// Distance from the mapping base to the first requested byte.
    pad: usize,
    /// Requested extent in bytes.
    len: usize,
}

impl SharedRegion {
    /// Map `extent` bytes of `fd` starting at byte `offset`, shared read-write.
    pub fn map(fd: BorrowedFd<'_>, offset: u64, extent: usize) -> io::Result<Self> {
        let page = page_size();
        let aligned = (offset / page) * page;
        let pad = (offset - aligned) as usize;
        let map = MmapOptions::new()
            .offset(aligned)
            .len(pad + extent)
            .map_raw(fd.as_raw_fd())?;
        Ok(Self {
            map,
            pad,
            len: extent,
        })
    }

    /// Pointer to the first requested byte (not the mapping base).
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        // SAFETY: pad + len bytes were mapped, so base + pad stays in bounds.
        unsafe { self.map.as_ptr().add(self.pad) }
    }

    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        // SAFETY: pad + len bytes were mapped, so base + pad stays in bounds.
        unsafe { self.map.as_mut_ptr().add(self.pad) }
    }

    /// Requested extent in bytes, excluding the alignment pad.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total mapped bytes including the alignment pad.
    #[inline]
    pub fn mapped_len(&self) -> usize {
        self.map.len()
    }
}

/// A file-backed shared-memory object whose fd can be lent out for mapping.
pub struct ShmFile {
    file: File,
    len: u64,
}

impl ShmFile {
    /// Create a new object of `size_bytes`, truncating anything at `path`.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;
        Ok(Self {
            file,
            len: size_bytes,
        })
    }

    /// Open an existing object read-write.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }

    /// Give up the wrapper and keep only the descriptor.
    pub fn into_fd(self) -> OwnedFd {
        self.file.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(tag: &str) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/tmp/basalt_mmap_test_{tag}_{ts}")
    }

    #[test]
    fn region_roundtrip_at_unaligned_offset() {
        let path = temp_path("unaligned");
        let shm = ShmFile::create_rw(&path, 8192).unwrap();

        // 100 is not page aligned, so the mapping carries a pad.
        let w = SharedRegion::map(shm.as_fd(), 100, 16).unwrap();
        unsafe {
            let p = w.as_mut_ptr();
            *p.add(0) = 0xAB;
            *p.add(15) = 0xCD;
        }

        let r = SharedRegion::map(shm.as_fd(), 100, 16).unwrap();
        unsafe {
            let p = r.as_ptr();
            assert_eq!(*p.add(0), 0xAB);
            assert_eq!(*p.add(15), 0xCD);
        }

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn pad_accounting_spans_a_page_boundary() {
        let page = page_size();
        let path = temp_path("pad");
        let shm = ShmFile::create_rw(&path, 3 * page).unwrap();

        let region = SharedRegion::map(shm.as_fd(), page + 10, 32).unwrap();
        assert_eq!(region.len(), 32);
        assert_eq!(region.mapped_len(), 10 + 32);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn distinct_mappings_alias_the_same_bytes() {
        let path = temp_path("alias");
        let shm = ShmFile::create_rw(&path, 4096).unwrap();

        let a = SharedRegion::map(shm.as_fd(), 0, 64).unwrap();
        let b = SharedRegion::map(shm.as_fd(), 0, 64).unwrap();
        unsafe {
            a.as_mut_ptr().write(0x5A);
            assert_eq!(b.as_ptr().read(), 0x5A);
        }

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_rw_reports_existing_length() {
        let path = temp_path("len");
        {
            let _shm = ShmFile::create_rw(&path, 1234).unwrap();
        }
        let shm = ShmFile::open_rw(&path).unwrap();
        assert_eq!(shm.len(), 1234);

        let _ = fs::remove_file(&path);
    }
}
