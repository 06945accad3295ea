//! A region of `N` bytes mapped twice at consecutive virtual addresses, so
//! any contiguous range of length `<= N` starting anywhere in `[0, N)`
//! addresses as a single linear slice regardless of wrap. See
//! `kalamay-vmap-rs`'s `Ring` for the same circular address-mapping trick;
//! this module follows its shape but speaks the vocabulary of this crate's
//! own `RingBuffer` layer instead of `Read`/`Write`.

use crate::error::MappingError;

#[cfg(unix)]
mod unix {
    use super::MappingError;
    use std::ffi::CString;
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(0);

    pub fn page_size() -> usize {
        // SAFETY: sysconf with a well-known name is always sound to call.
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    /// Creates an `N`-byte region mapped twice back to back. Returns the
    /// base pointer and the rounded-up size. On any failure, everything
    /// acquired so far is released before the error surfaces.
    pub fn map_double(requested: usize) -> Result<(*mut u8, usize), MappingError> {
        let page = page_size().max(1);
        let len = round_up(requested.max(1), page);

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("/streamcore-pid{}-buf{}", std::process::id(), id);
        let cname = CString::new(name).expect("generated shm name is never NUL-containing");

        // SAFETY: shm_open with O_CREAT|O_EXCL|O_RDWR on a process-unique
        // name either yields a fresh fd or fails; no aliasing possible.
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(MappingError::ShmCreate(io::Error::last_os_error()));
        }
        // From here on, unlink the name no matter what: the fd (or the
        // mappings, once they exist) keep the object alive.
        let _ = unsafe { libc::shm_unlink(cname.as_ptr()) };

        let truncate = unsafe { libc::ftruncate(fd, len as libc::off_t) };
        if truncate != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(MappingError::ShmTruncate(err));
        }

        // Reserve 2N of address space with an anonymous mapping so the two
        // fixed-address views below land in unused space.
        let reservation = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len.saturating_mul(2),
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if reservation == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(MappingError::Reserve(err));
        }

        let base = reservation as *mut u8;
        let first = unsafe {
            libc::mmap(
                base as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_FIXED | libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if first == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(reservation, len.saturating_mul(2));
                libc::close(fd);
            }
            return Err(MappingError::Map(err));
        }

        let second = unsafe {
            libc::mmap(
                base.add(len) as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_FIXED | libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // The fd is no longer needed once both views are mapped; the
        // mappings keep the underlying object alive.
        unsafe { libc::close(fd) };
        if second == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(reservation, len.saturating_mul(2)) };
            return Err(MappingError::Map(err));
        }

        Ok((base, len))
    }

    pub unsafe fn unmap_double(base: *mut u8, len: usize) {
        libc::munmap(base as *mut libc::c_void, len.saturating_mul(2));
    }

    fn round_up(value: usize, multiple: usize) -> usize {
        let rem = value % multiple;
        if rem == 0 {
            value
        } else {
            value + (multiple - rem)
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::MappingError;
    use std::io;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFileEx, UnmapViewOfFile, VirtualAlloc, VirtualFree,
        FILE_MAP_WRITE, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    pub fn page_size() -> usize {
        unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwAllocationGranularity as usize
        }
    }

    pub fn map_double(requested: usize) -> Result<(*mut u8, usize), MappingError> {
        let granularity = page_size().max(1);
        let len = round_up(requested.max(1), granularity);

        let mapping: HANDLE = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                (len >> 32) as u32,
                (len & 0xFFFF_FFFF) as u32,
                std::ptr::null(),
            )
        };
        if mapping == 0 {
            return Err(MappingError::ShmCreate(io::Error::last_os_error()));
        }

        // Reserve 2N of address space to place both views contiguously.
        let reservation = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                len.saturating_mul(2),
                MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if reservation.is_null() {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(mapping) };
            return Err(MappingError::Reserve(err));
        }
        unsafe { VirtualFree(reservation, 0, MEM_RELEASE) };
        let base = reservation as *mut u8;

        let first = unsafe { MapViewOfFileEx(mapping, FILE_MAP_WRITE, 0, 0, len, base as _) };
        if first.is_null() {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(mapping) };
            return Err(MappingError::Map(err));
        }
        let second = unsafe {
            MapViewOfFileEx(mapping, FILE_MAP_WRITE, 0, 0, len, base.add(len) as _)
        };
        unsafe { CloseHandle(mapping) };
        if second.is_null() {
            let err = io::Error::last_os_error();
            unsafe { UnmapViewOfFile(first) };
            return Err(MappingError::Map(err));
        }

        Ok((base, len))
    }

    pub unsafe fn unmap_double(base: *mut u8, len: usize) {
        UnmapViewOfFile(base as _);
        UnmapViewOfFile(base.add(len) as _);
    }

    fn round_up(value: usize, multiple: usize) -> usize {
        let rem = value % multiple;
        if rem == 0 {
            value
        } else {
            value + (multiple - rem)
        }
    }
}

#[cfg(unix)]
use unix as platform;
#[cfg(windows)]
use windows as platform;

/// A double-mapped contiguous byte region: `base[0..N)` and
/// `base[N..2N)` alias the same physical pages.
pub struct MappedRing {
    base: *mut u8,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by the surrounding `RingBuffer`;
// `MappedRing` itself performs no internal synchronization, matching the
// contract the owner provides.
unsafe impl Send for MappedRing {}

impl MappedRing {
    pub fn new(requested: usize) -> Result<Self, MappingError> {
        let (base, len) = platform::map_double(requested)?;
        Ok(Self { base, len })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// The full `2N`-byte double-mapped window, mutable.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `base` points to `2*len` valid, mapped bytes for the
        // lifetime of `self`.
        unsafe { std::slice::from_raw_parts_mut(self.base, self.len.saturating_mul(2)) }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base, self.len.saturating_mul(2)) }
    }
}

impl Drop for MappedRing {
    fn drop(&mut self) {
        unsafe { platform::unmap_double(self.base, self.len) };
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_page_aligned() {
        let ring = MappedRing::new(1).unwrap();
        let page = unix::page_size();
        assert_eq!(ring.capacity() % page, 0);
        assert!(ring.capacity() >= page);
    }

    #[test]
    fn writes_alias_across_the_seam() {
        let mut ring = MappedRing::new(4096).unwrap();
        let n = ring.capacity();
        {
            let slice = ring.as_mut_slice();
            slice[0] = 0xAB;
            slice[n - 1] = 0xCD;
        }
        let slice = ring.as_slice();
        assert_eq!(slice[n], 0xAB, "byte at base+0 mirrors at base+N");
        assert_eq!(slice[2 * n - 1], 0xCD, "byte at base+N-1 mirrors at base+2N-1");
    }

    #[test]
    fn writing_the_mirror_is_observable_at_the_origin() {
        let mut ring = MappedRing::new(4096).unwrap();
        let n = ring.capacity();
        ring.as_mut_slice()[n] = 0x7E;
        assert_eq!(ring.as_slice()[0], 0x7E);
    }
}
