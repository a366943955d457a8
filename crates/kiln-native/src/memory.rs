//! Page-granular executable memory.
//!
//! Code is written into a read-write mapping which is then flipped to
//! read-execute. Patching temporarily reopens the affected pages.

use crate::error::NativeError;

#[derive(Debug)]
pub struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
    mapped: usize,
}

// The mapping is never written through `&self`.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl ExecutableMemory {
    /// Copies `code` into a fresh executable mapping. Empty code yields an
    /// empty region with a null base.
    pub fn from_code(code: &[u8]) -> Result<Self, NativeError> {
        if code.is_empty() {
            return Ok(Self { ptr: std::ptr::null_mut(), len: 0, mapped: 0 });
        }
        let mapped = round_to_pages(code.len());
        let ptr = alloc_region(mapped)?;
        unsafe { std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len()) };
        let memory = Self { ptr, len: code.len(), mapped };
        protect(ptr as usize, mapped, libc::PROT_READ | libc::PROT_EXEC)?;
        flush_icache(ptr as usize, code.len());
        Ok(memory)
    }

    pub fn ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        let rc = unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.mapped) };
        if rc != 0 {
            log::warn!("munmap failed: {}", std::io::Error::last_os_error());
        }
    }
}

pub(crate) fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

fn round_to_pages(len: usize) -> usize {
    let page = page_size();
    len.div_ceil(page) * page
}

fn alloc_region(len: usize) -> Result<*mut u8, NativeError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(NativeError::last_os_error("mmap"));
    }
    Ok(ptr as *mut u8)
}

fn protect(addr: usize, len: usize, prot: libc::c_int) -> Result<(), NativeError> {
    let rc = unsafe { libc::mprotect(addr as *mut libc::c_void, len, prot) };
    if rc != 0 {
        return Err(NativeError::last_os_error("mprotect"));
    }
    Ok(())
}

/// Overwrites already executable code at `addr`.
///
/// The pages stay executable while they are written when the host allows
/// it, so other threads running nearby code are not faulted.
///
/// # Safety
/// `addr..addr + bytes.len()` must lie inside a live executable mapping and
/// no thread may be executing the overwritten bytes.
pub(crate) unsafe fn write_code(addr: usize, bytes: &[u8]) -> Result<(), NativeError> {
    let page = page_size();
    let start = addr & !(page - 1);
    let len = round_to_pages(addr + bytes.len() - start);
    if protect(start, len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC).is_err() {
        protect(start, len, libc::PROT_READ | libc::PROT_WRITE)?;
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
    protect(start, len, libc::PROT_READ | libc::PROT_EXEC)?;
    flush_icache(addr, bytes.len());
    Ok(())
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
fn flush_icache(addr: usize, len: usize) {
    extern "C" {
        fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
    }
    unsafe { __clear_cache(addr as *mut libc::c_char, (addr + len) as *mut libc::c_char) };
}

#[cfg(all(target_arch = "aarch64", target_os = "macos"))]
fn flush_icache(addr: usize, len: usize) {
    extern "C" {
        fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
    }
    unsafe { sys_icache_invalidate(addr as *mut libc::c_void, len) };
}

// x86 keeps instruction and data caches coherent.
#[cfg(not(all(target_arch = "aarch64", any(target_os = "linux", target_os = "macos"))))]
fn flush_icache(_addr: usize, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_code_and_rounds_mapping() {
        let code = [0x90u8; 100];
        let memory = ExecutableMemory::from_code(&code).unwrap();
        assert_eq!(memory.len(), 100);
        assert_eq!(memory.ptr() as usize % page_size(), 0);
        let copied = unsafe { std::slice::from_raw_parts(memory.ptr(), memory.len()) };
        assert_eq!(copied, &code[..]);
    }

    #[test]
    fn test_empty_code_maps_nothing() {
        let memory = ExecutableMemory::from_code(&[]).unwrap();
        assert!(memory.is_empty());
        assert!(memory.ptr().is_null());
    }

    #[test]
    fn test_write_code_patches_in_place() {
        let memory = ExecutableMemory::from_code(&[0u8; 32]).unwrap();
        let addr = memory.ptr() as usize + 8;
        unsafe { write_code(addr, &[1, 2, 3]).unwrap() };
        let bytes = unsafe { std::slice::from_raw_parts(memory.ptr(), 12) };
        assert_eq!(&bytes[8..11], &[1, 2, 3]);
        assert_eq!(bytes[11], 0);
    }
}
