//! JIT code buffer backed by mmap'd memory.
//!
//! Each compiled block owns one buffer; the backend also keeps one
//! for its call trampoline. Buffers are mapped read+write+execute for
//! the (single-threaded) lifetime of the JIT; `set_executable` /
//! `set_writable` are available for embedders that want strict W^X.

use std::io;
use std::ptr;

pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a buffer of at least `size` bytes (rounded up to the
    /// page size).
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
        })
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: offset is within the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        assert!(self.offset < self.size, "code buffer overflow");
        // SAFETY: bounds asserted above.
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        assert!(self.offset + 2 <= self.size, "code buffer overflow");
        // SAFETY: bounds asserted above.
        unsafe { (self.ptr.add(self.offset) as *mut u16).write_unaligned(val) };
        self.offset += 2;
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        assert!(self.offset + 4 <= self.size, "code buffer overflow");
        // SAFETY: bounds asserted above.
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        assert!(self.offset + 8 <= self.size, "code buffer overflow");
        // SAFETY: bounds asserted above.
        unsafe { (self.ptr.add(self.offset) as *mut u64).write_unaligned(val) };
        self.offset += 8;
    }

    /// Patch a u32 at a given offset (for back-patching jumps).
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size);
        // SAFETY: bounds asserted above.
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        // SAFETY: bounds asserted above.
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    // -- Permission management --

    pub fn set_executable(&self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)
    }

    pub fn set_writable(&self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_WRITE)
    }

    fn protect(&self, prot: libc::c_int) -> io::Result<()> {
        // SAFETY: the range is exactly our mapping.
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: unmapping our own mapping.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
