use std::alloc::{self, Layout};

use kiln_code::TypeKind;
use kiln_layout::{pointer_size, GlobalLayout};

use crate::error::LoadError;

/// The zero-initialized storage block of a module's globals.
///
/// The block never moves once allocated: generated code and the GC root
/// set hold raw addresses into it.
pub struct GlobalStorage {
    ptr: *mut u8,
    alloc: Option<Layout>,
    layout: GlobalLayout,
    kinds: Vec<TypeKind>,
}

// The block is plain memory. Readers and writers synchronize through the
// code that owns the values stored in it.
unsafe impl Send for GlobalStorage {}
unsafe impl Sync for GlobalStorage {}

impl GlobalStorage {
    pub fn allocate(kinds: Vec<TypeKind>) -> Result<Self, LoadError> {
        let layout = GlobalLayout::compute(&kinds);
        if layout.size() == 0 {
            return Ok(Self { ptr: std::ptr::NonNull::<u64>::dangling().as_ptr().cast(), alloc: None, layout, kinds });
        }
        let align = layout.align().max(pointer_size());
        let alloc = Layout::from_size_align(layout.size(), align).map_err(|_| LoadError::Allocation { what: "globals" })?;
        let ptr = unsafe { alloc::alloc_zeroed(alloc) };
        if ptr.is_null() {
            return Err(LoadError::Allocation { what: "globals" });
        }
        log::debug!("{} globals in {} bytes at {:p}", kinds.len(), layout.size(), ptr);
        Ok(Self { ptr, alloc: Some(alloc), layout, kinds })
    }

    pub fn base(&self) -> usize {
        self.ptr as usize
    }

    pub fn layout(&self) -> &GlobalLayout {
        &self.layout
    }

    pub fn kind(&self, global: u32) -> Option<TypeKind> {
        self.kinds.get(global as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Address of the slot of `global`.
    pub fn addr(&self, global: u32) -> Option<usize> {
        self.layout.offset(global as usize).map(|off| self.base() + off)
    }

    /// Raw value of a global, zero-extended to 64 bits. Floats are returned
    /// as their bit pattern.
    pub fn read(&self, global: u32) -> Option<u64> {
        let addr = self.addr(global)?;
        let kind = self.kind(global)?;
        let bits = unsafe {
            match kind {
                TypeKind::Void => 0,
                TypeKind::U8 | TypeKind::Bool => std::ptr::read(addr as *const u8) as u64,
                TypeKind::U16 => std::ptr::read(addr as *const u16) as u64,
                TypeKind::I32 | TypeKind::F32 => std::ptr::read(addr as *const u32) as u64,
                TypeKind::I64 | TypeKind::F64 => std::ptr::read(addr as *const u64),
                _ => std::ptr::read(addr as *const usize) as u64,
            }
        };
        Some(bits)
    }

    /// Stores a pointer-sized word into a pointer global.
    ///
    /// # Safety
    /// `global` must be of a pointer kind and `value` a valid value for it.
    pub(crate) unsafe fn write_word(&self, global: u32, value: usize) -> bool {
        match self.addr(global) {
            Some(addr) => {
                std::ptr::write(addr as *mut usize, value);
                true
            }
            None => false,
        }
    }
}

impl Drop for GlobalStorage {
    fn drop(&mut self) {
        if let Some(alloc) = self.alloc {
            unsafe { alloc::dealloc(self.ptr, alloc) };
        }
    }
}
