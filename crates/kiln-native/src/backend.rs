//! The code-generation seam used by the loader.
//!
//! A backend works in generations: it is initialized (or reset) against a
//! [`LinkTarget`], receives functions one at a time, and finalizes them into
//! a single executable [`CodeBlob`]. Offsets handed out by
//! [`JitBackend::compile_function`] are relative to that blob.

use std::sync::Arc;

use kiln_code::{Code, FunSig, Function};

use crate::error::NativeError;
use crate::memory::ExecutableMemory;

/// Addresses generated code is linked against.
#[derive(Debug, Clone, Default)]
pub struct LinkTarget {
    /// Base address of the global storage block.
    pub globals_base: usize,
    /// Byte offset of each global inside the storage block.
    pub global_offsets: Vec<usize>,
    /// Address of the function-table slot of each function id. Calls load
    /// their callee from here, so slot updates take effect immediately.
    pub slots: Vec<usize>,
    /// Kind-level signature of each function id.
    pub signatures: Vec<Arc<FunSig>>,
}

impl LinkTarget {
    pub fn slot(&self, fid: u32) -> Option<usize> {
        self.slots.get(fid as usize).copied()
    }

    pub fn global_addr(&self, global: u32) -> Option<usize> {
        self.global_offsets.get(global as usize).map(|off| self.globals_base + off)
    }
}

/// Code offset of each opcode, relative to the start of its function.
/// Functions shorter than 64 KiB use the compact form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOffsets {
    Small(Vec<u16>),
    Large(Vec<u32>),
}

impl DebugOffsets {
    pub(crate) fn from_offsets(offsets: Vec<u32>, code_size: usize) -> Self {
        if code_size <= u16::MAX as usize {
            DebugOffsets::Small(offsets.into_iter().map(|o| o as u16).collect())
        } else {
            DebugOffsets::Large(offsets)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DebugOffsets::Small(v) => v.len(),
            DebugOffsets::Large(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, op: usize) -> Option<u32> {
        match self {
            DebugOffsets::Small(v) => v.get(op).map(|o| *o as u32),
            DebugOffsets::Large(v) => v.get(op).copied(),
        }
    }

    /// Index of the opcode whose code contains `offset`: the last opcode
    /// starting at or before it.
    pub fn op_at(&self, offset: u32) -> Option<usize> {
        let count = match self {
            DebugOffsets::Small(v) => v.partition_point(|o| (*o as u32) <= offset),
            DebugOffsets::Large(v) => v.partition_point(|o| *o <= offset),
        };
        count.checked_sub(1)
    }
}

/// Placement of one compiled function inside a blob.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub findex: u32,
    pub offset: usize,
    pub size: usize,
    pub debug: DebugOffsets,
}

/// The executable output of one backend generation.
#[derive(Debug)]
pub struct CodeBlob {
    memory: ExecutableMemory,
    functions: Vec<CompiledFunction>,
}

impl CodeBlob {
    pub(crate) fn new(memory: ExecutableMemory, functions: Vec<CompiledFunction>) -> Self {
        Self { memory, functions }
    }

    pub fn base(&self) -> usize {
        self.memory.ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Functions in compilation order, hence sorted by offset.
    pub fn functions(&self) -> &[CompiledFunction] {
        &self.functions
    }

    pub fn address_of(&self, offset: usize) -> usize {
        self.base() + offset
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.size()
    }
}

pub trait JitBackend {
    /// Starts a generation for a freshly allocated module.
    fn init(&mut self, target: LinkTarget) -> Result<(), NativeError>;

    /// Compiles one function and returns its offset inside the blob the
    /// next [`JitBackend::finalize`] produces.
    fn compile_function(&mut self, code: &Code, function: &Function) -> Result<usize, NativeError>;

    /// Emits every function compiled since the last init/reset into one
    /// executable blob.
    fn finalize(&mut self) -> Result<CodeBlob, NativeError>;

    /// Starts a new generation, dropping anything compiled but not
    /// finalized. Used between hot reloads.
    fn reset(&mut self, target: LinkTarget) -> Result<(), NativeError>;

    /// Number of bytes [`JitBackend::patch_method`] overwrites. Every
    /// compiled body is at least this long.
    fn patch_len(&self) -> usize;

    /// Rewrites the start of the body at `old_fun` into an indirect jump
    /// through `slot`.
    ///
    /// # Safety
    /// `old_fun` must be the entry of a function emitted by this backend
    /// and `slot` a live function-table slot.
    unsafe fn patch_method(&self, old_fun: usize, slot: usize) -> Result<(), NativeError>;
}
