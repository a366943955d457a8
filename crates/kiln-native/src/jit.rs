use std::mem;

use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use kiln_code::{Code, Function};

use crate::backend::{CodeBlob, CompiledFunction, DebugOffsets, JitBackend, LinkTarget};
use crate::memory::ExecutableMemory;
use crate::patch::{patch_method, PatchKind};
use crate::translator::func::translate_function;
use crate::translator::helpers::build_isa;
use crate::NativeError;

/// Start alignment of every function inside a blob.
const FUNCTION_ALIGN: usize = 16;

/// A [`JitBackend`] compiling each function with Cranelift into one shared
/// code buffer.
///
/// Generated code refers to globals and call slots by absolute address, so
/// a compiled body needs no relocation once copied into executable memory.
pub struct CraneliftBackend {
    isa: OwnedTargetIsa,
    patch: PatchKind,
    fctx: FunctionBuilderContext,
    target: Option<LinkTarget>,
    buffer: Vec<u8>,
    functions: Vec<CompiledFunction>,
}

impl CraneliftBackend {
    pub fn new() -> Result<Self, NativeError> {
        let isa = build_isa(true)?;
        let patch = PatchKind::host()?;
        log::debug!("cranelift backend for {}", isa.triple());
        Ok(Self {
            isa,
            patch,
            fctx: FunctionBuilderContext::new(),
            target: None,
            buffer: Vec::new(),
            functions: Vec::new(),
        })
    }

    fn start_generation(&mut self, target: LinkTarget) {
        self.target = Some(target);
        self.buffer.clear();
        self.functions.clear();
    }
}

impl JitBackend for CraneliftBackend {
    fn init(&mut self, target: LinkTarget) -> Result<(), NativeError> {
        self.start_generation(target);
        Ok(())
    }

    fn compile_function(&mut self, code: &Code, function: &Function) -> Result<usize, NativeError> {
        let target = self.target.as_ref().ok_or(NativeError::NotInitialized)?;
        let func = translate_function(code, function, target, &*self.isa, &mut self.fctx).inspect_err(|_| {
            // A builder abandoned mid-function leaves its context dirty.
            self.fctx = FunctionBuilderContext::new();
        })?;

        let mut ctx = Context::for_function(func);
        let compiled = ctx
            .compile(&*self.isa, &mut ControlPlane::default())
            .map_err(|e| NativeError::CraneliftGen(e.inner))?;
        if !compiled.buffer.relocs().is_empty() {
            return Err(NativeError::UnexpectedRelocation(function.findex));
        }
        let bytes = compiled.code_buffer();
        let starts = compiled
            .buffer
            .get_srclocs_sorted()
            .iter()
            .filter(|s| !s.loc.is_default())
            .map(|s| (s.loc.bits() as usize, s.start));
        let offsets = op_offsets(starts, function.ops.len());

        let aligned = self.buffer.len().next_multiple_of(FUNCTION_ALIGN);
        self.buffer.resize(aligned, 0);
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(bytes);
        // Room for the entry patch of a later hot reload.
        let size = bytes.len().max(self.patch.len());
        self.buffer.resize(offset + size, 0);

        log::debug!("compiled fun${} at +{:#x} ({} bytes)", function.findex, offset, size);
        self.functions.push(CompiledFunction {
            findex: function.findex,
            offset,
            size,
            debug: DebugOffsets::from_offsets(offsets, size),
        });
        Ok(offset)
    }

    fn finalize(&mut self) -> Result<CodeBlob, NativeError> {
        let memory = ExecutableMemory::from_code(&self.buffer)?;
        self.buffer.clear();
        let functions = mem::take(&mut self.functions);
        log::debug!("finalized {} functions into {} bytes at {:#x}", functions.len(), memory.len(), memory.ptr() as usize);
        Ok(CodeBlob::new(memory, functions))
    }

    fn reset(&mut self, target: LinkTarget) -> Result<(), NativeError> {
        self.start_generation(target);
        Ok(())
    }

    fn patch_len(&self) -> usize {
        self.patch.len()
    }

    unsafe fn patch_method(&self, old_fun: usize, slot: usize) -> Result<(), NativeError> {
        patch_method(self.patch, old_fun, slot)
    }
}

/// First code offset of each of `count` opcodes, given `(opcode, start)`
/// pairs. Opcodes that emitted no code share the offset of the previous
/// one, so the table is monotonic.
pub(crate) fn op_offsets(starts: impl IntoIterator<Item = (usize, u32)>, count: usize) -> Vec<u32> {
    let mut first: Vec<Option<u32>> = vec![None; count];
    for (op, start) in starts {
        if let Some(slot) = first.get_mut(op) {
            *slot = Some(slot.map_or(start, |s| s.min(start)));
        }
    }
    let mut prev = 0;
    first
        .into_iter()
        .map(|start| {
            prev = start.unwrap_or(prev).max(prev);
            prev
        })
        .collect()
}
