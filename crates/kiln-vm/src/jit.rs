//! Sequencing of the code-generation backend for a module load.

use kiln_code::Code;
use kiln_native::{CodeBlob, CraneliftBackend, CraneliftBridge, JitBackend, LinkTarget};
use once_cell::sync::OnceCell;

use crate::error::LoadError;
use crate::globals::GlobalStorage;
use crate::linker::ModuleContext;

pub type BoxedBackend = Box<dyn JitBackend + Send>;

pub fn default_backend() -> Result<BoxedBackend, LoadError> {
    Ok(Box::new(CraneliftBackend::new()?))
}

/// Installs the Cranelift call bridge unless a bridge is already in place.
pub fn ensure_call_bridge() -> Result<(), LoadError> {
    static INSTALLED: OnceCell<()> = OnceCell::new();
    INSTALLED.get_or_try_init(|| {
        if kiln_rt::call_bridge().is_err() {
            CraneliftBridge::install()?;
            log::debug!("cranelift call bridge installed");
        }
        Ok::<_, LoadError>(())
    })?;
    Ok(())
}

pub fn link_target(storage: &GlobalStorage, ctx: &ModuleContext, slots: Vec<usize>) -> LinkTarget {
    LinkTarget {
        globals_base: storage.base(),
        global_offsets: storage.layout().offsets().to_vec(),
        slots,
        signatures: ctx.signatures().to_vec(),
    }
}

/// Compiles every function of `code` in declaration order into one blob.
/// Returns the blob and the `(function id, offset)` of each function.
pub fn compile_all(
    backend: &mut dyn JitBackend,
    code: &Code,
    target: LinkTarget,
) -> Result<(CodeBlob, Vec<(u32, usize)>), LoadError> {
    backend.init(target)?;
    let mut placed = Vec::with_capacity(code.functions.len());
    for function in &code.functions {
        let offset = backend.compile_function(code, function).map_err(|err| {
            log::error!("failed to compile fun${}: {}", function.findex, err);
            err
        })?;
        placed.push((function.findex, offset));
    }
    let blob = backend.finalize()?;
    log::debug!("{} functions in {} bytes at {:#x}", placed.len(), blob.size(), blob.base());
    Ok((blob, placed))
}
