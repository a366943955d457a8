//! Hot reload: recompile the functions a new unit changed and redirect
//! the live module to them.

use std::sync::Arc;

use kiln_code::Code;
use kiln_rt::{null_function, StubFn};

use crate::error::LoadError;
use crate::hash::hash_all;
use crate::jit;
use crate::linker::{bind_owners, function_signatures, FunctionIndex, ModuleContext};
use crate::module::{Module, PatchImage};
use crate::natives::NativeResolver;
use crate::symbols::CodeImage;

impl Module {
    /// Applies the changes of `code` to this module.
    ///
    /// Functions are matched by the object field they implement and natives
    /// by library and name, so ids may differ between the two units.
    /// Matched functions whose content changed are recompiled against this
    /// module's globals and function slots; their old bodies are rewritten
    /// to jump through the slot so existing callers reach the new code.
    /// Functions without a counterpart are compiled alongside into slots of
    /// their own. Returns `false` when nothing changed.
    pub fn patch(&self, code: impl Into<Arc<Code>>) -> Result<bool, LoadError> {
        let mut hot_guard = self.hot.lock();
        let hot = hot_guard.as_mut().ok_or(LoadError::HotReloadDisabled)?;
        let code = code.into();

        let index = FunctionIndex::build(&code)?;
        let owners = bind_owners(&code, &index)?;
        let hashes = hash_all(&code, &index, &owners)?;

        // --- Match --- //
        // New function id -> old function id, for every matched function.
        let mut matched = vec![None; index.len()];
        let mut changed = Vec::new();
        let mut unmatched = Vec::new();
        for (pos, owner) in owners.iter().enumerate() {
            let new_fid = code.functions[pos].findex;
            let old_pos = owner
                .as_ref()
                .and_then(|owner| self.image.owners.iter().position(|o| o.as_ref() == Some(owner)));
            let (Some(owner), Some(old_pos)) = (owner, old_pos) else {
                if let Some(owner) = owner {
                    log::debug!("{}.{} has no counterpart", owner.type_name, owner.field);
                }
                unmatched.push(pos);
                continue;
            };
            matched[new_fid as usize] = Some(self.code.functions[old_pos].findex);
            if hot.hashes[old_pos] != hashes[pos] {
                log::info!("{}.{} has been modified", owner.type_name, owner.field);
                hot.hashes[old_pos] = hashes[pos];
                changed.push((pos, old_pos));
            }
        }
        if changed.is_empty() {
            log::info!("No changes found");
            return Ok(false);
        }

        // --- Slots --- //
        let own = Arc::new(ModuleContext::new(function_signatures(&code, &index)?));
        let mut resolver = NativeResolver::new(&hot.options);
        for native in &code.natives {
            let old = self.code.natives.iter().find(|n| n.lib == native.lib && n.name == native.name);
            match old {
                Some(old) => matched[native.findex as usize] = Some(old.findex),
                None => own.set(native.findex, resolver.resolve(&code, native)?),
            }
        }
        let libraries = resolver.into_libraries();
        for pos in &unmatched {
            own.set(code.functions[*pos].findex, null_function as StubFn as usize);
        }
        let slots = (0..index.len() as u32)
            .map(|fid| {
                let old_slot = matched[fid as usize].and_then(|old| self.ctx.slot_addr(old));
                old_slot.or_else(|| own.slot_addr(fid)).unwrap_or_default()
            })
            .collect();
        let target = jit::link_target(&self.storage, &own, slots);
        hot.backend.reset(target)?;

        // --- Compile --- //
        let mut compiled = Vec::new();
        for (pos, old_pos) in changed {
            let function = &code.functions[pos];
            match hot.backend.compile_function(&code, function) {
                Ok(offset) => compiled.push((offset, self.code.functions[old_pos].findex)),
                Err(err) => log::warn!("failed to recompile fun${}: {}", function.findex, err),
            }
        }
        if compiled.is_empty() {
            log::info!("No changes found");
            return Ok(false);
        }
        let mut added = Vec::new();
        for pos in unmatched {
            let function = &code.functions[pos];
            match hot.backend.compile_function(&code, function) {
                Ok(offset) => added.push((offset, function.findex)),
                Err(err) => log::warn!("failed to compile new fun${}: {}", function.findex, err),
            }
        }

        // --- Redirect --- //
        let blob = hot.backend.finalize()?;
        for (offset, fid) in &added {
            own.set(*fid, blob.address_of(*offset));
        }
        for (offset, old_fid) in &compiled {
            let new_fun = blob.address_of(*offset);
            let (Some(old_fun), Some(slot)) = (self.ctx.get(*old_fid), self.ctx.slot_addr(*old_fid)) else { continue };
            unsafe { hot.backend.patch_method(old_fun, slot)? };
            self.ctx.set(*old_fid, new_fun);
            log::debug!("fun${} moved from {:#x} to {:#x}", old_fid, old_fun, new_fun);
        }
        self.types.flush_all();

        log::info!("{} functions patched, {} added", compiled.len(), added.len());
        self.patches.write().push(PatchImage {
            image: CodeImage { blob, code, index, owners },
            _slots: own,
            _libraries: libraries,
        });
        Ok(true)
    }
}
