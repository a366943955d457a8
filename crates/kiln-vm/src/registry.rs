//! The process-wide list of loaded modules.
//!
//! Readers never lock: they pin the current epoch and read whatever table
//! is installed. Writers copy the table, append, install the copy, and
//! leave the old one to be reclaimed once no reader can still see it.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::module::Module;

struct Registry {
    modules: Atomic<Vec<Arc<Module>>>,
    writer: Mutex<()>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry { modules: Atomic::null(), writer: Mutex::new(()) });

pub(crate) fn publish(module: Arc<Module>) {
    let _writer = REGISTRY.writer.lock();
    let guard = epoch::pin();
    let current = REGISTRY.modules.load(Ordering::Acquire, &guard);
    let mut next = unsafe { current.as_ref() }.cloned().unwrap_or_default();
    next.push(module);
    let count = next.len();
    let old = REGISTRY.modules.swap(Owned::new(next), Ordering::AcqRel, &guard);
    if !old.is_null() {
        unsafe { guard.defer_destroy(old) };
    }
    log::debug!("{} modules registered", count);
}

/// Runs `f` over the modules loaded so far.
pub fn with_modules<R>(f: impl FnOnce(&[Arc<Module>]) -> R) -> R {
    let guard = epoch::pin();
    let current = REGISTRY.modules.load(Ordering::Acquire, &guard);
    match unsafe { current.as_ref() } {
        Some(modules) => f(modules),
        None => f(&[]),
    }
}

pub fn modules() -> Vec<Arc<Module>> {
    with_modules(|m| m.to_vec())
}

pub fn module_count() -> usize {
    with_modules(|m| m.len())
}

/// The module whose code contains `addr`.
pub fn find_module(addr: usize) -> Option<Arc<Module>> {
    with_modules(|modules| modules.iter().find(|m| m.contains_code(addr)).cloned())
}

/// Function-body ranges of every module, patch images included.
pub fn code_ranges() -> Vec<(usize, usize)> {
    with_modules(|modules| modules.iter().flat_map(|m| m.code_ranges()).collect())
}

/// Type-dump source installed into the GC: the type count, each type's
/// address, the function-type count, then each function type's closure
/// type address. Counts are native-endian `u32`, addresses pointer-sized.
pub fn dump_types(save: &mut dyn FnMut(&[u8])) {
    with_modules(|modules| {
        let ntypes: usize = modules.iter().map(|m| m.code().types.len()).sum();
        save(&(ntypes as u32).to_ne_bytes());
        for m in modules {
            for ty in &m.code().types {
                save(&(ty as *const kiln_code::Type as usize).to_ne_bytes());
            }
        }
        let closure_types: Vec<usize> = modules.iter().flat_map(|m| m.closure_type_addrs()).collect();
        save(&(closure_types.len() as u32).to_ne_bytes());
        for addr in closure_types {
            save(&addr.to_ne_bytes());
        }
    });
}
