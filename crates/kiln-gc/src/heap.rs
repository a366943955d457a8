//! Values whose address has been handed to native code.
//!
//! Compiled code may keep any pointer word it receives, in a global or an
//! object field, so a value stays here for the rest of the process once
//! its address escapes. Entries are keyed by address and never removed,
//! which also makes the address unambiguous.

use std::sync::Arc;

use kiln_code::TypeKind;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::closure::Closure;
use crate::dynamic::Dynamic;

#[derive(Clone)]
enum Managed {
    Boxed(Arc<Dynamic>),
    Closure(Arc<Closure>),
    Array(Arc<Vec<Dynamic>>),
}

impl Managed {
    fn kind(&self) -> TypeKind {
        match self {
            Managed::Boxed(_) => TypeKind::Dyn,
            Managed::Closure(_) => TypeKind::Fun,
            Managed::Array(_) => TypeKind::Array,
        }
    }
}

static HEAP: Lazy<Mutex<FxHashMap<usize, Managed>>> = Lazy::new(|| Mutex::new(FxHashMap::default()));

fn manage(addr: usize, value: Managed) -> usize {
    HEAP.lock().entry(addr).or_insert(value);
    addr
}

/// Boxes `value` and keeps the box alive. Returns its address.
pub fn manage_boxed(value: Dynamic) -> usize {
    let boxed = Arc::new(value);
    manage(Arc::as_ptr(&boxed) as usize, Managed::Boxed(boxed))
}

/// Keeps `closure` alive. Returns its address.
pub fn manage_closure(closure: &Arc<Closure>) -> usize {
    manage(Arc::as_ptr(closure) as usize, Managed::Closure(closure.clone()))
}

/// Keeps `array` alive. Returns its address.
pub fn manage_array(array: &Arc<Vec<Dynamic>>) -> usize {
    manage(Arc::as_ptr(array) as usize, Managed::Array(array.clone()))
}

pub fn is_managed(addr: usize) -> bool {
    HEAP.lock().contains_key(&addr)
}

pub fn managed_count() -> usize {
    HEAP.lock().len()
}

/// The value at `addr` when it is a managed value of `kind`. A boxed
/// dynamic is returned unboxed.
pub fn managed_value(addr: usize, kind: TypeKind) -> Option<Dynamic> {
    let entry = HEAP.lock().get(&addr).cloned()?;
    if entry.kind() != kind {
        return None;
    }
    Some(match entry {
        Managed::Boxed(boxed) => (*boxed).clone(),
        Managed::Closure(closure) => Dynamic::Closure(closure),
        Managed::Array(array) => Dynamic::Array(array),
    })
}
