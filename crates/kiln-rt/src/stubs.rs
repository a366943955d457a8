//! Entry points installed in place of functions that must fail when called.

use std::sync::Arc;

use kiln_code::{FunSig, TypeKind};
use kiln_gc::Closure;
use once_cell::sync::Lazy;

use crate::error::{raise, VmError};

/// Signature shared by the stub entry points.
pub type StubFn = extern "C" fn() -> u64;

/// Stands in for natives of a disabled library.
pub extern "C" fn disabled_primitive() -> u64 {
    raise(VmError::DisabledPrimitive);
    0
}

/// Initial target of function-typed globals.
pub extern "C" fn null_function() -> u64 {
    raise(VmError::NullFunction);
    0
}

/// Entry of variable-argument adapters that were never cast to a typed
/// function.
pub extern "C" fn var_args_entry() -> u64 {
    raise(VmError::VarArgsNotCast);
    0
}

static NULL_CLOSURE: Lazy<Arc<Closure>> =
    Lazy::new(|| Closure::bare(Arc::new(FunSig::new(Vec::new(), TypeKind::Void)), null_function as StubFn as usize));

/// The shared closure stored in function-typed globals before they are
/// assigned.
pub fn null_closure() -> &'static Arc<Closure> {
    &NULL_CLOSURE
}
