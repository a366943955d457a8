//! Reflective calls and closure adapters.
//!
//! Dynamic values cross into native code as machine words: scalars are
//! coerced to the parameter kind, pointer kinds are passed as addresses.
//! Every native call goes through the installed [`CallBridge`].

use std::sync::Arc;

use kiln_code::{FunSig, TypeKind};
use kiln_gc::{Capture, Closure, Dynamic};
use once_cell::sync::Lazy;

use crate::bridge::call_bridge;
use crate::error::{raise, take_pending_error, VmError};
use crate::stubs::{var_args_entry, StubFn};

/// Largest argument list accepted by a reflective call.
pub const MAX_ARGS: usize = 9;

/// Calls `closure` with a list of dynamically typed arguments.
///
/// A captured value is passed as the first argument. Variable-argument
/// closures forward the whole list, packed into one array, to their target.
/// Extra arguments beyond the declared count are ignored.
pub fn call_method(closure: &Arc<Closure>, args: &[Dynamic]) -> Result<Dynamic, VmError> {
    if args.len() > MAX_ARGS {
        return Err(VmError::TooManyArguments);
    }
    let ty = closure.ty();
    match closure.capture() {
        Capture::VarArgs(target) => {
            return call_method(target, &[Dynamic::Array(Arc::new(args.to_vec()))]);
        }
        Capture::Wrapper(_) => {
            check_arity(ty.nargs(), args.len())?;
            let raw = coerce_args(ty.args(), args)?;
            let bits = wrapper_call(closure, &raw)?;
            return Ok(Dynamic::from_raw(bits, ty.ret()));
        }
        _ => {}
    }
    check_arity(ty.nargs(), args.len())?;

    let sig = closure.call_sig();
    let mut raw = Vec::with_capacity(sig.nargs());
    if let Capture::Value { value, full } = closure.capture() {
        raw.push(value.to_raw(full.args()[0])?);
    }
    raw.extend(coerce_args(ty.args(), args)?);

    let bits = invoke(closure.fun(), &sig, &raw)?;
    Ok(Dynamic::from_raw(bits, sig.ret()))
}

/// Calls a closure with arguments already in native form. Only bare
/// closures can be called this way.
pub fn call_raw(closure: &Closure, args: &[u64]) -> Result<u64, VmError> {
    match closure.capture() {
        Capture::None => {}
        Capture::VarArgs(_) => return Err(VmError::VarArgsNotCast),
        _ => return Err(VmError::ClosureWithValue),
    }
    if args.len() > MAX_ARGS {
        return Err(VmError::TooManyArguments);
    }
    check_arity(closure.ty().nargs(), args.len())?;
    invoke(closure.fun(), closure.ty(), args)
}

fn check_arity(expected: usize, passed: usize) -> Result<(), VmError> {
    if passed < expected {
        return Err(VmError::MissingArguments { expected, passed });
    }
    Ok(())
}

fn coerce_args(kinds: &[TypeKind], args: &[Dynamic]) -> Result<Vec<u64>, VmError> {
    kinds
        .iter()
        .zip(args)
        .map(|(kind, arg)| arg.to_raw(*kind).map_err(VmError::from))
        .collect()
}

fn invoke(fun: usize, sig: &FunSig, args: &[u64]) -> Result<u64, VmError> {
    let bridge = call_bridge()?;
    // Anything parked before this call belongs to an earlier operation.
    let _ = take_pending_error();
    let bits = unsafe { bridge.static_call(fun, sig, args) };
    match take_pending_error() {
        Some(err) => Err(err),
        None => Ok(bits),
    }
}

/// Adapts `closure` so it can be called with signature `to`.
///
/// Returns `None` when the bridge has no adapter shim for `to`, or when a
/// non-variadic closure has a different arity.
pub fn make_fun_wrapper(closure: &Arc<Closure>, to: Arc<FunSig>) -> Option<Arc<Closure>> {
    let shim = call_bridge().ok()?.wrapper_entry(&to)?;
    if !closure.is_var_args() && closure.ty().nargs() != to.nargs() {
        return None;
    }
    Some(Closure::wrapper(to, shim, closure.clone()))
}

/// Invocation path of a wrapper closure. `args` holds one word per argument
/// of the wrapper's own type.
///
/// Each argument is boxed according to the wrapper's type, handed to the
/// target (which coerces it to its own parameter kinds), and the result is
/// coerced back to the wrapper's return kind.
pub fn wrapper_call(wrapper: &Closure, args: &[u64]) -> Result<u64, VmError> {
    let target = match wrapper.capture() {
        Capture::Wrapper(target) => target,
        _ => return Err(VmError::NotAWrapper),
    };
    let ty = wrapper.ty();
    check_arity(ty.nargs(), args.len())?;
    let boxed: Vec<Dynamic> = ty
        .args()
        .iter()
        .zip(args)
        .map(|(kind, bits)| Dynamic::from_raw(*bits, *kind))
        .collect();
    let ret = call_method(target, &boxed)?;
    Ok(ret.to_raw(ty.ret())?)
}

/// Signature of [`kiln_wrapper_entry`].
pub type WrapperEntryFn = unsafe extern "C" fn(*const Closure, *const u64, *mut u64);

/// Native entry used by adapter shims: `closure` is the wrapper, `args`
/// points at one word per argument of its type, and the result word is
/// written to `ret`. Errors are parked with [`raise`].
///
/// # Safety
/// `closure` must point to a live wrapper closure and `args` to as many
/// words as its type has arguments.
pub unsafe extern "C" fn kiln_wrapper_entry(closure: *const Closure, args: *const u64, ret: *mut u64) {
    let wrapper = &*closure;
    let nargs = wrapper.ty().nargs();
    let args = if nargs == 0 || args.is_null() { &[][..] } else { std::slice::from_raw_parts(args, nargs) };
    let bits = match wrapper_call(wrapper, args) {
        Ok(bits) => bits,
        Err(err) => {
            raise(err);
            0
        }
    };
    if !ret.is_null() {
        *ret = bits;
    }
}

static VAR_ARGS_TYPE: Lazy<Arc<FunSig>> = Lazy::new(|| Arc::new(FunSig::new(Vec::new(), TypeKind::Dyn)));

/// Wraps a closure taking `(array)` so that it can receive any argument
/// list once adapted with [`make_fun_wrapper`].
pub fn make_var_args(closure: &Arc<Closure>) -> Arc<Closure> {
    Closure::var_args(VAR_ARGS_TYPE.clone(), var_args_entry as StubFn as usize, closure.clone())
}
