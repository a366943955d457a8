use std::fmt;
use std::sync::Arc;

use kiln_code::{FunSig, TypeKind};
use thiserror::Error;

use crate::dynamic::Dynamic;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClosureError {
    #[error("Cannot capture a value for a function without arguments: {0}")]
    NothingToCapture(String),
}

/// What a closure carries besides its function pointer.
#[derive(Clone)]
pub enum Capture {
    None,
    /// A bound first argument. `full` is the uncurried signature the
    /// function pointer actually has.
    Value { value: Dynamic, full: Arc<FunSig> },
    /// The closure is a generated adapter forwarding to another closure.
    /// Its function pointer is the adapter shim, which receives the wrapper
    /// itself as its first argument.
    Wrapper(Arc<Closure>),
    /// Every call is forwarded to the inner closure with the arguments
    /// packed into a single dynamic list.
    VarArgs(Arc<Closure>),
}

/// A function pointer optionally paired with a captured value.
pub struct Closure {
    ty: Arc<FunSig>,
    fun: usize,
    capture: Capture,
}

impl Closure {
    /// A closure with no captured value.
    pub fn bare(ty: Arc<FunSig>, fun: usize) -> Arc<Closure> {
        Arc::new(Closure { ty, fun, capture: Capture::None })
    }

    /// A closure binding `value` as the first argument of `fun`. Its visible
    /// type is the curried form of `full`.
    pub fn with_value(full: Arc<FunSig>, fun: usize, value: Dynamic) -> Result<Arc<Closure>, ClosureError> {
        let ty = full.curried().cloned().ok_or_else(|| ClosureError::NothingToCapture(full.to_string()))?;
        Ok(Arc::new(Closure { ty, fun, capture: Capture::Value { value, full } }))
    }

    /// A generated adapter of type `ty` whose entry is `shim`.
    pub fn wrapper(ty: Arc<FunSig>, shim: usize, inner: Arc<Closure>) -> Arc<Closure> {
        Arc::new(Closure { ty, fun: shim, capture: Capture::Wrapper(inner) })
    }

    /// A variable-argument adapter over `inner`. `entry` is called only if
    /// the adapter is invoked without being cast to a typed function first.
    pub fn var_args(ty: Arc<FunSig>, entry: usize, inner: Arc<Closure>) -> Arc<Closure> {
        Arc::new(Closure { ty, fun: entry, capture: Capture::VarArgs(inner) })
    }

    pub fn ty(&self) -> &Arc<FunSig> {
        &self.ty
    }

    pub fn fun(&self) -> usize {
        self.fun
    }

    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    pub fn has_value(&self) -> bool {
        !matches!(self.capture, Capture::None)
    }

    pub fn is_var_args(&self) -> bool {
        matches!(self.capture, Capture::VarArgs(_))
    }

    /// Signature of the function pointer itself: the visible type with the
    /// captured value (or the wrapper receiver) prepended.
    pub fn call_sig(&self) -> Arc<FunSig> {
        match &self.capture {
            Capture::None => self.ty.clone(),
            Capture::Value { full, .. } => full.clone(),
            Capture::Wrapper(_) => Arc::new(self.ty.with_receiver(TypeKind::Fun)),
            Capture::VarArgs(_) => Arc::new(self.ty.with_receiver(TypeKind::Fun)),
        }
    }

    /// Strips the captured value: a bare closure over the same function
    /// pointer with the uncurried type. Wrappers strip their target.
    pub fn without_value(self: &Arc<Self>) -> Arc<Closure> {
        match &self.capture {
            Capture::None => self.clone(),
            Capture::Wrapper(inner) => inner.without_value(),
            Capture::Value { full, .. } => Closure::bare(full.clone(), self.fun),
            Capture::VarArgs(_) => Closure::bare(self.call_sig(), self.fun),
        }
    }

    /// The captured value as a dynamic, following one wrapper indirection.
    pub fn value(&self) -> Option<Dynamic> {
        match &self.capture {
            Capture::None => None,
            Capture::Wrapper(inner) => inner.value(),
            Capture::Value { value, .. } => Some(value.clone()),
            Capture::VarArgs(inner) => Some(Dynamic::Closure(inner.clone())),
        }
    }

    /// Closure equality: the same object, or the same function pointer with
    /// the same captured value.
    pub fn same(a: &Arc<Closure>, b: &Arc<Closure>) -> bool {
        if Arc::ptr_eq(a, b) {
            return true;
        }
        if a.fun != b.fun {
            return false;
        }
        match (&a.capture, &b.capture) {
            (Capture::None, Capture::None) => true,
            (Capture::Value { value: va, .. }, Capture::Value { value: vb, .. }) => va.same_value(vb),
            (Capture::VarArgs(ia), Capture::VarArgs(ib)) => Arc::ptr_eq(ia, ib),
            // A wrapper's captured value is the wrapper itself.
            _ => false,
        }
    }
}

/// Compares two dynamics as functions. Both must be closures, or both null.
pub fn fun_compare(a: &Dynamic, b: &Dynamic) -> bool {
    match (a, b) {
        (Dynamic::Null, Dynamic::Null) => true,
        (Dynamic::Closure(ca), Dynamic::Closure(cb)) => Closure::same(ca, cb),
        _ => false,
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let capture = match &self.capture {
            Capture::None => "none",
            Capture::Value { .. } => "value",
            Capture::Wrapper(_) => "wrapper",
            Capture::VarArgs(_) => "var-args",
        };
        f.debug_struct("Closure")
            .field("ty", &self.ty.to_string())
            .field("fun", &format_args!("{:#x}", self.fun))
            .field("capture", &capture)
            .finish()
    }
}
