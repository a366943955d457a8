use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::types::TypeKind;

/// Kind-level view of a function type: what the calling convention needs
/// to know to pass arguments and read back the result.
///
/// The curried form (first argument removed) is computed on first use and
/// cached, so every closure built over the same function type shares it.
#[derive(Debug)]
pub struct FunSig {
    args: Vec<TypeKind>,
    ret: TypeKind,
    curried: OnceLock<Arc<FunSig>>,
}

impl FunSig {
    pub fn new(args: Vec<TypeKind>, ret: TypeKind) -> Self {
        Self { args, ret, curried: OnceLock::new() }
    }

    pub fn args(&self) -> &[TypeKind] {
        &self.args
    }

    pub fn ret(&self) -> TypeKind {
        self.ret
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// The signature seen by callers of a closure that captured the first
    /// argument. `None` when there is no argument to capture.
    pub fn curried(&self) -> Option<&Arc<FunSig>> {
        if self.args.is_empty() {
            return None;
        }
        Some(self.curried.get_or_init(|| {
            Arc::new(FunSig::new(self.args[1..].to_vec(), self.ret))
        }))
    }

    /// Address of the cached closure-type cell, stable for the lifetime of
    /// this signature. Heap tooling uses it as the closure type identity.
    pub fn closure_type_addr(&self) -> usize {
        &self.curried as *const OnceLock<Arc<FunSig>> as usize
    }

    /// Same argument kinds and return kind.
    pub fn same_shape(&self, other: &FunSig) -> bool {
        self.args == other.args && self.ret == other.ret
    }

    /// The signature with `first` prepended to the argument list.
    pub fn with_receiver(&self, first: TypeKind) -> FunSig {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(first);
        args.extend_from_slice(&self.args);
        FunSig::new(args, self.ret)
    }
}

impl Clone for FunSig {
    fn clone(&self) -> Self {
        FunSig::new(self.args.clone(), self.ret)
    }
}

impl PartialEq for FunSig {
    fn eq(&self, other: &Self) -> bool {
        self.same_shape(other)
    }
}

impl Eq for FunSig {}

impl fmt::Display for FunSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", a)?;
        }
        write!(f, ") -> {:?}", self.ret)
    }
}
