use std::sync::Arc;

use kiln_code::TypeKind;
use thiserror::Error;

use crate::closure::Closure;
use crate::heap;

/// Raised when a dynamic value cannot be coerced to a static kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CastError {
    #[error("Can't cast {from:?} to {to:?}")]
    Invalid { from: TypeKind, to: TypeKind },
}

/// A dynamically typed value.
///
/// Pointer kinds without a richer representation here keep their raw
/// address together with their kind.
#[derive(Debug, Clone)]
pub enum Dynamic {
    Null,
    Bool(bool),
    U8(u8),
    U16(u16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Closure(Arc<Closure>),
    /// A list of dynamic values, as built for variable-argument calls.
    Array(Arc<Vec<Dynamic>>),
    Ptr { kind: TypeKind, addr: usize },
}

impl Dynamic {
    /// The kind this value reports. `Null` reports `Void`.
    pub fn kind(&self) -> TypeKind {
        match self {
            Dynamic::Null => TypeKind::Void,
            Dynamic::Bool(_) => TypeKind::Bool,
            Dynamic::U8(_) => TypeKind::U8,
            Dynamic::U16(_) => TypeKind::U16,
            Dynamic::I32(_) => TypeKind::I32,
            Dynamic::I64(_) => TypeKind::I64,
            Dynamic::F32(_) => TypeKind::F32,
            Dynamic::F64(_) => TypeKind::F64,
            Dynamic::Closure(_) => TypeKind::Fun,
            Dynamic::Array(_) => TypeKind::Array,
            Dynamic::Ptr { kind, .. } => *kind,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Dynamic::Null)
    }

    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match self {
            Dynamic::Closure(c) => Some(c),
            _ => None,
        }
    }

    fn invalid(&self, to: TypeKind) -> CastError {
        CastError::Invalid { from: self.kind(), to }
    }

    pub fn to_i64(&self) -> Result<i64, CastError> {
        Ok(match self {
            Dynamic::Null => 0,
            Dynamic::Bool(b) => *b as i64,
            Dynamic::U8(v) => *v as i64,
            Dynamic::U16(v) => *v as i64,
            Dynamic::I32(v) => *v as i64,
            Dynamic::I64(v) => *v,
            Dynamic::F32(v) => *v as i64,
            Dynamic::F64(v) => *v as i64,
            _ => return Err(self.invalid(TypeKind::I64)),
        })
    }

    pub fn to_i32(&self) -> Result<i32, CastError> {
        match self {
            Dynamic::F32(v) => Ok(*v as i32),
            Dynamic::F64(v) => Ok(*v as i32),
            _ => self.to_i64().map(|v| v as i32).map_err(|_| self.invalid(TypeKind::I32)),
        }
    }

    pub fn to_f64(&self) -> Result<f64, CastError> {
        Ok(match self {
            Dynamic::Null => 0.0,
            Dynamic::Bool(b) => *b as i32 as f64,
            Dynamic::U8(v) => *v as f64,
            Dynamic::U16(v) => *v as f64,
            Dynamic::I32(v) => *v as f64,
            Dynamic::I64(v) => *v as f64,
            Dynamic::F32(v) => *v as f64,
            Dynamic::F64(v) => *v,
            _ => return Err(self.invalid(TypeKind::F64)),
        })
    }

    pub fn to_f32(&self) -> Result<f32, CastError> {
        match self {
            Dynamic::F32(v) => Ok(*v),
            _ => self.to_f64().map(|v| v as f32).map_err(|_| self.invalid(TypeKind::F32)),
        }
    }

    /// Coerces to a pointer kind. `Dyn` accepts anything; other kinds
    /// accept null or a value of the same kind.
    pub fn cast_ptr(&self, to: TypeKind) -> Result<Dynamic, CastError> {
        if to == TypeKind::Dyn || self.is_null() || self.kind() == to {
            return Ok(self.clone());
        }
        Err(self.invalid(to))
    }

    /// Coerces to `kind` and returns the machine word a native callee expects.
    ///
    /// Closures, arrays and boxed `Dyn` values are moved into the managed
    /// heap first, since the callee may keep the word.
    pub fn to_raw(&self, kind: TypeKind) -> Result<u64, CastError> {
        if let Some(bits) = self.scalar_bits(kind)? {
            return Ok(bits);
        }
        let addr = match self.cast_ptr(kind)? {
            Dynamic::Null => 0,
            value if kind == TypeKind::Dyn => heap::manage_boxed(value),
            Dynamic::Closure(c) => heap::manage_closure(&c),
            Dynamic::Array(a) => heap::manage_array(&a),
            Dynamic::Ptr { addr, .. } => addr,
            other => return Err(other.invalid(kind)),
        };
        Ok(addr as u64)
    }

    fn scalar_bits(&self, kind: TypeKind) -> Result<Option<u64>, CastError> {
        Ok(Some(match kind {
            TypeKind::Void => 0,
            TypeKind::U8 => self.to_i32()? as u8 as u64,
            TypeKind::U16 => self.to_i32()? as u16 as u64,
            TypeKind::I32 => self.to_i32()? as u32 as u64,
            TypeKind::Bool => (self.to_i32()? != 0) as u64,
            TypeKind::I64 => self.to_i64()? as u64,
            TypeKind::F32 => self.to_f32()?.to_bits() as u64,
            TypeKind::F64 => self.to_f64()?.to_bits(),
            _ => return Ok(None),
        }))
    }

    /// Reads back a machine word produced by native code.
    ///
    /// `Dyn`, `Fun` and `Array` words are only followed when they address a
    /// managed value of that kind; any other address comes back as a raw
    /// [`Dynamic::Ptr`].
    pub fn from_raw(bits: u64, kind: TypeKind) -> Dynamic {
        match kind {
            TypeKind::Void => Dynamic::Null,
            TypeKind::U8 => Dynamic::U8(bits as u8),
            TypeKind::U16 => Dynamic::U16(bits as u16),
            TypeKind::I32 => Dynamic::I32(bits as u32 as i32),
            TypeKind::I64 => Dynamic::I64(bits as i64),
            TypeKind::Bool => Dynamic::Bool(bits as u8 != 0),
            TypeKind::F32 => Dynamic::F32(f32::from_bits(bits as u32)),
            TypeKind::F64 => Dynamic::F64(f64::from_bits(bits)),
            _ if bits == 0 => Dynamic::Null,
            kind => heap::managed_value(bits as usize, kind).unwrap_or(Dynamic::Ptr { kind, addr: bits as usize }),
        }
    }

    /// Coercion-free equality: same variant and same bits, or the same
    /// shared object for reference variants.
    pub fn same_value(&self, other: &Dynamic) -> bool {
        match (self, other) {
            (Dynamic::Null, Dynamic::Null) => true,
            (Dynamic::Bool(a), Dynamic::Bool(b)) => a == b,
            (Dynamic::U8(a), Dynamic::U8(b)) => a == b,
            (Dynamic::U16(a), Dynamic::U16(b)) => a == b,
            (Dynamic::I32(a), Dynamic::I32(b)) => a == b,
            (Dynamic::I64(a), Dynamic::I64(b)) => a == b,
            (Dynamic::F32(a), Dynamic::F32(b)) => a.to_bits() == b.to_bits(),
            (Dynamic::F64(a), Dynamic::F64(b)) => a.to_bits() == b.to_bits(),
            (Dynamic::Closure(a), Dynamic::Closure(b)) => Arc::ptr_eq(a, b),
            (Dynamic::Array(a), Dynamic::Array(b)) => Arc::ptr_eq(a, b),
            (Dynamic::Ptr { kind: ka, addr: a }, Dynamic::Ptr { kind: kb, addr: b }) => ka == kb && a == b,
            _ => false,
        }
    }
}

impl From<i32> for Dynamic {
    fn from(v: i32) -> Self {
        Dynamic::I32(v)
    }
}

impl From<f64> for Dynamic {
    fn from(v: f64) -> Self {
        Dynamic::F64(v)
    }
}

impl From<bool> for Dynamic {
    fn from(v: bool) -> Self {
        Dynamic::Bool(v)
    }
}

impl From<Arc<Closure>> for Dynamic {
    fn from(c: Arc<Closure>) -> Self {
        Dynamic::Closure(c)
    }
}
