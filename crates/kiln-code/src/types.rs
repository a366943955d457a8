use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::sig::FunSig;

/// Index of a type descriptor inside [`crate::Code::types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// The closed set of type shapes the VM knows about.
///
/// The discriminants are stable: they are used as indexes into the
/// signature alphabet and must not be reordered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    Void = 0,
    U8,
    U16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Bytes,
    Dyn,
    Fun,
    Obj,
    Array,
    Type,
    Ref,
    Virtual,
    DynObj,
    Abstract,
    Enum,
    Null,
}

impl TypeKind {
    pub const ALL: [TypeKind; 20] = [
        TypeKind::Void,
        TypeKind::U8,
        TypeKind::U16,
        TypeKind::I32,
        TypeKind::I64,
        TypeKind::F32,
        TypeKind::F64,
        TypeKind::Bool,
        TypeKind::Bytes,
        TypeKind::Dyn,
        TypeKind::Fun,
        TypeKind::Obj,
        TypeKind::Array,
        TypeKind::Type,
        TypeKind::Ref,
        TypeKind::Virtual,
        TypeKind::DynObj,
        TypeKind::Abstract,
        TypeKind::Enum,
        TypeKind::Null,
    ];

    /// Values of pointer kinds are stored as a single machine word that
    /// may reference managed memory.
    pub fn is_ptr(self) -> bool {
        self as u8 >= TypeKind::Bytes as u8
    }

    pub fn is_integer(self) -> bool {
        matches!(self, TypeKind::U8 | TypeKind::U16 | TypeKind::I32 | TypeKind::I64 | TypeKind::Bool)
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::F32 | TypeKind::F64)
    }
}

/// A named field of an object or virtual type.
#[derive(Debug, Clone)]
pub struct ObjField {
    pub name: String,
    pub ty: TypeId,
}

/// A method entry in an object's prototype.
#[derive(Debug, Clone)]
pub struct ObjProto {
    pub name: String,
    /// Function id implementing the method.
    pub findex: u32,
    /// Slot in the dispatch table, or `None` for non-virtual methods.
    pub pindex: Option<u32>,
}

/// A class-like record type.
#[derive(Debug, Clone)]
pub struct ObjType {
    pub name: String,
    pub super_type: Option<TypeId>,
    /// Fields declared by this type only; inherited fields live on the super type.
    pub fields: Vec<ObjField>,
    pub proto: Vec<ObjProto>,
    /// Explicit `(field id, function id)` method bindings. Field ids count
    /// inherited fields first.
    pub bindings: Vec<(u32, u32)>,
    /// Global holding the canonical instance of this type, if any.
    pub global: Option<u32>,
}

impl ObjType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_type: None,
            fields: Vec::new(),
            proto: Vec::new(),
            bindings: Vec::new(),
            global: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumConstruct {
    pub name: String,
    pub params: Vec<TypeId>,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub constructs: Vec<EnumConstruct>,
    pub global: Option<u32>,
}

/// A structurally typed record.
#[derive(Debug, Clone)]
pub struct VirtualType {
    pub fields: Vec<ObjField>,
}

/// A function type descriptor.
#[derive(Debug, Clone)]
pub struct FunType {
    pub args: Vec<TypeId>,
    pub ret: TypeId,
    pub(crate) sig: OnceLock<Arc<FunSig>>,
}

impl FunType {
    pub fn new(args: Vec<TypeId>, ret: TypeId) -> Self {
        Self { args, ret, sig: OnceLock::new() }
    }
}

/// A type descriptor as found in a bytecode unit.
#[derive(Debug, Clone)]
pub enum Type {
    Void,
    U8,
    U16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Bytes,
    Dyn,
    Fun(FunType),
    Obj(ObjType),
    Array,
    Type,
    Ref(TypeId),
    Virtual(VirtualType),
    DynObj,
    /// An opaque host type identified by name.
    Abstract(String),
    Enum(EnumType),
    Null(TypeId),
}

impl Type {
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Void => TypeKind::Void,
            Type::U8 => TypeKind::U8,
            Type::U16 => TypeKind::U16,
            Type::I32 => TypeKind::I32,
            Type::I64 => TypeKind::I64,
            Type::F32 => TypeKind::F32,
            Type::F64 => TypeKind::F64,
            Type::Bool => TypeKind::Bool,
            Type::Bytes => TypeKind::Bytes,
            Type::Dyn => TypeKind::Dyn,
            Type::Fun(_) => TypeKind::Fun,
            Type::Obj(_) => TypeKind::Obj,
            Type::Array => TypeKind::Array,
            Type::Type => TypeKind::Type,
            Type::Ref(_) => TypeKind::Ref,
            Type::Virtual(_) => TypeKind::Virtual,
            Type::DynObj => TypeKind::DynObj,
            Type::Abstract(_) => TypeKind::Abstract,
            Type::Enum(_) => TypeKind::Enum,
            Type::Null(_) => TypeKind::Null,
        }
    }

    /// Builds the descriptor for a parameterless kind.
    ///
    /// Returns `None` for kinds that need extra data (functions, objects,
    /// references and the like).
    pub fn primitive(kind: TypeKind) -> Option<Type> {
        Some(match kind {
            TypeKind::Void => Type::Void,
            TypeKind::U8 => Type::U8,
            TypeKind::U16 => Type::U16,
            TypeKind::I32 => Type::I32,
            TypeKind::I64 => Type::I64,
            TypeKind::F32 => Type::F32,
            TypeKind::F64 => Type::F64,
            TypeKind::Bool => Type::Bool,
            TypeKind::Bytes => Type::Bytes,
            TypeKind::Dyn => Type::Dyn,
            TypeKind::Array => Type::Array,
            TypeKind::Type => Type::Type,
            TypeKind::DynObj => Type::DynObj,
            _ => return None,
        })
    }

    pub fn as_fun(&self) -> Option<&FunType> {
        match self {
            Type::Fun(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&ObjType> {
        match self {
            Type::Obj(o) => Some(o),
            _ => None,
        }
    }
}
