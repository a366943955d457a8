use rustc_hash::FxHashMap;

use crate::code::{Code, Constant, Function, Native};
use crate::types::{FunType, ObjType, Type, TypeId, TypeKind};

/// Assembles a [`Code`] unit programmatically.
///
/// Parameterless kinds are interned, so `prim(TypeKind::I32)` always yields
/// the same [`TypeId`].
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Code,
    prims: FxHashMap<TypeKind, TypeId>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.code.types.len() as u32);
        self.code.types.push(ty);
        id
    }

    /// Interned descriptor for a parameterless kind.
    ///
    /// # Panics
    /// When `kind` needs extra data (functions, objects, references...).
    pub fn prim(&mut self, kind: TypeKind) -> TypeId {
        if let Some(id) = self.prims.get(&kind) {
            return *id;
        }
        let ty = Type::primitive(kind).unwrap_or_else(|| panic!("{:?} is not a primitive kind", kind));
        let id = self.add_type(ty);
        self.prims.insert(kind, id);
        id
    }

    pub fn fun_type(&mut self, args: &[TypeId], ret: TypeId) -> TypeId {
        self.add_type(Type::Fun(FunType::new(args.to_vec(), ret)))
    }

    pub fn obj_mut(&mut self, id: TypeId) -> Option<&mut ObjType> {
        match self.code.types.get_mut(id.index()) {
            Some(Type::Obj(obj)) => Some(obj),
            _ => None,
        }
    }

    pub fn int(&mut self, value: i32) -> u32 {
        push_index(&mut self.code.ints, value)
    }

    pub fn float(&mut self, value: f64) -> u32 {
        push_index(&mut self.code.floats, value)
    }

    pub fn string(&mut self, value: impl Into<String>) -> u32 {
        push_index(&mut self.code.strings, value.into())
    }

    pub fn debug_file(&mut self, name: impl Into<String>) -> u32 {
        push_index(&mut self.code.debug_files, name.into())
    }

    pub fn global(&mut self, ty: TypeId) -> u32 {
        push_index(&mut self.code.globals, ty)
    }

    pub fn function(&mut self, function: Function) -> &mut Self {
        self.code.functions.push(function);
        self
    }

    pub fn native(&mut self, lib: impl Into<String>, name: impl Into<String>, ty: TypeId, findex: u32) -> &mut Self {
        self.code.natives.push(Native { lib: lib.into(), name: name.into(), ty, findex });
        self
    }

    pub fn constant(&mut self, global: u32, fields: Vec<u32>) -> &mut Self {
        self.code.constants.push(Constant { global, fields });
        self
    }

    pub fn entrypoint(&mut self, findex: u32) -> &mut Self {
        self.code.entrypoint = findex;
        self
    }

    pub fn build(self) -> Code {
        self.code
    }
}

fn push_index<T>(pool: &mut Vec<T>, value: T) -> u32 {
    pool.push(value);
    (pool.len() - 1) as u32
}
