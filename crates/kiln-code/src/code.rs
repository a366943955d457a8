use std::sync::Arc;

use crate::error::CodeError;
use crate::sig::FunSig;
use crate::types::{ObjField, ObjType, Type, TypeId, TypeKind};

/// Register index inside a function frame. The first registers hold the
/// function's arguments in declaration order.
pub type Reg = u32;

/// The straight-line instruction set understood by the code generator.
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Opcode {
    Mov { dst: Reg, src: Reg },
    /// Loads `ints[index]`.
    Int { dst: Reg, index: u32 },
    /// Loads `floats[index]`.
    Float { dst: Reg, index: u32 },
    Bool { dst: Reg, value: bool },
    Null { dst: Reg },
    Add { dst: Reg, a: Reg, b: Reg },
    Sub { dst: Reg, a: Reg, b: Reg },
    Mul { dst: Reg, a: Reg, b: Reg },
    /// Calls function id `fid` through its function-table slot.
    Call { dst: Reg, fid: u32, args: Vec<Reg> },
    GetGlobal { dst: Reg, global: u32 },
    SetGlobal { global: u32, src: Reg },
    Ret { src: Reg },
}

/// A bytecode function.
#[derive(Debug, Clone)]
pub struct Function {
    pub findex: u32,
    pub ty: TypeId,
    pub regs: Vec<TypeId>,
    pub ops: Vec<Opcode>,
    /// `(debug file index, line)` for each opcode.
    pub debug: Vec<(u32, u32)>,
}

impl Function {
    /// Builds a function whose opcodes are attributed to consecutive lines of `file`.
    pub fn new(findex: u32, ty: TypeId, regs: Vec<TypeId>, ops: Vec<Opcode>, file: u32) -> Self {
        let debug = (0..ops.len()).map(|i| (file, i as u32 + 1)).collect();
        Self { findex, ty, regs, ops, debug }
    }
}

/// A function implemented in an external library.
#[derive(Debug, Clone)]
pub struct Native {
    pub lib: String,
    pub name: String,
    pub ty: TypeId,
    pub findex: u32,
}

/// A constant object literal assigned to a global at load time.
#[derive(Debug, Clone)]
pub struct Constant {
    pub global: u32,
    /// One literal-pool index per declared field of the global's object type.
    pub fields: Vec<u32>,
}

/// A parsed bytecode unit. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Code {
    pub version: u32,
    pub ints: Vec<i32>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub debug_files: Vec<String>,
    pub types: Vec<Type>,
    pub globals: Vec<TypeId>,
    pub natives: Vec<Native>,
    pub functions: Vec<Function>,
    pub constants: Vec<Constant>,
    pub entrypoint: u32,
}

impl Code {
    pub fn get_type(&self, id: TypeId) -> Result<&Type, CodeError> {
        self.types.get(id.index()).ok_or(CodeError::UnknownType(id))
    }

    pub fn kind_of(&self, id: TypeId) -> Result<TypeKind, CodeError> {
        self.get_type(id).map(Type::kind)
    }

    pub fn obj(&self, id: TypeId) -> Result<&ObjType, CodeError> {
        self.get_type(id)?.as_obj().ok_or(CodeError::NotAnObject(id))
    }

    /// Size of the dense function id space.
    pub fn function_count(&self) -> usize {
        self.functions.len() + self.natives.len()
    }

    pub fn global_kinds(&self) -> Result<Vec<TypeKind>, CodeError> {
        self.globals.iter().map(|g| self.kind_of(*g)).collect()
    }

    /// Kind-level signature of a function type, cached on the descriptor.
    pub fn fun_sig(&self, id: TypeId) -> Result<Arc<FunSig>, CodeError> {
        let fun = self.get_type(id)?.as_fun().ok_or(CodeError::NotAFunction(id))?;
        if let Some(sig) = fun.sig.get() {
            return Ok(sig.clone());
        }
        let args = fun.args.iter().map(|a| self.kind_of(*a)).collect::<Result<Vec<_>, _>>()?;
        let ret = self.kind_of(fun.ret)?;
        Ok(fun.sig.get_or_init(|| Arc::new(FunSig::new(args, ret))).clone())
    }

    /// Number of fields of an object type, inherited ones included.
    pub fn obj_field_count(&self, id: TypeId) -> Result<usize, CodeError> {
        let obj = self.obj(id)?;
        let inherited = match obj.super_type {
            Some(sup) => self.obj_field_count(sup)?,
            None => 0,
        };
        Ok(inherited + obj.fields.len())
    }

    /// Fetches a field by its global field id (inherited fields first).
    pub fn obj_field(&self, id: TypeId, field: u32) -> Result<&ObjField, CodeError> {
        let obj = self.obj(id)?;
        let inherited = match obj.super_type {
            Some(sup) => self.obj_field_count(sup)?,
            None => 0,
        };
        let field_idx = field as usize;
        if field_idx < inherited {
            // Inherited fields only exist when there is a super type.
            let sup = obj.super_type.ok_or(CodeError::UnknownField { ty: id, field })?;
            return self.obj_field(sup, field);
        }
        obj.fields.get(field_idx - inherited).ok_or(CodeError::UnknownField { ty: id, field })
    }

    /// All fields of an object type, inherited ones first.
    pub fn obj_all_fields(&self, id: TypeId) -> Result<Vec<&ObjField>, CodeError> {
        let obj = self.obj(id)?;
        let mut fields = match obj.super_type {
            Some(sup) => self.obj_all_fields(sup)?,
            None => Vec::new(),
        };
        fields.extend(obj.fields.iter());
        Ok(fields)
    }

    pub fn debug_file(&self, index: u32) -> &str {
        self.debug_files.get(index as usize).map(String::as_str).unwrap_or("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CodeBuilder;

    #[test]
    fn test_obj_field_lookup_walks_super_chain() {
        let mut b = CodeBuilder::new();
        let int = b.prim(TypeKind::I32);
        let dynamic = b.prim(TypeKind::Dyn);
        let mut base = ObjType::new("Base");
        base.fields.push(ObjField { name: "a".into(), ty: int });
        let base = b.add_type(Type::Obj(base));
        let mut child = ObjType::new("Child");
        child.super_type = Some(base);
        child.fields.push(ObjField { name: "b".into(), ty: dynamic });
        let child = b.add_type(Type::Obj(child));
        let code = b.build();

        assert_eq!(code.obj_field_count(child).unwrap(), 2);
        assert_eq!(code.obj_field(child, 0).unwrap().name, "a");
        assert_eq!(code.obj_field(child, 1).unwrap().name, "b");
        assert!(matches!(
            code.obj_field(child, 2),
            Err(CodeError::UnknownField { field: 2, .. })
        ));
    }

    #[test]
    fn test_fun_sig_is_cached() {
        let mut b = CodeBuilder::new();
        let int = b.prim(TypeKind::I32);
        let f = b.fun_type(&[int, int], int);
        let code = b.build();
        let a = code.fun_sig(f).unwrap();
        let again = code.fun_sig(f).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(a.args(), &[TypeKind::I32, TypeKind::I32]);
    }

    #[test]
    fn test_fun_sig_rejects_non_function() {
        let mut b = CodeBuilder::new();
        let int = b.prim(TypeKind::I32);
        let code = b.build();
        assert!(matches!(code.fun_sig(int), Err(CodeError::NotAFunction(_))));
    }
}
