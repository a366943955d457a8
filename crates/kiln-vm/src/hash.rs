//! Content hashes of compiled functions, used to find what a hot reload
//! changed.
//!
//! Literal operands are hashed by value and callees by the field they
//! implement when they have one, so a unit whose pools or function ids were
//! renumbered still hashes equal where the code itself did not change.

use std::hash::{Hash, Hasher};

use kiln_code::{Code, Function, Opcode};
use rustc_hash::FxHasher;

use crate::error::LoadError;
use crate::linker::{Binding, FunctionIndex, FunctionRef};

pub fn function_hash(
    code: &Code,
    function: &Function,
    index: &FunctionIndex,
    owners: &[Option<Binding>],
) -> Result<u64, LoadError> {
    let mut h = FxHasher::default();
    code.fun_sig(function.ty)?.to_string().hash(&mut h);
    for reg in &function.regs {
        code.kind_of(*reg)?.hash(&mut h);
    }
    for op in &function.ops {
        hash_op(code, op, index, owners, &mut h);
    }
    Ok(h.finish())
}

/// Hashes of every compiled function, by position.
pub fn hash_all(code: &Code, index: &FunctionIndex, owners: &[Option<Binding>]) -> Result<Vec<u64>, LoadError> {
    code.functions.iter().map(|f| function_hash(code, f, index, owners)).collect()
}

fn hash_op(code: &Code, op: &Opcode, index: &FunctionIndex, owners: &[Option<Binding>], h: &mut FxHasher) {
    std::mem::discriminant(op).hash(h);
    match op {
        Opcode::Int { dst, index: i } => {
            dst.hash(h);
            code.ints.get(*i as usize).hash(h);
        }
        Opcode::Float { dst, index: i } => {
            dst.hash(h);
            code.floats.get(*i as usize).map(|f| f.to_bits()).hash(h);
        }
        Opcode::Call { dst, fid, args } => {
            dst.hash(h);
            args.hash(h);
            match index.get(*fid) {
                Some(FunctionRef::Compiled(pos)) => match owners.get(pos).and_then(Option::as_ref) {
                    Some(binding) => binding.hash(h),
                    None => fid.hash(h),
                },
                Some(FunctionRef::Native(pos)) => {
                    let native = &code.natives[pos];
                    native.lib.hash(h);
                    native.name.hash(h);
                }
                None => fid.hash(h),
            }
        }
        other => other.hash(h),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::bind_owners;
    use kiln_code::{CodeBuilder, TypeKind};

    fn unit(literal: i32, padding: &[i32]) -> Code {
        let mut b = CodeBuilder::new();
        for p in padding {
            b.int(*p);
        }
        let int = b.prim(TypeKind::I32);
        let f = b.fun_type(&[int], int);
        let lit = b.int(literal);
        b.function(Function::new(
            0,
            f,
            vec![int, int],
            vec![Opcode::Int { dst: 1, index: lit }, Opcode::Add { dst: 0, a: 0, b: 1 }, Opcode::Ret { src: 0 }],
            0,
        ));
        b.build()
    }

    fn hash_of(code: &Code) -> u64 {
        let index = FunctionIndex::build(code).unwrap();
        let owners = bind_owners(code, &index).unwrap();
        hash_all(code, &index, &owners).unwrap()[0]
    }

    #[test]
    fn test_literal_values_not_indexes() {
        assert_eq!(hash_of(&unit(5, &[])), hash_of(&unit(5, &[9, 9])));
        assert_ne!(hash_of(&unit(5, &[])), hash_of(&unit(6, &[])));
    }
}
