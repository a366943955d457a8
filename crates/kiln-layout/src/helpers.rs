use cranelift_codegen::ir::types;
use cranelift_codegen::ir::Type as ClifType;
use kiln_code::TypeKind;

pub fn pointer_size() -> usize {
    std::mem::size_of::<usize>()
}

/// Maps a value kind to the Cranelift type used to carry it in registers.
/// Returns `None` for `Void`.
pub fn clif_type(kind: TypeKind, pointer_type: ClifType) -> Option<ClifType> {
    match kind {
        TypeKind::Void => None,
        TypeKind::U8 | TypeKind::Bool => Some(types::I8),
        TypeKind::U16 => Some(types::I16),
        TypeKind::I32 => Some(types::I32),
        TypeKind::I64 => Some(types::I64),
        TypeKind::F32 => Some(types::F32),
        TypeKind::F64 => Some(types::F64),
        _ => Some(pointer_type),
    }
}
