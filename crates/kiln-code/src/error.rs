use thiserror::Error;

use crate::types::TypeId;

/// Errors raised while inspecting a bytecode unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("Unknown type {0}")]
    UnknownType(TypeId),

    #[error("Type {0} is not a function type")]
    NotAFunction(TypeId),

    #[error("Type {0} is not an object type")]
    NotAnObject(TypeId),

    #[error("Object type {ty} has no field #{field}")]
    UnknownField { ty: TypeId, field: u32 },

    #[error("Invalid signature '{sig}' at byte {pos}: {reason}")]
    InvalidSignature { sig: String, pos: usize, reason: &'static str },
}
