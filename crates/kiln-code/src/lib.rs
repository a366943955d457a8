//! In-memory bytecode model of the Kiln VM.
//!
//! A [`Code`] unit is what the loader consumes: type descriptors, functions,
//! natives, globals, constants and literal pools. It is immutable once
//! built and is shared between a module and everything linked against it.

pub mod builder;
pub mod code;
pub mod error;
pub mod sig;
pub mod signature;
pub mod types;

pub use builder::CodeBuilder;
pub use code::{Code, Constant, Function, Native, Opcode, Reg};
pub use error::CodeError;
pub use sig::FunSig;
pub use signature::{decode_shape, encode as encode_signature, SignatureShape};
pub use types::{EnumConstruct, EnumType, FunType, ObjField, ObjProto, ObjType, Type, TypeId, TypeKind, VirtualType};
