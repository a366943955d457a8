//! Native code generation for the Kiln VM.
//!
//! [`CraneliftBackend`] turns bytecode functions into machine code linked
//! against a module's globals and function-table slots, and patches old
//! bodies during hot reload. [`CraneliftBridge`] is the runtime call bridge:
//! it generates the trampolines reflective calls go through and the shims
//! behind wrapper closures.

pub mod backend;
pub mod bridge;
pub mod error;
pub mod jit;
pub mod memory;
pub mod patch;
pub mod translator;

pub use backend::{CodeBlob, CompiledFunction, DebugOffsets, JitBackend, LinkTarget};
pub use bridge::CraneliftBridge;
pub use error::NativeError;
pub use jit::CraneliftBackend;
pub use memory::ExecutableMemory;
pub use patch::PatchKind;
