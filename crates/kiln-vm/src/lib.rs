//! Module loading for the Kiln VM.
//!
//! [`Module::load`] turns a bytecode unit into a running image: global
//! storage, resolved natives, linked type metadata and compiled code, all
//! published to a process-wide [`registry`] that symbolication and heap
//! tooling read from. Modules loaded with hot reload enabled can later be
//! [patched](Module::patch) in place.

pub mod config;
pub mod error;
pub mod globals;
pub mod hash;
pub mod jit;
pub mod linker;
pub mod module;
pub mod natives;
pub mod registry;
mod reload;
pub mod symbols;

pub use config::{LoadOptions, DISABLED_LIBS_ENV};
pub use error::{ConfigError, LoadError};
pub use linker::{Binding, EnumMeta, FunctionIndex, FunctionRef, ModuleContext, ObjMeta, VirtualMeta};
pub use module::Module;
pub use natives::{register_builtin, NativeEntry, BUILTIN_LIB, ENTRY_PREFIX, STD_LIB};
pub use symbols::{capture_stack, resolve_symbol, scan_stack};
