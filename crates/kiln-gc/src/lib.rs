//! The slice of the garbage collector the loader talks to: the global root
//! set, the type-dump hook, the value representations shared with native
//! code (boxed dynamics and closures) and the heap that keeps those values
//! alive once native code holds their address.
//!
//! Scanning lives elsewhere; nothing here collects memory.

pub mod closure;
pub mod dump;
pub mod dynamic;
mod heap;
mod roots;

pub use closure::{fun_compare, Capture, Closure, ClosureError};
pub use dump::{dump_types, set_dump_types, TypeDumpFn};
pub use dynamic::{CastError, Dynamic};
pub use heap::{is_managed, manage_array, manage_boxed, manage_closure, managed_count, managed_value};
pub use roots::{global_root_count, is_global_root, register_global_root, unregister_global_root, visit_global_roots};
