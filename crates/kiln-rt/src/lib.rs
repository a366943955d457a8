//! Runtime support shared by loaded modules and generated code.
//!
//! Errors raised while native code runs cannot travel through `Result`, so
//! they are parked per thread with [`raise`] and picked up by the reflective
//! call that started the native call.

pub mod bridge;
pub mod call;
pub mod error;
pub mod exception;
pub mod stubs;
pub mod thread;

pub use bridge::{call_bridge, set_call_bridge, CallBridge};
pub use call::{call_method, call_raw, kiln_wrapper_entry, make_fun_wrapper, make_var_args, wrapper_call, WrapperEntryFn, MAX_ARGS};
pub use error::{raise, take_pending_error, VmError};
pub use exception::{backtrace, capture_stack, resolve_symbol, setup_exception, CaptureStackFn, ResolveSymbolFn};
pub use stubs::{disabled_primitive, null_closure, null_function, var_args_entry, StubFn};
pub use thread::{current_stack_position, register_stack_top, stack_top, unregister_stack_top, with_stack_top};
