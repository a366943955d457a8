//! Registration point for the stack unwinder's symbol provider.
//!
//! The exception machinery itself lives outside this crate. It only needs two
//! callbacks: one that turns a code address into a printable location and
//! one that captures the return addresses of the current native stack.

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Renders a code address, or `None` when it is not managed code.
pub type ResolveSymbolFn = fn(usize) -> Option<String>;

/// Fills the buffer with return addresses, innermost first, and returns how
/// many were written.
pub type CaptureStackFn = fn(&mut [usize]) -> usize;

#[derive(Clone, Copy)]
struct Handlers {
    resolve: ResolveSymbolFn,
    capture: CaptureStackFn,
}

static HANDLERS: Lazy<RwLock<Option<Handlers>>> = Lazy::new(|| RwLock::new(None));

/// Installs the symbol provider. Installing again replaces the previous pair.
pub fn setup_exception(resolve: ResolveSymbolFn, capture: CaptureStackFn) {
    log::debug!("exception symbol provider installed");
    *HANDLERS.write() = Some(Handlers { resolve, capture });
}

pub fn has_exception_handlers() -> bool {
    HANDLERS.read().is_some()
}

pub fn resolve_symbol(addr: usize) -> Option<String> {
    let handlers = (*HANDLERS.read())?;
    (handlers.resolve)(addr)
}

pub fn capture_stack(out: &mut [usize]) -> usize {
    match *HANDLERS.read() {
        Some(handlers) => (handlers.capture)(out).min(out.len()),
        None => 0,
    }
}

/// Captures up to `capacity` frames and renders each of them. Frames that
/// cannot be resolved are printed as raw addresses.
pub fn backtrace(capacity: usize) -> Vec<String> {
    let mut frames = vec![0usize; capacity];
    let n = capture_stack(&mut frames);
    frames[..n]
        .iter()
        .map(|&addr| resolve_symbol(addr).unwrap_or_else(|| format!("{:#x}", addr)))
        .collect()
}
