//! Per-thread stack bounds used by stack capture.

use std::cell::Cell;

thread_local! {
    static STACK_TOP: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Records the highest stack address managed frames of this thread may
/// occupy. Usually the address of a local in the thread's outermost frame.
pub fn register_stack_top(top: usize) {
    log::trace!("stack top {:#x} registered", top);
    STACK_TOP.with(|t| t.set(Some(top)));
}

pub fn unregister_stack_top() {
    STACK_TOP.with(|t| t.set(None));
}

pub fn stack_top() -> Option<usize> {
    STACK_TOP.with(|t| t.get())
}

/// Runs `f` with the stack top set to the current frame, restoring the
/// previous registration afterwards.
pub fn with_stack_top<R>(f: impl FnOnce() -> R) -> R {
    let marker = 0usize;
    let previous = stack_top();
    register_stack_top(&marker as *const usize as usize);
    let result = f();
    STACK_TOP.with(|t| t.set(previous));
    result
}

/// An address inside the caller's frame.
#[inline(never)]
pub fn current_stack_position() -> usize {
    let marker = 0usize;
    std::hint::black_box(&marker) as *const usize as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_top_is_scoped() {
        assert_eq!(stack_top(), None);
        let inner = with_stack_top(|| {
            let top = stack_top().unwrap();
            assert!(current_stack_position() < top);
            top
        });
        assert_ne!(inner, 0);
        assert_eq!(stack_top(), None);
    }
}
