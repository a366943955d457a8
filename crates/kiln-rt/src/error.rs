use std::cell::RefCell;

use kiln_gc::{CastError, ClosureError};
use thiserror::Error;

/// Catchable errors raised by VM-level operations at run time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    #[error("Too many arguments")]
    TooManyArguments,

    #[error("Missing arguments : {expected} expected but {passed} passed")]
    MissingArguments { expected: usize, passed: usize },

    #[error("Can't call closure with value")]
    ClosureWithValue,

    #[error("Variable fun args was not cast to typed function")]
    VarArgsNotCast,

    #[error("This library primitive has been disabled")]
    DisabledPrimitive,

    #[error("Null function ptr")]
    NullFunction,

    #[error("Closure is not a wrapper")]
    NotAWrapper,

    #[error("No call bridge has been installed")]
    NoCallBridge,

    #[error("Call bridge failure: {0}")]
    Bridge(String),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error(transparent)]
    Closure(#[from] ClosureError),
}

thread_local! {
    static PENDING: RefCell<Option<VmError>> = const { RefCell::new(None) };
}

/// Parks an error raised inside native code, where it cannot be returned.
/// The next dynamic call on this thread reports it.
pub fn raise(err: VmError) {
    log::debug!("vm error raised: {}", err);
    PENDING.with(|p| *p.borrow_mut() = Some(err));
}

/// Takes the error parked by [`raise`], if any.
pub fn take_pending_error() -> Option<VmError> {
    PENDING.with(|p| p.borrow_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_error_is_taken_once() {
        raise(VmError::NullFunction);
        assert_eq!(take_pending_error(), Some(VmError::NullFunction));
        assert_eq!(take_pending_error(), None);
    }

    #[test]
    fn test_missing_arguments_message() {
        let err = VmError::MissingArguments { expected: 2, passed: 1 };
        assert_eq!(err.to_string(), "Missing arguments : 2 expected but 1 passed");
    }
}
