use std::sync::Arc;

use kiln_code::FunSig;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::VmError;

/// The native calling-convention bridge.
///
/// Knows how to invoke a raw function pointer with a small list of
/// machine words laid out per a signature, and where the adapter shim for
/// a given signature lives.
pub trait CallBridge: Send + Sync {
    /// Calls `fun` with `args`, one word per argument of `sig`, and returns
    /// the result word (zero for `Void`).
    ///
    /// # Safety
    /// `fun` must be a function whose native signature is `sig`.
    unsafe fn static_call(&self, fun: usize, sig: &FunSig, args: &[u64]) -> u64;

    /// Entry point of an adapter with native signature
    /// `(wrapper, sig.args...) -> sig.ret`, or `None` when the shape is
    /// unsupported.
    fn wrapper_entry(&self, sig: &FunSig) -> Option<usize>;
}

static CALL_BRIDGE: Lazy<RwLock<Option<Arc<dyn CallBridge>>>> = Lazy::new(|| RwLock::new(None));

/// Installs the process-wide call bridge. The last installation wins.
pub fn set_call_bridge(bridge: Arc<dyn CallBridge>) {
    *CALL_BRIDGE.write() = Some(bridge);
}

pub fn call_bridge() -> Result<Arc<dyn CallBridge>, VmError> {
    CALL_BRIDGE.read().clone().ok_or(VmError::NoCallBridge)
}
