use once_cell::sync::Lazy;
use parking_lot::Mutex;

// Addresses of memory words holding managed pointers. Globals are shared by
// every thread, so unlike a shadow stack this set is process-wide.
static GLOBAL_ROOTS: Lazy<Mutex<Vec<usize>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// FFI: Registers a global root. `ptr_to_value` points to the word holding
/// the managed pointer.
#[no_mangle]
pub extern "C" fn register_global_root(ptr_to_value: *mut u8) {
    if ptr_to_value.is_null() {
        return;
    }
    let addr = ptr_to_value as usize;
    let mut roots = GLOBAL_ROOTS.lock();
    if !roots.contains(&addr) {
        log::trace!("register global root {:#x}", addr);
        roots.push(addr);
    }
}

/// FFI: Unregisters a global root.
#[no_mangle]
pub extern "C" fn unregister_global_root(ptr_to_value: *mut u8) {
    if ptr_to_value.is_null() {
        return;
    }
    let addr = ptr_to_value as usize;
    GLOBAL_ROOTS.lock().retain(|&p| p != addr);
}

pub fn is_global_root(ptr_to_value: *const u8) -> bool {
    GLOBAL_ROOTS.lock().contains(&(ptr_to_value as usize))
}

pub fn global_root_count() -> usize {
    GLOBAL_ROOTS.lock().len()
}

/// Visits every registered root with the current value stored at it.
///
/// # Safety
/// Every registered address must still point to a readable word.
pub unsafe fn visit_global_roots(mut visitor: impl FnMut(*mut u8, usize)) {
    let roots = GLOBAL_ROOTS.lock().clone();
    for addr in roots {
        let value = std::ptr::read_volatile(addr as *const usize);
        visitor(addr as *mut u8, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_and_removable() {
        let mut slot: usize = 0;
        let ptr = &mut slot as *mut usize as *mut u8;
        register_global_root(ptr);
        register_global_root(ptr);
        assert!(is_global_root(ptr));
        let mut seen = 0;
        unsafe {
            visit_global_roots(|root, _| {
                if root == ptr {
                    seen += 1;
                }
            })
        };
        assert_eq!(seen, 1);
        unregister_global_root(ptr);
        assert!(!is_global_root(ptr));
    }

    #[test]
    fn test_null_is_ignored() {
        register_global_root(std::ptr::null_mut());
        assert!(!is_global_root(std::ptr::null()));
    }
}
