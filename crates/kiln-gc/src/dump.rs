use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Writes the known type table through the provided sink.
pub type TypeDumpFn = fn(&mut dyn FnMut(&[u8]));

static DUMP_TYPES: Lazy<RwLock<Option<TypeDumpFn>>> = Lazy::new(|| RwLock::new(None));

/// Installs the type-dump source used by heap introspection. The last
/// registration wins.
pub fn set_dump_types(f: TypeDumpFn) {
    *DUMP_TYPES.write() = Some(f);
    log::debug!("type dump source installed");
}

/// Runs the installed type-dump source. Returns `false` when none is set.
pub fn dump_types(save: &mut dyn FnMut(&[u8])) -> bool {
    let dump = *DUMP_TYPES.read();
    match dump {
        Some(f) => {
            f(save);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump_two_words(save: &mut dyn FnMut(&[u8])) {
        save(&2u32.to_ne_bytes());
        save(&7u32.to_ne_bytes());
    }

    #[test]
    fn test_installed_dump_is_used() {
        set_dump_types(dump_two_words);
        let mut out = Vec::new();
        assert!(dump_types(&mut |bytes| out.extend_from_slice(bytes)));
        assert_eq!(out.len(), 8);
    }
}
