//! Native function resolution.
//!
//! Every library exports one entry point per native, `kilnp_<name>`. The
//! entry writes the signature it was compiled against through its argument
//! and returns the function pointer. The loader compares that signature
//! with the encoding of the native's declared type before binding it.

use std::ffi::{c_char, c_void, CStr};
use std::path::PathBuf;
use std::sync::Arc;

use kiln_code::{encode_signature, Code, Native};
use kiln_rt::{disabled_primitive, StubFn};
use libloading::Library;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::{env_disabled_libs, LoadOptions};
use crate::error::LoadError;

pub type NativeEntry = unsafe extern "C" fn(*mut *const c_char) -> *const c_void;

pub const ENTRY_PREFIX: &str = "kilnp_";
/// Library name routed to the in-process registry and the host's own
/// exported symbols.
pub const BUILTIN_LIB: &str = "builtin";
/// Library name routed to the versioned standard runtime.
pub const STD_LIB: &str = "std";

const STD_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
const STD_MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");

static BUILTINS: Lazy<RwLock<FxHashMap<String, NativeEntry>>> = Lazy::new(|| RwLock::new(FxHashMap::default()));

/// Registers an in-process entry point for natives of the `builtin`
/// library (and of `std` when no standard runtime file is found).
pub fn register_builtin(name: impl Into<String>, entry: NativeEntry) {
    let name = name.into();
    log::debug!("builtin native {} registered", name);
    BUILTINS.write().insert(name, entry);
}

/// Registered entry points first, then symbols exported by the host
/// executable.
fn builtin(name: &str) -> Option<NativeEntry> {
    if let Some(entry) = BUILTINS.read().get(name).copied() {
        return Some(entry);
    }
    let this = current_process()?;
    let symbol = format!("{}{}\0", ENTRY_PREFIX, name);
    let entry = unsafe { this.get::<NativeEntry>(symbol.as_bytes()) }.ok().map(|s| *s);
    entry
}

#[cfg(unix)]
fn current_process() -> Option<Library> {
    Some(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn current_process() -> Option<Library> {
    libloading::os::windows::Library::this().ok().map(Into::into)
}

#[cfg(not(any(unix, windows)))]
fn current_process() -> Option<Library> {
    None
}

/// File names tried for a library, in order.
pub fn library_file_names(lib: &str) -> Vec<String> {
    if lib == STD_LIB {
        let dll = format!(
            "{}kilnstd-{}.{}{}",
            std::env::consts::DLL_PREFIX,
            STD_MAJOR,
            STD_MINOR,
            std::env::consts::DLL_SUFFIX
        );
        return vec![dll];
    }
    if cfg!(target_pointer_width = "64") {
        vec![format!("{}64.kdll", lib), format!("{}.kdll", lib)]
    } else {
        vec![format!("{}.kdll", lib)]
    }
}

#[derive(Clone)]
enum LibraryHandle {
    Builtin,
    Disabled,
    Loaded(Arc<Library>),
}

/// Resolves the natives of one module. Consecutive natives of the same
/// library reuse the handle opened for the first one.
pub struct NativeResolver<'a> {
    options: &'a LoadOptions,
    env_disabled: Vec<String>,
    current: Option<(String, LibraryHandle)>,
    libraries: Vec<Arc<Library>>,
}

impl<'a> NativeResolver<'a> {
    pub fn new(options: &'a LoadOptions) -> Self {
        Self { options, env_disabled: env_disabled_libs(), current: None, libraries: Vec::new() }
    }

    /// Address to store in the function table for `native`.
    pub fn resolve(&mut self, code: &Code, native: &Native) -> Result<usize, LoadError> {
        let handle = self.library(&native.lib)?;
        let entry = match handle {
            LibraryHandle::Disabled => return Ok(disabled_primitive as StubFn as usize),
            LibraryHandle::Builtin => builtin(&native.name),
            LibraryHandle::Loaded(lib) => {
                let symbol = format!("{}{}\0", ENTRY_PREFIX, native.name);
                unsafe { lib.get::<NativeEntry>(symbol.as_bytes()) }.ok().map(|s| *s)
            }
        };
        let entry = entry.ok_or_else(|| symbol_not_found(native))?;

        let mut reported: *const c_char = std::ptr::null();
        let fun = unsafe { entry(&mut reported) };
        if fun.is_null() {
            return Err(symbol_not_found(native));
        }
        let expected = encode_signature(code, native.ty)?;
        let found = if reported.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(reported) }.to_string_lossy().into_owned()
        };
        if found != expected {
            return Err(LoadError::SignatureMismatch {
                lib: native.lib.clone(),
                name: native.name.clone(),
                expected,
                found,
            });
        }
        log::debug!("native {}@{} bound at {:p}", native.lib, native.name, fun);
        Ok(fun as usize)
    }

    /// Libraries opened so far. They must outlive every pointer resolved
    /// from them.
    pub fn into_libraries(self) -> Vec<Arc<Library>> {
        self.libraries
    }

    fn library(&mut self, lib: &str) -> Result<LibraryHandle, LoadError> {
        if let Some((name, handle)) = &self.current {
            if name == lib {
                return Ok(handle.clone());
            }
        }
        let handle = self.open(lib)?;
        if let LibraryHandle::Loaded(l) = &handle {
            self.libraries.push(l.clone());
        }
        self.current = Some((lib.to_string(), handle.clone()));
        Ok(handle)
    }

    fn open(&self, lib: &str) -> Result<LibraryHandle, LoadError> {
        if self.options.is_disabled(lib) || self.env_disabled.iter().any(|d| d == lib) {
            log::info!("library {} is disabled", lib);
            return Ok(LibraryHandle::Disabled);
        }
        if lib == BUILTIN_LIB {
            return Ok(LibraryHandle::Builtin);
        }

        let names = library_file_names(lib);
        let mut searched = Vec::new();
        let mut last_error = None;
        for name in &names {
            for path in self.candidates(name) {
                match unsafe { Library::new(&path) } {
                    Ok(library) => {
                        log::info!("loaded library {}", path.display());
                        return Ok(LibraryHandle::Loaded(Arc::new(library)));
                    }
                    Err(err) => {
                        searched.push(path.display().to_string());
                        last_error = Some(err);
                    }
                }
            }
        }

        if lib == STD_LIB {
            log::debug!("no standard runtime file found, using builtin natives");
            return Ok(LibraryHandle::Builtin);
        }
        Err(LoadError::LibraryNotFound {
            name: names.last().cloned().unwrap_or_else(|| lib.to_string()),
            searched: searched.join(", "),
            source: last_error,
        })
    }

    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.options.library_paths.iter().map(|dir| dir.join(name)).collect();
        paths.push(PathBuf::from(name));
        paths
    }
}

fn symbol_not_found(native: &Native) -> LoadError {
    LoadError::SymbolNotFound { lib: native.lib.clone(), name: native.name.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_file_names() {
        let names = library_file_names("ui");
        assert_eq!(names.last().unwrap(), "ui.kdll");
        if cfg!(target_pointer_width = "64") {
            assert_eq!(names[0], "ui64.kdll");
        }
        let std = &library_file_names(STD_LIB)[0];
        assert!(std.contains(&format!("kilnstd-{}.{}", STD_MAJOR, STD_MINOR)));
        assert!(std.ends_with(std::env::consts::DLL_SUFFIX));
    }

    #[test]
    fn test_search_paths_come_first() {
        let options = LoadOptions::default().library_path("/opt/kiln");
        let resolver = NativeResolver::new(&options);
        let paths = resolver.candidates("ui.kdll");
        assert_eq!(paths, vec![PathBuf::from("/opt/kiln/ui.kdll"), PathBuf::from("ui.kdll")]);
    }
}
