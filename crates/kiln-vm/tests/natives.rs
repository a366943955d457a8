mod common;

use std::io::Write;

use common::*;
use kiln_gc::Dynamic;
use kiln_rt::VmError;
use kiln_vm::{ConfigError, LoadError, LoadOptions, Module, DISABLED_LIBS_ENV};

#[test]
fn test_builtin_native_is_bound() {
    init_logging();
    register_natives();
    let module = Module::load(single_native("builtin", "triple"), &LoadOptions::default()).unwrap();
    assert_eq!(module.call(0, &[Dynamic::I32(14)]).unwrap().to_i32().unwrap(), 42);
}

#[test]
fn test_std_falls_back_to_builtins() {
    register_natives();
    let module = Module::load(single_native("std", "triple"), &LoadOptions::default()).unwrap();
    assert_eq!(module.call(0, &[Dynamic::I32(2)]).unwrap().to_i32().unwrap(), 6);
}

#[test]
fn test_signature_mismatch_is_fatal() {
    register_natives();
    let err = Module::load(single_native("builtin", "float_only"), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::SignatureMismatch { .. }));
    assert_eq!(
        err.to_string(),
        "Invalid signature for function builtin@float_only : Pi_i required but Pd_d found in library"
    );
}

#[test]
fn test_unknown_symbol() {
    let err = Module::load(single_native("builtin", "never_registered"), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::SymbolNotFound { ref name, .. } if name == "never_registered"));
}

#[test]
fn test_missing_library() {
    let err = Module::load(single_native("nosuchlib", "open"), &LoadOptions::default()).unwrap_err();
    assert_eq!(err.to_string(), "Failed to load library nosuchlib.kdll");
}

#[test]
fn test_disabled_library_fails_at_call_time() {
    let options = LoadOptions::default().disable_lib("ui");
    let module = Module::load(single_native("ui", "open"), &options).unwrap();
    let err = module.call(0, &[Dynamic::I32(1)]).unwrap_err();
    assert_eq!(err, VmError::DisabledPrimitive);
    assert_eq!(err.to_string(), "This library primitive has been disabled");
}

#[test]
fn test_environment_deny_list_applies_to_every_load() {
    std::env::set_var(DISABLED_LIBS_ENV, "envblocked, audio");
    let loaded = Module::load(single_native("envblocked", "open"), &LoadOptions::default());
    std::env::remove_var(DISABLED_LIBS_ENV);
    let module = loaded.unwrap();
    assert_eq!(module.call(0, &[Dynamic::I32(1)]).unwrap_err(), VmError::DisabledPrimitive);
}

#[test]
fn test_options_from_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "hot_reload = true").unwrap();
    writeln!(file, "disabled_libs = [\"ui\"]").unwrap();
    let options = LoadOptions::from_file(file.path()).unwrap();
    assert!(options.hot_reload);

    let module = Module::load(single_native("ui", "open"), &options).unwrap();
    assert!(module.hot_reload_enabled());
    assert_eq!(module.call(0, &[Dynamic::I32(1)]).unwrap_err(), VmError::DisabledPrimitive);
}

#[test]
fn test_invalid_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "disabled_libs = \"ui\"").unwrap();
    let err = LoadOptions::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    let missing = LoadOptions::from_file(file.path().with_extension("missing")).unwrap_err();
    assert!(matches!(missing, ConfigError::Io { .. }));
}
