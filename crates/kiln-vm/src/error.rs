use std::path::PathBuf;

use kiln_code::{CodeError, TypeKind};
use kiln_layout::LayoutError;
use kiln_native::NativeError;
use miette::Diagnostic;
use thiserror::Error;

/// Errors that abort a module load or a hot reload. Nothing is published
/// when one of them is returned.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("Failed to allocate {what}")]
    #[diagnostic(code(kiln::load::alloc))]
    Allocation { what: &'static str },

    #[error("Function id {fid} is declared twice")]
    #[diagnostic(code(kiln::load::duplicate_function))]
    DuplicateFunction { fid: u32 },

    #[error("Function id {fid} is outside the function table ({count} entries)")]
    #[diagnostic(code(kiln::load::function_out_of_range))]
    FunctionOutOfRange { fid: u32, count: usize },

    #[error("Failed to load library {name}")]
    #[diagnostic(
        code(kiln::load::library_not_found),
        help("searched {searched}; add a directory to `library_paths` or disable the library")
    )]
    LibraryNotFound {
        name: String,
        searched: String,
        #[source]
        source: Option<libloading::Error>,
    },

    #[error("Failed to load function {lib}@{name}")]
    #[diagnostic(code(kiln::load::symbol_not_found))]
    SymbolNotFound { lib: String, name: String },

    #[error("Invalid signature for function {lib}@{name} : {expected} required but {found} found in library")]
    #[diagnostic(
        code(kiln::load::signature_mismatch),
        help("the library was built against a different declaration of this native")
    )]
    SignatureMismatch { lib: String, name: String, expected: String, found: String },

    #[error("Constant for global {global} is not an object")]
    #[diagnostic(code(kiln::load::constant_type))]
    ConstantNotObject { global: u32 },

    #[error("Constant field {field} of {ty} has unsupported kind {kind:?}")]
    #[diagnostic(code(kiln::load::constant_field))]
    ConstantField { ty: String, field: usize, kind: TypeKind },

    #[error("Constant field {field} of global {global} refers to missing literal #{index}")]
    #[diagnostic(code(kiln::load::constant_literal))]
    ConstantLiteral { global: u32, field: usize, index: u32 },

    #[error("Hot reload is not enabled for this module")]
    #[diagnostic(code(kiln::load::hot_reload_disabled), help("load the module with `hot_reload = true`"))]
    HotReloadDisabled,

    #[error("Invalid bytecode: {0}")]
    #[diagnostic(code(kiln::load::bytecode))]
    Code(#[from] CodeError),

    #[error("Layout computation failed: {0}")]
    #[diagnostic(code(kiln::load::layout))]
    Layout(#[from] LayoutError),

    #[error("Code generation failed: {0}")]
    #[diagnostic(code(kiln::load::codegen))]
    Native(#[from] NativeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}")]
    #[diagnostic(code(kiln::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration {path}")]
    #[diagnostic(code(kiln::config::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
