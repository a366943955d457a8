use cranelift_codegen::settings::SetError;
use kiln_code::CodeError;
use thiserror::Error;

/// Errors that can occur during native code generation.
#[derive(Error, Debug)]
pub enum NativeError {
    #[error("Failed during Cranelift code generation: {0}")]
    CraneliftGen(#[from] cranelift_codegen::CodegenError),

    #[error("Failed during module processing: {0}")]
    CraneliftModule(#[from] cranelift_module::ModuleError),

    #[error("Failed to configure Cranelift settings: {0}")]
    SettingsError(#[from] SetError),

    #[error("ISA setup failed: {0}")]
    IsaSetupError(String),

    #[error("Unsupported host architecture or features")]
    UnsupportedHost,

    #[error("Invalid bytecode: {0}")]
    Code(#[from] CodeError),

    #[error("Cannot translate fun${findex}: {message}")]
    Translation { findex: u32, message: String },

    #[error("fun${0} needs a relocation the loader cannot apply")]
    UnexpectedRelocation(u32),

    #[error("Function id {0} has no call slot")]
    UnknownFunction(u32),

    #[error("The backend has not been initialized for a module")]
    NotInitialized,

    #[error("{op} failed: {source}")]
    Memory {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl NativeError {
    pub(crate) fn translation(findex: u32, message: impl Into<String>) -> Self {
        NativeError::Translation { findex, message: message.into() }
    }

    pub(crate) fn last_os_error(op: &'static str) -> Self {
        NativeError::Memory { op, source: std::io::Error::last_os_error() }
    }
}
