use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable listing libraries whose natives are replaced by
/// stubs failing at call time. Entries are comma separated. The list is
/// read on every load, on top of [`LoadOptions::disabled_libs`].
pub const DISABLED_LIBS_ENV: &str = "KILN_DISABLED_LIBS";

/// Options controlling how a module is loaded.
///
/// ```toml
/// hot_reload = true
/// disabled_libs = ["ui", "sqlite"]
/// library_paths = ["./libs"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Keep the code generator and content hashes so the module can be
    /// patched later.
    pub hot_reload: bool,
    pub disabled_libs: Vec<String>,
    /// Directories searched for native libraries before the system paths.
    pub library_paths: Vec<PathBuf>,
}

impl LoadOptions {
    /// Defaults plus the deny-list from [`DISABLED_LIBS_ENV`].
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&source).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Appends the entries of [`DISABLED_LIBS_ENV`] to the deny-list.
    pub fn with_env(mut self) -> Self {
        for lib in env_disabled_libs() {
            if !self.disabled_libs.contains(&lib) {
                self.disabled_libs.push(lib);
            }
        }
        self
    }

    pub fn with_hot_reload(mut self, enabled: bool) -> Self {
        self.hot_reload = enabled;
        self
    }

    pub fn disable_lib(mut self, lib: impl Into<String>) -> Self {
        self.disabled_libs.push(lib.into());
        self
    }

    pub fn library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_paths.push(dir.into());
        self
    }

    /// A library is disabled when it is a whole entry of the deny-list.
    pub fn is_disabled(&self, lib: &str) -> bool {
        self.disabled_libs.iter().any(|d| d == lib)
    }
}

/// Current entries of [`DISABLED_LIBS_ENV`].
pub fn env_disabled_libs() -> Vec<String> {
    std::env::var(DISABLED_LIBS_ENV).map(|value| parse_lib_list(&value)).unwrap_or_default()
}

pub fn parse_lib_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}
