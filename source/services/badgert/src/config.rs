// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use badge_loader::CollisionPolicy;
use serde::Deserialize;
use thiserror::Error;

/// How applications reach host capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// Raw host addresses.
    #[default]
    Direct,
    /// Generated stubs dispatching through a table.
    Trampoline,
}

/// Which definition a duplicate exported symbol resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolCollisions {
    /// The most recently loaded module wins.
    #[default]
    LastWins,
    /// The first module to define a name keeps it.
    FirstWins,
}

impl From<SymbolCollisions> for CollisionPolicy {
    fn from(value: SymbolCollisions) -> Self {
        match value {
            SymbolCollisions::LastWins => CollisionPolicy::LastWins,
            SymbolCollisions::FirstWins => CollisionPolicy::FirstWins,
        }
    }
}

/// Tunables for a [`crate::Runtime`]. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Call-site strategy for host capabilities.
    pub isolation: Isolation,
    /// Library names satisfied by the capability catalog instead of a file.
    pub builtin_libraries: Vec<String>,
    /// Duplicate symbol resolution.
    pub symbol_collisions: SymbolCollisions,
    /// The single argument passed to every program.
    pub argv0: String,
    /// Environment passed to every program.
    pub envp: Vec<String>,
    /// Requested stack size for application tasks.
    pub task_stack_bytes: usize,
    /// Directories searched for libraries that are not registered.
    pub search_dirs: Vec<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::Direct,
            builtin_libraries: ["libc.so", "libbadge.so", "libm.so", "libimplicitops.so", "libdisplay.so"]
                .into_iter()
                .map(String::from)
                .collect(),
            symbol_collisions: SymbolCollisions::LastWins,
            argv0: "a.out".into(),
            envp: Vec::new(),
            task_stack_bytes: 4096 * core::mem::size_of::<usize>(),
            search_dirs: Vec::new(),
        }
    }
}

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Trampoline isolation was requested without a code generator.
    #[error("trampoline isolation requires a code generator")]
    MissingCodeGenerator,
}

impl RuntimeConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Reads and parses the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data =
            fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
    }

    /// Whether `name` is served by the capability catalog.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin_libraries.iter().any(|lib| lib == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_yields_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.argv0, "a.out");
        assert!(config.is_builtin("libm.so"));
        assert_eq!(config.task_stack_bytes, 4096 * core::mem::size_of::<usize>());
    }

    #[test]
    fn fields_override_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            isolation = "trampoline"
            symbol_collisions = "first-wins"
            builtin_libraries = ["libc.so"]
            search_dirs = ["/apps/lib"]
            envp = ["HOME=/"]
            "#,
        )
        .unwrap();
        assert_eq!(config.isolation, Isolation::Trampoline);
        assert_eq!(CollisionPolicy::from(config.symbol_collisions), CollisionPolicy::FirstWins);
        assert!(!config.is_builtin("libm.so"));
        assert_eq!(config.search_dirs, vec![PathBuf::from("/apps/lib")]);
        assert_eq!(config.envp, vec!["HOME=/".to_string()]);
    }

    #[test]
    fn unknown_keys_and_values_are_rejected() {
        assert!(matches!(RuntimeConfig::from_toml_str("stack = 1"), Err(ConfigError::Parse(_))));
        assert!(matches!(RuntimeConfig::from_toml_str("isolation = \"mmu\""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_reads_files() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "argv0 = \"demo\"").unwrap();
        assert_eq!(RuntimeConfig::load(file.path()).unwrap().argv0, "demo");

        let missing = file.path().with_extension("missing");
        assert!(matches!(RuntimeConfig::load(&missing), Err(ConfigError::Read { .. })));
    }
}
