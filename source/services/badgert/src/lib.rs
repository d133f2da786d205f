// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Badge application runtime
//! OWNERS: @runtime
//! PUBLIC API: Runtime, RuntimeBuilder, RuntimeConfig, LibraryRegistry, ProcessTable, Executor, TaskSpawner
//! DEPENDS_ON: badge-loader (Linkage), badge-abi (ExportRegistry), badge-arena (Arena)
//! INVARIANTS: a process id exists only while its task runs; a failed start leaves no record and no arena

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod config;
mod libraries;
mod process;
mod resolve;
mod runtime;
mod task;

use badge_abi::ExportError;
use thiserror::Error;

pub use config::{ConfigError, Isolation, RuntimeConfig, SymbolCollisions};
pub use libraries::LibraryRegistry;
pub use process::{ProcessRecord, ProcessTable};
pub use runtime::{Runtime, RuntimeBuilder};
pub use task::{ExitHook, ExitReason, Executor, Program, TaskBody, TaskSpawner, ThreadSpawner, MIN_HOST_STACK};

/// Why a program could not be started. Every variant implies full rollback.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable file could not be opened.
    #[error("failed to open {path}: {source}")]
    Io {
        /// Path given to [`Runtime::start`].
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A registered or discovered library could not be opened.
    #[error("failed to open library {name}: {source}")]
    Open {
        /// Library name.
        name: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// An object failed to load.
    #[error("failed to load {name}: {source}")]
    Load {
        /// Object name.
        name: String,
        /// Loader error.
        #[source]
        source: badge_loader::Error,
    },
    /// No built-in, registration or search directory provides a needed library.
    #[error("library not found: {0}")]
    MissingLibrary(String),
    /// Loading the named library closed a dependency cycle.
    #[error("dependency cycle through {0}")]
    DependencyCycle(String),
    /// Dynamic linking failed.
    #[error("link failed: {0}")]
    Link(#[source] badge_loader::Error),
    /// The linkage has no linked executable.
    #[error("linkage is not ready to run as a program")]
    NotReady,
    /// The capability catalog could not be built.
    #[error(transparent)]
    Export(#[from] ExportError),
    /// The task could not be created.
    #[error("failed to create task: {0}")]
    Spawn(#[source] std::io::Error),
}
