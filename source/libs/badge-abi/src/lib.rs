// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host capability catalog offered to loaded applications
//! OWNERS: @runtime
//! PUBLIC API: ExportRegistry, CapabilityProvider, CodeGenerator, AbiContext, ExecUnit
//! DEPENDS_ON: badge-loader (SymbolTable), badge-arena (process memory for mem_map)
//! INVARIANTS: the wrapped catalog is built once and never invalidated; dispatch indices never change

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod caps;
mod context;
mod registry;
mod trampoline;

use badge_loader::SymbolTable;
use thiserror::Error;

pub use context::{AbiContext, ExecUnit, Resume, Suspend, ThreadSuspend};
pub use registry::ExportRegistry;
pub use trampoline::{CodeGenerator, DirectCalls, TemplateTrampolines};

/// A subsystem that contributes name to raw-address pairs to the catalog.
pub trait CapabilityProvider: Send + Sync {
    /// Subsystem name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Inserts this subsystem's raw entry points into `map`.
    fn export_unwrapped(&self, map: &mut SymbolTable);
}

/// Errors raised while building the wrapped catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The code generator could not emit a trampoline.
    #[error("trampoline generation failed for index {0}")]
    Trampoline(u32),
    /// More capabilities than a dispatch index can address.
    #[error("dispatch table full")]
    TableFull,
}
