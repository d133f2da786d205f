// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Load/link orchestrator for dynamic application objects
//! OWNERS: @runtime
//! PUBLIC API: Linkage, ObjectFile, ObjectParser, SymbolTable, ElfParser
//! DEPENDS_ON: badge-arena (segment placement), goblin (ELF parsing)
//! INVARIANTS: loads strictly precede the single link attempt; a failed load registers nothing;
//!             a failed link leaves the linkage terminally unrunnable

#![forbid(unsafe_code)]

mod elf;
mod image;
mod linkage;
mod object;
mod symbols;

use badge_arena::{AccessError, MapError};
use thiserror::Error;

pub use elf::{ElfObject, ElfParser};
pub use image::{LoadedImage, PlacedSegment};
pub use linkage::{Linkage, LoadedModule};
pub use object::{Export, ObjectFile, ObjectParser, Segment};
pub use symbols::{CollisionPolicy, SymbolTable};

/// Errors surfaced while loading or linking objects.
#[derive(Debug, Error)]
pub enum Error {
    /// Loading was attempted after the link phase began.
    #[error("linking already attempted")]
    LinkAttempted,
    /// A second executable was offered to the same linkage.
    #[error("executable already loaded")]
    ExecutableLoaded,
    /// Reading the object from its handle failed.
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    /// The object is malformed.
    #[error("invalid object: {0}")]
    InvalidObject(&'static str),
    /// The object uses a feature this loader does not handle.
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
    /// The object ends before a header or segment it declares.
    #[error("object truncated")]
    Truncated,
    /// The arena could not place a segment.
    #[error("segment placement failed: {0}")]
    Segment(#[from] MapError),
    /// Writing the image into the arena failed.
    #[error("image write failed: {0}")]
    Access(#[from] AccessError),
    /// The executable's entry point is not inside any loaded segment.
    #[error("entry point outside loaded segments")]
    MissingEntry,
    /// A relocation references a symbol nobody defines.
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),
    /// A relocation type the engine cannot apply.
    #[error("unsupported relocation type {0}")]
    UnsupportedRelocation(u32),
    /// A previous link attempt failed.
    #[error("dynamic linking failed")]
    LinkFailed,
}
