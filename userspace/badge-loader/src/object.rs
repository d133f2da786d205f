// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Seam between the orchestrator and the object-file parser / relocation engine.

use badge_arena::{Arena, Prot};

use crate::{Error, LoadedImage, SymbolTable};

/// One loadable segment as declared by the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Requested virtual address; doubles as the relocation reference point.
    pub vaddr: u64,
    /// Size in memory (file bytes followed by zero fill).
    pub mem_size: u64,
    /// Required alignment. Zero means none.
    pub align: u64,
    /// File-backed bytes, never longer than `mem_size`.
    pub data: Vec<u8>,
    /// Declared access.
    pub prot: Prot,
}

/// A symbol the object defines for others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// Symbol name.
    pub name: String,
    /// Virtual address, or the raw value when `absolute`.
    pub value: u64,
    /// Absolute symbols are not translated through the placed image.
    pub absolute: bool,
}

/// A parsed object as consumed by [`Linkage`](crate::Linkage).
pub trait ObjectFile: Send {
    /// Loadable segments.
    fn segments(&self) -> &[Segment];

    /// Declared dependency (needed library) names.
    fn needed(&self) -> &[String];

    /// Exported symbols.
    fn exports(&self) -> &[Export];

    /// Entry point virtual address, if the object has one.
    fn entry(&self) -> Option<u64>;

    /// Applies this object's relocations to its placed `image` against `symbols`.
    fn relocate(&self, image: &LoadedImage, symbols: &SymbolTable, arena: &mut Arena) -> Result<(), Error>;
}

/// Turns raw object bytes into an [`ObjectFile`].
pub trait ObjectParser: Send + Sync {
    /// Parses `bytes`; `name` is only used for diagnostics.
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn ObjectFile>, Error>;
}
