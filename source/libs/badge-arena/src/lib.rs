// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-process memory arena for untrusted application images
//! OWNERS: @runtime
//! PUBLIC API: Arena, MemRange, Prot, Pid, RawAllocator, HeapAllocator, SharedArena
//! DEPENDS_ON: bitflags, parking_lot, thiserror, log
//! INVARIANTS: one raw allocation per mapped range; unmap releases the whole backing allocation;
//!             dropping an arena frees every outstanding raw allocation

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod allocator;
mod arena;

use core::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use thiserror::Error;

pub use allocator::{HeapAllocator, RawAllocator};
pub use arena::{Arena, Mapping};

/// Native pointer width; the smallest alignment the arena ever hands out.
pub const WORD: usize = core::mem::size_of::<usize>();

bitflags! {
    /// Access intent for a mapped range. Enforcement is up to the raw allocator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Prot: u32 {
        /// Readable.
        const R = 0x1;
        /// Writable.
        const W = 0x2;
        /// Executable.
        const X = 0x4;
    }
}

/// Process identifier bound 1:1 to an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    /// Wraps a raw process id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous memory region. Carries no ownership by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRange {
    /// First byte of the region.
    pub base: usize,
    /// Length in bytes.
    pub length: usize,
}

impl MemRange {
    /// Creates a range from a base and a length.
    pub const fn new(base: usize, length: usize) -> Self {
        Self { base, length }
    }

    /// One past the last byte, saturating at the top of the address space.
    pub fn end(&self) -> usize {
        self.base.saturating_add(self.length)
    }

    /// Whether `[addr, addr + len)` lies entirely inside this range.
    pub fn contains_span(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }

    /// Whether the two ranges share at least one byte.
    pub fn overlaps(&self, other: &MemRange) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Instruction/stack pointer pair an application's exit primitive jumps back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumePoint {
    /// Resume instruction pointer.
    pub pc: usize,
    /// Resume stack pointer.
    pub sp: usize,
}

/// Arena handle shared between the orchestrator, the process table and the running task.
pub type SharedArena = Arc<Mutex<Arena>>;

/// Errors returned by [`Arena::map`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// A zero-length mapping was requested.
    #[error("zero-length mapping")]
    ZeroLength,
    /// Alignment was zero or not a power of two.
    #[error("alignment {0} is not a power of two")]
    BadAlignment(usize),
    /// The raw allocator could not provide the backing memory.
    #[error("allocator exhausted ({0} bytes requested)")]
    Exhausted(usize),
    /// Length arithmetic overflowed.
    #[error("mapping size overflow")]
    Overflow,
}

/// Errors returned by arena memory access.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The address does not fall inside any mapped range.
    #[error("address {0:#x} is not mapped")]
    Unmapped(usize),
    /// The access starts inside a mapped range but runs past its end.
    #[error("access at {addr:#x} of {len} bytes crosses a range boundary")]
    OutOfBounds {
        /// First byte of the access.
        addr: usize,
        /// Access length.
        len: usize,
    },
}
