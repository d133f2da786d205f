// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Raw allocation strategy behind an [`Arena`](crate::Arena).

use std::collections::BTreeMap;

use log::debug;

use crate::{MemRange, Prot, WORD};

/// Source of raw, pointer-aligned memory for an arena.
///
/// The arena only ever asks for whole allocations and gives them back whole. How
/// the `prot` intent is honored (protected regions, MPU windows, nothing at all)
/// is left to the implementation. Byte access goes through the allocator because
/// it owns the backing store.
pub trait RawAllocator: Send {
    /// Returns a pointer-aligned range of at least `length` bytes, or `None` when exhausted.
    fn allocate(&mut self, length: usize, prot: Prot) -> Option<MemRange>;

    /// Releases a range previously returned by [`RawAllocator::allocate`].
    fn free(&mut self, range: MemRange);

    /// Copies `bytes` to `addr`. Returns false if the span is not backed.
    fn write(&mut self, addr: usize, bytes: &[u8]) -> bool;

    /// Copies `out.len()` bytes starting at `addr` into `out`. Returns false if the span is not backed.
    fn read(&self, addr: usize, out: &mut [u8]) -> bool;
}

struct Block {
    storage: Box<[u8]>,
    pad: usize,
    length: usize,
}

/// Host heap allocator with an optional byte budget.
///
/// Blocks are zero-filled and keyed by the word-aligned address handed out.
#[derive(Default)]
pub struct HeapAllocator {
    blocks: BTreeMap<usize, Block>,
    limit: Option<usize>,
    in_use: usize,
}

impl HeapAllocator {
    /// Creates an allocator without a budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator that refuses to hold more than `limit` bytes at once.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Number of live blocks.
    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn locate(&self, addr: usize, len: usize) -> Option<(usize, usize)> {
        let (&key, block) = self.blocks.range(..=addr).next_back()?;
        let rel = addr - key;
        let end = rel.checked_add(len)?;
        if end > block.length {
            return None;
        }
        Some((key, block.pad + rel))
    }
}

impl RawAllocator for HeapAllocator {
    fn allocate(&mut self, length: usize, prot: Prot) -> Option<MemRange> {
        let in_use = self.in_use.checked_add(length)?;
        if self.limit.is_some_and(|limit| in_use > limit) {
            debug!("arena: allocator({length}, {prot:?}) refused by budget");
            return None;
        }
        let total = length.checked_add(WORD - 1)?;
        let storage = vec![0u8; total].into_boxed_slice();
        let start = storage.as_ptr() as usize;
        let pad = start.wrapping_neg() & (WORD - 1);
        let base = start + pad;
        self.blocks.insert(base, Block { storage, pad, length });
        self.in_use = in_use;
        debug!("arena: allocator({length}, {prot:?}) = {base:#x}");
        Some(MemRange::new(base, length))
    }

    fn free(&mut self, range: MemRange) {
        debug!("arena: deallocator({:#x})", range.base);
        if let Some(block) = self.blocks.remove(&range.base) {
            self.in_use -= block.length;
        }
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) -> bool {
        let Some((key, offset)) = self.locate(addr, bytes.len()) else {
            return false;
        };
        match self.blocks.get_mut(&key) {
            Some(block) => {
                block.storage[offset..offset + bytes.len()].copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    fn read(&self, addr: usize, out: &mut [u8]) -> bool {
        let Some((key, offset)) = self.locate(addr, out.len()) else {
            return false;
        };
        match self.blocks.get(&key) {
            Some(block) => {
                out.copy_from_slice(&block.storage[offset..offset + out.len()]);
                true
            }
            None => false,
        }
    }
}
