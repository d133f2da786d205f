// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::{AccessError, MapError, MemRange, Pid, Prot, RawAllocator, ResumePoint, SharedArena, WORD};

/// A promised, aligned sub-range and the index of the raw allocation backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Range handed to the caller.
    pub promise: MemRange,
    /// Index into the arena's raw allocation list.
    pub actual: usize,
}

/// Private memory of one process plus its exit-resume state.
///
/// Every successful [`Arena::map`] appends exactly one raw allocation and one
/// mapping; every [`Arena::unmap`] removes exactly one of each. There is no
/// splitting or coalescing.
pub struct Arena {
    pid: Pid,
    actual: Vec<MemRange>,
    mapped: Vec<Mapping>,
    allocator: Box<dyn RawAllocator>,
    resume: Option<ResumePoint>,
}

impl Arena {
    /// Creates an empty arena for `pid` backed by `allocator`.
    pub fn new(pid: Pid, allocator: Box<dyn RawAllocator>) -> Self {
        debug!("arena: created for pid {pid}");
        Self { pid, actual: Vec::new(), mapped: Vec::new(), allocator, resume: None }
    }

    /// Wraps the arena for sharing between the orchestrator and the running task.
    pub fn into_shared(self) -> SharedArena {
        Arc::new(Mutex::new(self))
    }

    /// Owning process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Maps a new range of at least `min_length` bytes aligned to at least `min_align`.
    ///
    /// The alignment is raised to pointer width and the length rounded up to a
    /// multiple of it. Fails without touching any bookkeeping when the length is
    /// zero, the alignment is not a power of two, or the allocator is exhausted.
    pub fn map(&mut self, min_length: usize, prot: Prot, min_align: usize) -> Result<usize, MapError> {
        if min_length == 0 {
            return Err(MapError::ZeroLength);
        }
        if !min_align.is_power_of_two() {
            return Err(MapError::BadAlignment(min_align));
        }
        let align = min_align.max(WORD);
        let length = min_length.checked_next_multiple_of(align).ok_or(MapError::Overflow)?;

        let (raw, base) = if align <= WORD {
            let raw = self.allocator.allocate(length, prot).ok_or(MapError::Exhausted(length))?;
            (raw, raw.base)
        } else {
            // The allocator only guarantees pointer alignment: over-allocate and align inside.
            let padded = length.checked_add(align).ok_or(MapError::Overflow)?;
            let raw = self.allocator.allocate(padded, prot).ok_or(MapError::Exhausted(padded))?;
            (raw, raw.base.next_multiple_of(align))
        };

        let actual = self.actual.len();
        self.actual.push(raw);
        self.mapped.push(Mapping { promise: MemRange::new(base, length), actual });
        Ok(base)
    }

    /// Unmaps the range whose base is exactly `base`, freeing its whole backing allocation.
    ///
    /// Returns false and changes nothing when `base` is not an exact prior return of [`Arena::map`].
    pub fn unmap(&mut self, base: usize) -> bool {
        match self.mapped.iter().position(|m| m.promise.base == base) {
            Some(index) => {
                self.unmap_index(index);
                true
            }
            None => false,
        }
    }

    fn unmap_index(&mut self, index: usize) {
        let mapping = self.mapped.remove(index);
        let raw = self.actual.remove(mapping.actual);
        for other in self.mapped.iter_mut() {
            if other.actual > mapping.actual {
                other.actual -= 1;
            }
        }
        self.allocator.free(raw);
    }

    /// Raw allocations currently owned, in allocation order.
    pub fn actual(&self) -> &[MemRange] {
        &self.actual
    }

    /// Promised ranges currently mapped, in mapping order.
    pub fn mapped(&self) -> &[Mapping] {
        &self.mapped
    }

    /// Finds the mapped range containing `addr`.
    pub fn range_of(&self, addr: usize) -> Option<MemRange> {
        self.mapped.iter().map(|m| m.promise).find(|r| r.contains_span(addr, 1))
    }

    fn check_span(&self, addr: usize, len: usize) -> Result<(), AccessError> {
        match self.range_of(addr) {
            Some(range) if range.contains_span(addr, len) => Ok(()),
            Some(_) => Err(AccessError::OutOfBounds { addr, len }),
            None => Err(AccessError::Unmapped(addr)),
        }
    }

    /// Copies `bytes` into a single mapped range starting at `addr`.
    pub fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<(), AccessError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_span(addr, bytes.len())?;
        if self.allocator.write(addr, bytes) {
            Ok(())
        } else {
            Err(AccessError::Unmapped(addr))
        }
    }

    /// Reads `len` bytes from a single mapped range starting at `addr`.
    pub fn read(&self, addr: usize, len: usize) -> Result<Vec<u8>, AccessError> {
        let mut out = vec![0u8; len];
        if len == 0 {
            return Ok(out);
        }
        self.check_span(addr, len)?;
        if self.allocator.read(addr, &mut out) {
            Ok(out)
        } else {
            Err(AccessError::Unmapped(addr))
        }
    }

    /// Records where the application's exit primitive must resume.
    pub fn set_resume_point(&mut self, resume: ResumePoint) {
        self.resume = Some(resume);
    }

    /// Resume point captured for the running task, if any.
    pub fn resume_point(&self) -> Option<ResumePoint> {
        self.resume
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        debug!("arena: destroying pid {} ({} allocations)", self.pid, self.actual.len());
        self.mapped.clear();
        for raw in self.actual.drain(..) {
            self.allocator.free(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapAllocator;

    fn arena() -> Arena {
        Arena::new(Pid::new(1), Box::new(HeapAllocator::new()))
    }

    #[test]
    fn small_alignment_takes_fast_path() {
        let mut arena = arena();
        let base = arena.map(3, Prot::R | Prot::W, 1).expect("map");
        assert_eq!(base % WORD, 0);
        assert_eq!(arena.actual()[0].length, WORD);
        assert_eq!(arena.mapped()[0].promise, MemRange::new(base, WORD));
    }

    #[test]
    fn large_alignment_over_allocates() {
        let mut arena = arena();
        let base = arena.map(100, Prot::R | Prot::X, 64).expect("map");
        assert_eq!(base % 64, 0);
        assert_eq!(arena.mapped()[0].promise.length, 128);
        assert_eq!(arena.actual()[0].length, 128 + 64);
        assert!(arena.actual()[0].contains_span(base, 128));
    }

    #[test]
    fn back_indices_follow_removals() {
        let mut arena = arena();
        let a = arena.map(8, Prot::R, 8).unwrap();
        let b = arena.map(8, Prot::R, 8).unwrap();
        let c = arena.map(8, Prot::R, 8).unwrap();
        assert!(arena.unmap(a));
        let m = arena.mapped();
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].promise.base, b);
        assert_eq!(m[1].promise.base, c);
        assert_eq!(m[0].actual, 0);
        assert_eq!(m[1].actual, 1);
        assert!(arena.unmap(c));
        assert!(arena.unmap(b));
        assert!(arena.actual().is_empty());
    }

    #[test]
    fn write_is_confined_to_one_range() {
        let mut arena = arena();
        let base = arena.map(16, Prot::R | Prot::W, 8).unwrap();
        arena.write(base + 8, &[7; 8]).expect("inside");
        assert_eq!(arena.read(base + 8, 8).unwrap(), vec![7; 8]);
        assert_eq!(
            arena.write(base + 12, &[0; 8]),
            Err(AccessError::OutOfBounds { addr: base + 12, len: 8 })
        );
        assert_eq!(arena.read(1, 4), Err(AccessError::Unmapped(1)));
    }

    #[test]
    fn resume_point_roundtrip() {
        let mut arena = arena();
        assert!(arena.resume_point().is_none());
        arena.set_resume_point(ResumePoint { pc: 0x4200_0000, sp: 0x3fc8_0000 });
        assert_eq!(arena.resume_point().unwrap().pc, 0x4200_0000);
    }
}
