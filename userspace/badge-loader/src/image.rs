// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

/// Where one segment landed in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedSegment {
    /// Virtual address the object asked for.
    pub vaddr: u64,
    /// Bytes reserved.
    pub len: u64,
    /// Arena address backing `vaddr`.
    pub base: usize,
}

/// The placed image of one loaded object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedImage {
    base: Option<usize>,
    start: u64,
    segments: Vec<PlacedSegment>,
    entry: Option<usize>,
}

impl LoadedImage {
    pub(crate) fn new(base: Option<usize>, start: u64, segments: Vec<PlacedSegment>) -> Self {
        Self { base, start, segments, entry: None }
    }

    /// Arena address of the single mapping backing the image, if any segment was placed.
    pub fn base(&self) -> Option<usize> {
        self.base
    }

    /// Load offset: arena address minus object address, shared by every segment.
    pub fn offset(&self) -> usize {
        self.base.map(|base| base.wrapping_sub(self.start as usize)).unwrap_or(0)
    }

    pub(crate) fn set_entry(&mut self, entry: usize) {
        self.entry = Some(entry);
    }

    /// Placed segments in declaration order.
    pub fn segments(&self) -> &[PlacedSegment] {
        &self.segments
    }

    /// Translated entry point, set for executables only.
    pub fn entry(&self) -> Option<usize> {
        self.entry
    }

    /// Translates an object virtual address into the arena address holding it.
    pub fn translate(&self, vaddr: u64) -> Option<usize> {
        self.segments.iter().find_map(|seg| {
            let rel = vaddr.checked_sub(seg.vaddr)?;
            if rel >= seg.len {
                return None;
            }
            let rel = usize::try_from(rel).ok()?;
            seg.base.checked_add(rel)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_uses_the_containing_segment() {
        let image = LoadedImage::new(
            Some(0x9000),
            0x1000,
            vec![
                PlacedSegment { vaddr: 0x1000, len: 0x100, base: 0x9000 },
                PlacedSegment { vaddr: 0x2000, len: 0x20, base: 0xa000 },
            ],
        );
        assert_eq!(image.offset(), 0x8000);
        assert_eq!(image.translate(0x1010), Some(0x9010));
        assert_eq!(image.translate(0x201f), Some(0xa01f));
        assert_eq!(image.translate(0x1100), None);
        assert_eq!(image.translate(0x2020), None);
        assert_eq!(image.translate(0x0fff), None);
    }
}
