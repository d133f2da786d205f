// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-process load/link state machine.
//!
//! `Unlinked` accepts any number of library loads and at most one executable.
//! The first [`Linkage::link`] call moves to the terminal link-attempted state,
//! after which only queries and [`Linkage::garbage_collect`] are meaningful.

use std::io::Read;
use std::sync::Arc;

use badge_arena::{Arena, Pid, Prot, SharedArena};
use log::{debug, error, info, warn};

use crate::{CollisionPolicy, Error, LoadedImage, ObjectFile, ObjectParser, PlacedSegment, Segment, SymbolTable};

/// One loaded object, in load order.
pub struct LoadedModule {
    name: String,
    image: LoadedImage,
    needed: Vec<String>,
    object: Option<Box<dyn ObjectFile>>,
}

impl LoadedModule {
    /// File name the module was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placed image.
    pub fn image(&self) -> &LoadedImage {
        &self.image
    }

    /// Declared dependency names.
    pub fn needed(&self) -> &[String] {
        &self.needed
    }

    /// Whether parse metadata is still held for relocation.
    pub fn has_metadata(&self) -> bool {
        self.object.is_some()
    }
}

/// Builds one process image from an executable and its libraries.
pub struct Linkage {
    arena: SharedArena,
    parser: Arc<dyn ObjectParser>,
    symbols: SymbolTable,
    modules: Vec<LoadedModule>,
    entry: Option<usize>,
    policy: CollisionPolicy,
    has_executable: bool,
    link_attempted: bool,
    link_successful: bool,
}

impl Linkage {
    /// Binds a fresh linkage to `arena`.
    pub fn new(arena: SharedArena, parser: Arc<dyn ObjectParser>) -> Self {
        Self {
            arena,
            parser,
            symbols: SymbolTable::new(),
            modules: Vec::new(),
            entry: None,
            policy: CollisionPolicy::default(),
            has_executable: false,
            link_attempted: false,
            link_successful: false,
        }
    }

    /// Selects how exported-name collisions between modules are settled.
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Process the linkage is building.
    pub fn pid(&self) -> Pid {
        self.arena.lock().pid()
    }

    /// Arena the images are placed in.
    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    /// Shared symbol table.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Shared symbol table, for merging host capabilities before linking.
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Loaded modules in load order.
    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    /// Loaded file names in load order.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.name.as_str())
    }

    /// Translated entry point of the executable.
    pub fn entry(&self) -> Option<usize> {
        self.entry
    }

    /// Whether [`Linkage::link`] has been called.
    pub fn link_attempted(&self) -> bool {
        self.link_attempted
    }

    /// An executable is loaded and linked.
    pub fn is_ready_as_program(&self) -> bool {
        self.has_executable && self.link_successful
    }

    /// Linked without an executable.
    pub fn is_ready_as_library(&self) -> bool {
        !self.has_executable && self.link_successful
    }

    /// Loads a library read from `handle`.
    pub fn load_library(&mut self, name: &str, handle: &mut dyn Read) -> Result<(), Error> {
        self.load(name, handle, false)
    }

    /// Loads the executable read from `handle` and records its entry point.
    pub fn load_executable(&mut self, name: &str, handle: &mut dyn Read) -> Result<(), Error> {
        if self.link_attempted {
            return Err(Error::LinkAttempted);
        }
        if self.has_executable {
            return Err(Error::ExecutableLoaded);
        }
        self.load(name, handle, true)?;
        self.has_executable = true;
        self.entry = self.modules.last().and_then(|m| m.image.entry());
        Ok(())
    }

    fn load(&mut self, name: &str, handle: &mut dyn Read, executable: bool) -> Result<(), Error> {
        if self.link_attempted {
            return Err(Error::LinkAttempted);
        }
        let mut bytes = Vec::new();
        handle.read_to_end(&mut bytes)?;
        let object = self.parser.parse(name, &bytes)?;

        let mut arena = self.arena.lock();
        let mut image = place_segments(&mut arena, object.segments())?;
        let staged = match stage_module(&image, object.as_ref(), executable) {
            Ok(staged) => staged,
            Err(err) => {
                release(&mut arena, &image);
                return Err(err);
            }
        };
        drop(arena);

        if let Some(entry) = staged.entry {
            image.set_entry(entry);
        }
        for (sym, addr) in staged.exports {
            if let Some(prev) = self.symbols.insert_with(sym.as_str(), addr, self.policy) {
                if prev != addr {
                    warn!("loader: {name}: symbol `{sym}` already defined at {prev:#x} ({:?})", self.policy);
                }
            }
        }
        let base = image.base().unwrap_or(0);
        let offset = image.offset();
        info!("loader: {name} loaded to {base:#010x} (offset {offset:#010x})");

        self.modules.push(LoadedModule {
            name: name.to_string(),
            needed: object.needed().to_vec(),
            image,
            object: Some(object),
        });
        Ok(())
    }

    /// Relocates every loaded image, in load order, against the shared symbol table.
    ///
    /// Only the first call does any work; later calls report the cached outcome.
    pub fn link(&mut self) -> Result<(), Error> {
        if self.link_attempted {
            return if self.link_successful { Ok(()) } else { Err(Error::LinkFailed) };
        }
        self.link_attempted = true;

        let mut arena = self.arena.lock();
        let total = self.modules.len();
        for (index, module) in self.modules.iter().enumerate() {
            debug!("loader: applying relocations {}/{}", index + 1, total);
            let Some(object) = module.object.as_ref() else {
                return Err(Error::LinkFailed);
            };
            if let Err(err) = object.relocate(&module.image, &self.symbols, &mut arena) {
                error!("loader: dynamic linking failed in {}: {err}", module.name);
                return Err(err);
            }
        }

        self.link_successful = true;
        Ok(())
    }

    /// Drops per-file parse metadata once linking has been attempted.
    pub fn garbage_collect(&mut self) {
        if self.link_attempted {
            for module in &mut self.modules {
                module.object = None;
            }
        }
    }
}

struct StagedModule {
    entry: Option<usize>,
    exports: Vec<(String, usize)>,
}

fn stage_module(image: &LoadedImage, object: &dyn ObjectFile, executable: bool) -> Result<StagedModule, Error> {
    let entry = if executable {
        let vaddr = object.entry().ok_or(Error::MissingEntry)?;
        Some(image.translate(vaddr).ok_or(Error::MissingEntry)?)
    } else {
        None
    };
    let mut exports = Vec::with_capacity(object.exports().len());
    for export in object.exports() {
        let addr = if export.absolute {
            usize::try_from(export.value).map_err(|_| Error::InvalidObject("absolute symbol out of range"))?
        } else {
            image.translate(export.value).ok_or(Error::InvalidObject("export outside loaded segments"))?
        };
        exports.push((export.name.clone(), addr));
    }
    Ok(StagedModule { entry, exports })
}

/// Maps one span covering every segment and copies the file bytes in.
///
/// Segments keep their distance from each other; only the whole image moves.
/// The span starts at the lowest address rounded down to the largest segment
/// alignment, so every segment stays congruent to its vaddr modulo that alignment.
fn place_segments(arena: &mut Arena, segments: &[Segment]) -> Result<LoadedImage, Error> {
    let mut low = u64::MAX;
    let mut high = 0u64;
    let mut align = 1u64;
    for seg in segments.iter().filter(|seg| seg.mem_size > 0) {
        if seg.data.len() as u64 > seg.mem_size {
            return Err(Error::InvalidObject("file bytes exceed segment size"));
        }
        let end = seg.vaddr.checked_add(seg.mem_size).ok_or(Error::InvalidObject("segment wraps"))?;
        low = low.min(seg.vaddr);
        high = high.max(end);
        align = align.max(seg.align);
    }
    if low > high {
        return Ok(LoadedImage::default());
    }

    let align = usize::try_from(align).map_err(|_| Error::InvalidObject("segment alignment"))?;
    if !align.is_power_of_two() {
        return Err(Error::InvalidObject("segment alignment"));
    }
    let start = low & !(align as u64 - 1);
    let span = usize::try_from(high - start).map_err(|_| Error::InvalidObject("image too large"))?;
    let prot = segments.iter().fold(Prot::R | Prot::W, |prot, seg| prot | seg.prot);
    // Populated and relocated in place, so the loader always needs write access.
    let base = arena.map(span, prot, align)?;

    let mut placed = Vec::with_capacity(segments.len());
    for seg in segments.iter().filter(|seg| seg.mem_size > 0) {
        // In range: vaddr - start < span, and span fit in usize.
        let at = base + (seg.vaddr - start) as usize;
        if let Err(err) = arena.write(at, &seg.data) {
            arena.unmap(base);
            return Err(err.into());
        }
        placed.push(PlacedSegment { vaddr: seg.vaddr, len: seg.mem_size, base: at });
    }
    Ok(LoadedImage::new(Some(base), start, placed))
}

fn release(arena: &mut Arena, image: &LoadedImage) {
    if let Some(base) = image.base() {
        arena.unmap(base);
    }
}
