// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! goblin-backed ELF parser and RISC-V dynamic relocation engine.

use badge_arena::{Arena, Prot};
use goblin::elf::{
    header,
    program_header::{ProgramHeader, PF_R, PF_W, PF_X, PT_LOAD},
    reloc::Reloc,
    section_header::{SHN_ABS, SHN_UNDEF},
    sym::{STB_GLOBAL, STB_WEAK},
    Elf,
};
use log::debug;

use crate::{Error, Export, LoadedImage, ObjectFile, ObjectParser, Segment, SymbolTable};

const ELF32_HEADER_SIZE: usize = 52;

const R_RISCV_NONE: u32 = 0;
const R_RISCV_32: u32 = 1;
const R_RISCV_64: u32 = 2;
const R_RISCV_RELATIVE: u32 = 3;
const R_RISCV_JUMP_SLOT: u32 = 5;

/// Parses little-endian RISC-V ELF objects (32- or 64-bit).
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfParser;

impl ObjectParser for ElfParser {
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn ObjectFile>, Error> {
        let object = ElfObject::parse(bytes)?;
        debug!(
            "loader: {name}: {} segments, {} needed, {} exports, {} relocations",
            object.segments.len(),
            object.needed.len(),
            object.exports.len(),
            object.relocs.len()
        );
        Ok(Box::new(object))
    }
}

#[derive(Debug, Clone)]
struct RelocSymbol {
    name: String,
    local: Option<u64>,
    weak: bool,
}

#[derive(Debug, Clone)]
struct Relocation {
    offset: u64,
    kind: u32,
    addend: i64,
    symbol: Option<RelocSymbol>,
}

/// Owned view of an ELF object: everything the orchestrator and relocation need.
#[derive(Debug, Clone)]
pub struct ElfObject {
    is_64: bool,
    segments: Vec<Segment>,
    needed: Vec<String>,
    exports: Vec<Export>,
    entry: Option<u64>,
    relocs: Vec<Relocation>,
}

impl ElfObject {
    /// Parses `bytes`, copying out segments, dynamic names, symbols and relocations.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < header::SELFMAG || &bytes[..header::SELFMAG] != header::ELFMAG {
            return Err(Error::InvalidObject("bad magic"));
        }
        if bytes.len() < ELF32_HEADER_SIZE {
            return Err(Error::Truncated);
        }
        let elf = Elf::parse(bytes).map_err(|_| Error::InvalidObject("parse error"))?;

        if elf.header.e_ident[header::EI_DATA] != header::ELFDATA2LSB {
            return Err(Error::Unsupported("not little endian"));
        }
        if elf.header.e_machine != header::EM_RISCV {
            return Err(Error::Unsupported("unexpected machine"));
        }
        if elf.header.e_type != header::ET_DYN && elf.header.e_type != header::ET_EXEC {
            return Err(Error::Unsupported("not an executable or shared object"));
        }

        let segments = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD)
            .map(|ph| segment_from_program(ph, bytes))
            .collect::<Result<Vec<_>, _>>()?;
        if segments.is_empty() {
            return Err(Error::Unsupported("no PT_LOAD segments"));
        }

        let needed = elf.libraries.iter().map(|lib| lib.to_string()).collect();

        let mut exports = Vec::new();
        for sym in elf.dynsyms.iter() {
            let bind = sym.st_bind();
            if sym.st_shndx == SHN_UNDEF as usize || sym.st_name == 0 {
                continue;
            }
            if bind != STB_GLOBAL && bind != STB_WEAK {
                continue;
            }
            let name = elf.dynstrtab.get_at(sym.st_name).ok_or(Error::InvalidObject("symbol name"))?;
            exports.push(Export {
                name: name.to_string(),
                value: sym.st_value,
                absolute: sym.st_shndx == SHN_ABS as usize,
            });
        }

        let mut relocs = Vec::new();
        for reloc in elf.dynrelas.iter().chain(elf.dynrels.iter()).chain(elf.pltrelocs.iter()) {
            relocs.push(relocation_from(&elf, &reloc)?);
        }

        Ok(Self {
            is_64: elf.is_64,
            segments,
            needed,
            exports,
            entry: (elf.entry != 0).then_some(elf.entry),
            relocs,
        })
    }

    fn word_size(&self) -> usize {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    fn symbol_value(&self, symbol: Option<&RelocSymbol>, image: &LoadedImage, symbols: &SymbolTable) -> Result<u64, Error> {
        let Some(symbol) = symbol else {
            return Ok(0);
        };
        if let Some(addr) = symbols.get(&symbol.name) {
            return Ok(addr as u64);
        }
        if let Some(vaddr) = symbol.local {
            return image
                .translate(vaddr)
                .map(|addr| addr as u64)
                .ok_or(Error::InvalidObject("local symbol outside loaded segments"));
        }
        if symbol.weak {
            return Ok(0);
        }
        Err(Error::UnresolvedSymbol(symbol.name.clone()))
    }
}

fn segment_from_program(ph: &ProgramHeader, bytes: &[u8]) -> Result<Segment, Error> {
    if ph.p_filesz > ph.p_memsz {
        return Err(Error::InvalidObject("filesz larger than memsz"));
    }
    let start = usize::try_from(ph.p_offset).map_err(|_| Error::Truncated)?;
    let len = usize::try_from(ph.p_filesz).map_err(|_| Error::Truncated)?;
    let end = start.checked_add(len).ok_or(Error::Truncated)?;
    let data = bytes.get(start..end).ok_or(Error::Truncated)?.to_vec();

    let mut prot = Prot::empty();
    if ph.p_flags & PF_R != 0 {
        prot |= Prot::R;
    }
    if ph.p_flags & PF_W != 0 {
        prot |= Prot::W;
    }
    if ph.p_flags & PF_X != 0 {
        prot |= Prot::X;
    }

    Ok(Segment { vaddr: ph.p_vaddr, mem_size: ph.p_memsz, align: ph.p_align, data, prot })
}

fn relocation_from(elf: &Elf<'_>, reloc: &Reloc) -> Result<Relocation, Error> {
    let symbol = if reloc.r_sym == 0 {
        None
    } else {
        let sym = elf.dynsyms.get(reloc.r_sym).ok_or(Error::InvalidObject("relocation symbol index"))?;
        let name = elf.dynstrtab.get_at(sym.st_name).ok_or(Error::InvalidObject("symbol name"))?;
        let local = (sym.st_shndx != SHN_UNDEF as usize).then_some(sym.st_value);
        Some(RelocSymbol { name: name.to_string(), local, weak: sym.st_bind() == STB_WEAK })
    };
    Ok(Relocation { offset: reloc.r_offset, kind: reloc.r_type, addend: reloc.r_addend.unwrap_or(0), symbol })
}

impl ObjectFile for ElfObject {
    fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn needed(&self) -> &[String] {
        &self.needed
    }

    fn exports(&self) -> &[Export] {
        &self.exports
    }

    fn entry(&self) -> Option<u64> {
        self.entry
    }

    fn relocate(&self, image: &LoadedImage, symbols: &SymbolTable, arena: &mut Arena) -> Result<(), Error> {
        for reloc in &self.relocs {
            let (value, width) = match reloc.kind {
                R_RISCV_NONE => continue,
                R_RISCV_RELATIVE => {
                    let target = image
                        .translate(reloc.addend as u64)
                        .ok_or(Error::InvalidObject("relative addend outside loaded segments"))?;
                    (target as u64, self.word_size())
                }
                R_RISCV_32 => {
                    let sym = self.symbol_value(reloc.symbol.as_ref(), image, symbols)?;
                    (sym.wrapping_add(reloc.addend as u64), 4)
                }
                R_RISCV_64 => {
                    let sym = self.symbol_value(reloc.symbol.as_ref(), image, symbols)?;
                    (sym.wrapping_add(reloc.addend as u64), 8)
                }
                R_RISCV_JUMP_SLOT => (self.symbol_value(reloc.symbol.as_ref(), image, symbols)?, self.word_size()),
                other => return Err(Error::UnsupportedRelocation(other)),
            };
            let place = image
                .translate(reloc.offset)
                .ok_or(Error::InvalidObject("relocation target outside loaded segments"))?;
            arena.write(place, &value.to_le_bytes()[..width])?;
        }
        Ok(())
    }
}
