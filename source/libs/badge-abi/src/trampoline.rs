// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Code-generation strategies for capability call sites.

use crate::ExportError;

/// Decides what address an application sees for a capability.
pub trait CodeGenerator: Send {
    /// Whether calls are routed through the dispatch table.
    fn isolates(&self) -> bool;

    /// Emits a stub that dispatches through table slot `index` and returns its address.
    fn emit(&mut self, index: u32) -> Result<usize, ExportError>;
}

/// No isolation: applications call the raw host address.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectCalls;

impl CodeGenerator for DirectCalls {
    fn isolates(&self) -> bool {
        false
    }

    fn emit(&mut self, index: u32) -> Result<usize, ExportError> {
        Err(ExportError::Trampoline(index))
    }
}

/// Copies a fixed machine-code template per capability and patches the
/// dispatch index into the word that trails it.
pub struct TemplateTrampolines {
    template: Vec<u8>,
    stubs: Vec<Box<[u8]>>,
}

impl TemplateTrampolines {
    /// Uses `template` as the stub body; the index word is appended after it.
    pub fn new(template: impl Into<Vec<u8>>) -> Self {
        Self { template: template.into(), stubs: Vec::new() }
    }

    /// Offset of the patched index word inside every stub.
    pub fn index_offset(&self) -> usize {
        self.template.len()
    }

    /// Bytes of the stub emitted for `index`.
    pub fn stub(&self, index: u32) -> Option<&[u8]> {
        self.stubs.get(index as usize).map(|stub| &stub[..])
    }
}

impl CodeGenerator for TemplateTrampolines {
    fn isolates(&self) -> bool {
        true
    }

    fn emit(&mut self, index: u32) -> Result<usize, ExportError> {
        if index as usize != self.stubs.len() {
            return Err(ExportError::Trampoline(index));
        }
        let mut stub = Vec::with_capacity(self.template.len() + 4);
        stub.extend_from_slice(&self.template);
        stub.extend_from_slice(&index.to_le_bytes());
        let stub = stub.into_boxed_slice();
        let addr = stub.as_ptr() as usize;
        self.stubs.push(stub);
        Ok(addr)
    }
}
