// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use badge_loader::SymbolTable;
use log::{debug, info};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::caps::{ImplicitOps, MathCapabilities, SoftFloat, SystemCapabilities};
use crate::trampoline::{CodeGenerator, DirectCalls};
use crate::{CapabilityProvider, ExportError};

struct WrappedCatalog {
    symbols: SymbolTable,
    dispatch: Vec<usize>,
}

/// Collects every provider's capabilities and produces the catalog that
/// applications link against.
pub struct ExportRegistry {
    providers: Vec<Box<dyn CapabilityProvider>>,
    codegen: Mutex<Box<dyn CodeGenerator>>,
    wrapped: OnceCell<WrappedCatalog>,
}

impl ExportRegistry {
    /// Empty registry using `codegen` for call sites.
    pub fn new(codegen: Box<dyn CodeGenerator>) -> Self {
        Self { providers: Vec::new(), codegen: Mutex::new(codegen), wrapped: OnceCell::new() }
    }

    /// Registry preloaded with the system, math and compiler-support providers.
    pub fn with_builtins(codegen: Box<dyn CodeGenerator>) -> Self {
        Self::new(codegen)
            .with_provider(SystemCapabilities)
            .with_provider(MathCapabilities)
            .with_provider(ImplicitOps)
            .with_provider(SoftFloat)
    }

    /// Adds a provider. Providers registered later win name collisions.
    pub fn with_provider(self, provider: impl CapabilityProvider + 'static) -> Self {
        self.with_boxed_provider(Box::new(provider))
    }

    /// Adds an already boxed provider.
    pub fn with_boxed_provider(mut self, provider: Box<dyn CapabilityProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Names of the registered providers, in registration order.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Inserts every raw capability address into `map`.
    pub fn export_unwrapped(&self, map: &mut SymbolTable) {
        for provider in &self.providers {
            provider.export_unwrapped(map);
        }
    }

    /// Merges the wrapped catalog into `map`, building it on first use.
    /// Entries already in `map` with the same name are replaced.
    pub fn export_wrapped(&self, map: &mut SymbolTable) -> Result<(), ExportError> {
        let catalog = self.catalog()?;
        map.merge(&catalog.symbols);
        Ok(())
    }

    /// Raw addresses indexed by dispatch slot. Empty without isolation.
    pub fn dispatch_table(&self) -> Result<&[usize], ExportError> {
        Ok(&self.catalog()?.dispatch)
    }

    /// Whether the wrapped catalog has been built.
    pub fn is_built(&self) -> bool {
        self.wrapped.get().is_some()
    }

    fn catalog(&self) -> Result<&WrappedCatalog, ExportError> {
        self.wrapped.get_or_try_init(|| self.build())
    }

    fn build(&self) -> Result<WrappedCatalog, ExportError> {
        let mut symbols = SymbolTable::new();
        self.export_unwrapped(&mut symbols);

        let mut codegen = self.codegen.lock();
        let mut dispatch = Vec::new();
        if codegen.isolates() {
            for (name, addr) in symbols.values_mut() {
                let index = u32::try_from(dispatch.len()).map_err(|_| ExportError::TableFull)?;
                let stub = codegen.emit(index)?;
                debug!("abi: {name} -> slot {index}");
                dispatch.push(*addr);
                *addr = stub;
            }
        }
        info!("abi: catalog built with {} capabilities", symbols.len());
        Ok(WrappedCatalog { symbols, dispatch })
    }
}

impl Default for ExportRegistry {
    fn default() -> Self {
        Self::with_builtins(Box::new(DirectCalls))
    }
}
