// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use badge_loader::SymbolTable;

use crate::CapabilityProvider;

/// A provider assembled from a fixed list of entries, for subsystems whose
/// entry points live outside this crate.
#[derive(Debug, Clone)]
pub struct StaticCapabilities {
    name: &'static str,
    entries: Vec<(String, usize)>,
}

impl StaticCapabilities {
    /// Empty provider called `name`.
    pub fn new(name: &'static str) -> Self {
        Self { name, entries: Vec::new() }
    }

    /// Adds one entry.
    pub fn with(mut self, symbol: impl Into<String>, addr: usize) -> Self {
        self.entries.push((symbol.into(), addr));
        self
    }
}

impl CapabilityProvider for StaticCapabilities {
    fn name(&self) -> &'static str {
        self.name
    }

    fn export_unwrapped(&self, map: &mut SymbolTable) {
        for (symbol, addr) in &self.entries {
            map.insert(symbol.clone(), *addr);
        }
    }
}
