// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Built-in capability providers.

/// Address of a host entry point as stored in a symbol table.
macro_rules! entry_addr {
    ($f:expr) => {
        $f as *const () as usize
    };
}

mod implicit;
mod math;
mod system;
mod table;

pub use implicit::{ImplicitOps, SoftFloat};
pub use math::MathCapabilities;
pub use system::{SystemCapabilities, SYSTEM_CAPABILITIES};
pub use table::StaticCapabilities;
