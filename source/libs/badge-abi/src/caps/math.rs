// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! libm entry points backed by the host floating-point routines.

use std::ops::Rem;

use badge_loader::SymbolTable;

use crate::CapabilityProvider;

macro_rules! libm {
    (
        unary { $($unary:ident: $uty:ty => $umethod:ident),* $(,)? }
        binary { $($binary:ident: $bty:ty => $bmethod:ident),* $(,)? }
    ) => {
        $( extern "C" fn $unary(x: $uty) -> $uty { x.$umethod() } )*
        $( extern "C" fn $binary(x: $bty, y: $bty) -> $bty { x.$bmethod(y) } )*

        fn export_libm(map: &mut SymbolTable) {
            $( map.insert(stringify!($unary), entry_addr!($unary)); )*
            $( map.insert(stringify!($binary), entry_addr!($binary)); )*
        }
    };
}

libm! {
    unary {
        acos: f64 => acos, asin: f64 => asin, atan: f64 => atan,
        cos: f64 => cos, sin: f64 => sin, tan: f64 => tan,
        cosh: f64 => cosh, sinh: f64 => sinh, tanh: f64 => tanh,
        exp: f64 => exp, log: f64 => ln, log10: f64 => log10,
        sqrt: f64 => sqrt, ceil: f64 => ceil, floor: f64 => floor,
        fabs: f64 => abs, round: f64 => round, trunc: f64 => trunc,
        acosf: f32 => acos, asinf: f32 => asin, atanf: f32 => atan,
        cosf: f32 => cos, sinf: f32 => sin, tanf: f32 => tan,
        coshf: f32 => cosh, sinhf: f32 => sinh, tanhf: f32 => tanh,
        expf: f32 => exp, logf: f32 => ln, log10f: f32 => log10,
        sqrtf: f32 => sqrt, ceilf: f32 => ceil, floorf: f32 => floor,
        fabsf: f32 => abs, roundf: f32 => round, truncf: f32 => trunc,
    }
    binary {
        atan2: f64 => atan2, pow: f64 => powf, fmod: f64 => rem,
        hypot: f64 => hypot, fmin: f64 => min, fmax: f64 => max,
        atan2f: f32 => atan2, powf: f32 => powf, fmodf: f32 => rem,
        hypotf: f32 => hypot, fminf: f32 => min, fmaxf: f32 => max,
    }
}

/// Provider for the math subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct MathCapabilities;

impl CapabilityProvider for MathCapabilities {
    fn name(&self) -> &'static str {
        "math"
    }

    fn export_unwrapped(&self, map: &mut SymbolTable) {
        export_libm(map);
    }
}
