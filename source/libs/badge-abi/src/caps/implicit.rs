// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compiler-support routines that RV32 code calls implicitly for
//! multiplication, division and floating-point arithmetic.

use core::cmp::Ordering;

use badge_loader::SymbolTable;

use crate::CapabilityProvider;

macro_rules! export {
    ($map:expr, $($name:ident),* $(,)?) => {
        $( $map.insert(stringify!($name), entry_addr!($name)); )*
    };
}

/// Integer multiply, divide and remainder helpers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImplicitOps;

impl CapabilityProvider for ImplicitOps {
    fn name(&self) -> &'static str {
        "implicitops"
    }

    fn export_unwrapped(&self, map: &mut SymbolTable) {
        export!(
            map, __mulsi3, __divsi3, __udivsi3, __modsi3, __umodsi3, __muldi3, __divdi3, __udivdi3, __moddi3,
            __umoddi3,
        );
    }
}

// Division by zero yields 0 instead of trapping the host.
macro_rules! int_ops {
    ($($name:ident($ty:ty) => $op:ident;)*) => {
        $(
            extern "C" fn $name(a: $ty, b: $ty) -> $ty {
                int_ops!(@apply $op, a, b)
            }
        )*
    };
    (@apply mul, $a:ident, $b:ident) => { $a.wrapping_mul($b) };
    (@apply div, $a:ident, $b:ident) => { if $b == 0 { 0 } else { $a.wrapping_div($b) } };
    (@apply rem, $a:ident, $b:ident) => { if $b == 0 { 0 } else { $a.wrapping_rem($b) } };
}

int_ops! {
    __mulsi3(i32) => mul;
    __divsi3(i32) => div;
    __udivsi3(u32) => div;
    __modsi3(i32) => rem;
    __umodsi3(u32) => rem;
    __muldi3(i64) => mul;
    __divdi3(i64) => div;
    __udivdi3(u64) => div;
    __moddi3(i64) => rem;
    __umoddi3(u64) => rem;
}

/// Single and double precision soft-float helpers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftFloat;

impl CapabilityProvider for SoftFloat {
    fn name(&self) -> &'static str {
        "softfloat"
    }

    fn export_unwrapped(&self, map: &mut SymbolTable) {
        export!(
            map, __addsf3, __subsf3, __mulsf3, __divsf3, __negsf2, __adddf3, __subdf3, __muldf3, __divdf3,
            __negdf2, __extendsfdf2, __truncdfsf2, __fixsfsi, __fixsfdi, __fixunssfsi, __fixdfsi, __fixdfdi,
            __fixunsdfsi, __floatsisf, __floatdisf, __floatunsisf, __floatsidf, __floatdidf, __floatunsidf,
            __eqsf2, __nesf2, __ltsf2, __lesf2, __gtsf2, __gesf2, __unordsf2, __eqdf2, __nedf2, __ltdf2,
            __ledf2, __gtdf2, __gedf2, __unorddf2,
        );
    }
}

macro_rules! float_ops {
    ($($name:ident($ty:ty) => $op:tt;)*) => {
        $( extern "C" fn $name(a: $ty, b: $ty) -> $ty { a $op b } )*
    };
}

float_ops! {
    __addsf3(f32) => +;
    __subsf3(f32) => -;
    __mulsf3(f32) => *;
    __divsf3(f32) => /;
    __adddf3(f64) => +;
    __subdf3(f64) => -;
    __muldf3(f64) => *;
    __divdf3(f64) => /;
}

macro_rules! conversions {
    ($($name:ident($from:ty) -> $to:ty;)*) => {
        $( extern "C" fn $name(a: $from) -> $to { a as $to } )*
    };
}

conversions! {
    __extendsfdf2(f32) -> f64;
    __truncdfsf2(f64) -> f32;
    __fixsfsi(f32) -> i32;
    __fixsfdi(f32) -> i64;
    __fixunssfsi(f32) -> u32;
    __fixdfsi(f64) -> i32;
    __fixdfdi(f64) -> i64;
    __fixunsdfsi(f64) -> u32;
    __floatsisf(i32) -> f32;
    __floatdisf(i64) -> f32;
    __floatunsisf(u32) -> f32;
    __floatsidf(i32) -> f64;
    __floatdidf(i64) -> f64;
    __floatunsidf(u32) -> f64;
}

extern "C" fn __negsf2(a: f32) -> f32 {
    -a
}

extern "C" fn __negdf2(a: f64) -> f64 {
    -a
}

/// Three-way compare; unordered operands report `unordered`.
fn compare<T: PartialOrd>(a: T, b: T, unordered: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
        None => unordered,
    }
}

macro_rules! comparisons {
    ($($name:ident($ty:ty) => $unordered:expr;)*) => {
        $( extern "C" fn $name(a: $ty, b: $ty) -> i32 { compare(a, b, $unordered) } )*
    };
}

comparisons! {
    __eqsf2(f32) => 1;
    __nesf2(f32) => 1;
    __ltsf2(f32) => 1;
    __lesf2(f32) => 1;
    __gtsf2(f32) => -1;
    __gesf2(f32) => -1;
    __eqdf2(f64) => 1;
    __nedf2(f64) => 1;
    __ltdf2(f64) => 1;
    __ledf2(f64) => 1;
    __gtdf2(f64) => -1;
    __gedf2(f64) => -1;
}

extern "C" fn __unordsf2(a: f32, b: f32) -> i32 {
    i32::from(a.is_nan() || b.is_nan())
}

extern "C" fn __unorddf2(a: f64, b: f64) -> i32 {
    i32::from(a.is_nan() || b.is_nan())
}
