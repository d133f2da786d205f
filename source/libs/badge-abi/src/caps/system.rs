// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scheduling, timing and memory capabilities. Every entry point that acts
//! for a process receives the caller's [`AbiContext`] first.

#![allow(improper_ctypes_definitions)]

use std::time::{Duration, Instant};

use badge_arena::Prot;
use badge_loader::SymbolTable;
use log::{error, warn};
use once_cell::sync::Lazy;

use crate::{AbiContext, CapabilityProvider};

static BOOT: Lazy<Instant> = Lazy::new(Instant::now);

/// Names exported by [`SystemCapabilities`].
pub const SYSTEM_CAPABILITIES: &[&str] = &[
    "yield",
    "sched_yield",
    "delay_ms",
    "delay_us",
    "usleep",
    "uptime_ms",
    "uptime_us",
    "__mem_map",
    "__mem_unmap",
    "abort",
    "_exit",
];

/// Provider for the system subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCapabilities;

impl CapabilityProvider for SystemCapabilities {
    fn name(&self) -> &'static str {
        "system"
    }

    fn export_unwrapped(&self, map: &mut SymbolTable) {
        Lazy::force(&BOOT);
        map.insert("yield", entry_addr!(abi_yield));
        map.insert("sched_yield", entry_addr!(abi_sched_yield));
        map.insert("delay_ms", entry_addr!(abi_delay_ms));
        map.insert("delay_us", entry_addr!(abi_delay_us));
        map.insert("usleep", entry_addr!(abi_usleep));
        map.insert("uptime_ms", entry_addr!(abi_uptime_ms));
        map.insert("uptime_us", entry_addr!(abi_uptime_us));
        map.insert("__mem_map", entry_addr!(abi_mem_map));
        map.insert("__mem_unmap", entry_addr!(abi_mem_unmap));
        map.insert("abort", entry_addr!(abi_abort));
        map.insert("_exit", entry_addr!(abi_exit));
    }
}

pub(crate) extern "C" fn abi_yield(ctx: &AbiContext) {
    ctx.yield_now();
}

pub(crate) extern "C" fn abi_sched_yield(ctx: &AbiContext) -> i32 {
    ctx.yield_now();
    0
}

pub(crate) extern "C" fn abi_delay_ms(ctx: &AbiContext, millis: i64) {
    if let Ok(millis) = u64::try_from(millis) {
        ctx.sleep(Duration::from_millis(millis));
    }
}

/// Busy-waits; the process never leaves its execution unit.
pub(crate) extern "C" fn abi_delay_us(_ctx: &AbiContext, micros: i64) {
    let Ok(micros) = u64::try_from(micros) else { return };
    let deadline = Instant::now() + Duration::from_micros(micros);
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

pub(crate) extern "C" fn abi_usleep(ctx: &AbiContext, micros: u32) -> i32 {
    ctx.sleep(Duration::from_micros(u64::from(micros)));
    0
}

pub(crate) extern "C" fn abi_uptime_ms() -> i64 {
    i64::try_from(BOOT.elapsed().as_millis()).unwrap_or(i64::MAX)
}

pub(crate) extern "C" fn abi_uptime_us() -> i64 {
    i64::try_from(BOOT.elapsed().as_micros()).unwrap_or(i64::MAX)
}

/// Returns the mapped base, or 0 on failure.
pub(crate) extern "C" fn abi_mem_map(ctx: &AbiContext, length: usize, min_align: usize, executable: bool) -> usize {
    let mut prot = Prot::R | Prot::W;
    if executable {
        prot |= Prot::X;
    }
    match ctx.arena().lock().map(length, prot, min_align) {
        Ok(base) => base,
        Err(err) => {
            warn!("abi: pid {} mem_map({length}, {min_align}) failed: {err}", ctx.pid());
            0
        }
    }
}

pub(crate) extern "C" fn abi_mem_unmap(ctx: &AbiContext, base: usize) {
    if !ctx.arena().lock().unmap(base) {
        warn!("abi: pid {} mem_unmap({base:#x}) of unknown range", ctx.pid());
    }
}

/// Continues at the caller's resume point; see [`AbiContext::exit`].
pub(crate) extern "C" fn abi_exit(ctx: &AbiContext, code: i32) {
    ctx.exit(code);
}

pub(crate) extern "C" fn abi_abort() -> ! {
    error!("abi: application aborted");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecUnit, Resume, Suspend};
    use badge_arena::{Arena, HeapAllocator, Pid, ResumePoint};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Binds a different process while "suspended", like a real scheduler would.
    struct Interloper {
        unit: Arc<ExecUnit>,
        calls: AtomicUsize,
    }

    impl Suspend for Interloper {
        fn yield_now(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.unit.activate(Pid::new(99));
        }

        fn sleep(&self, _duration: Duration) {
            self.yield_now();
        }
    }

    fn context() -> (AbiContext, Arc<Interloper>) {
        let unit = Arc::new(ExecUnit::new());
        let suspend = Arc::new(Interloper { unit: unit.clone(), calls: AtomicUsize::new(0) });
        let arena = Arena::new(Pid::new(3), Box::new(HeapAllocator::new())).into_shared();
        (AbiContext::new(Pid::new(3), arena, unit, suspend.clone()), suspend)
    }

    #[test]
    fn yield_and_delay_restore_the_active_process() {
        let (ctx, suspend) = context();
        ctx.enter();
        abi_yield(&ctx);
        assert_eq!(ctx.unit().active(), Some(Pid::new(3)));
        abi_delay_ms(&ctx, 5);
        assert_eq!(ctx.unit().active(), Some(Pid::new(3)));
        assert_eq!(abi_usleep(&ctx, 10), 0);
        assert_eq!(suspend.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn negative_delay_does_not_suspend() {
        let (ctx, suspend) = context();
        abi_delay_ms(&ctx, -1);
        abi_delay_us(&ctx, -1);
        assert_eq!(suspend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mem_map_goes_through_the_process_arena() {
        let (ctx, _) = context();
        let base = abi_mem_map(&ctx, 100, 64, false);
        assert_ne!(base, 0);
        assert_eq!(base % 64, 0);
        assert_eq!(ctx.arena().lock().mapped().len(), 1);
        abi_mem_unmap(&ctx, base);
        assert!(ctx.arena().lock().mapped().is_empty());
        assert_eq!(abi_mem_map(&ctx, 0, 0, false), 0);
    }

    #[derive(Default)]
    struct RecordingResume {
        jumps: Mutex<Vec<(Pid, ResumePoint, i32)>>,
    }

    impl Resume for RecordingResume {
        fn resume(&self, ctx: &AbiContext, point: ResumePoint, code: i32) {
            self.jumps.lock().push((ctx.pid(), point, code));
        }
    }

    #[test]
    fn exit_continues_at_the_recorded_resume_point() {
        let (ctx, _) = context();
        let resume = Arc::new(RecordingResume::default());
        let ctx = ctx.with_resume(resume.clone());
        let point = ResumePoint { pc: 0x4000_0100, sp: 0x3fff_f000 };
        ctx.set_resume_point(point);

        abi_exit(&ctx, 5);
        abi_exit(&ctx.clone(), 9);

        assert_eq!(ctx.exit_code(), Some(5), "first exit code sticks");
        assert_eq!(*resume.jumps.lock(), [(Pid::new(3), point, 5), (Pid::new(3), point, 5)]);
    }

    #[test]
    fn exit_is_exported_at_its_entry_point() {
        let mut map = SymbolTable::new();
        SystemCapabilities.export_unwrapped(&mut map);
        assert_eq!(map.get("_exit"), Some(entry_addr!(abi_exit)));
    }

    #[test]
    fn exit_without_resume_point_only_records_the_code() {
        let (ctx, _) = context();
        let resume = Arc::new(RecordingResume::default());
        let ctx = ctx.with_resume(resume.clone());
        abi_exit(&ctx, 2);
        assert_eq!(ctx.exit_code(), Some(2));
        assert!(resume.jumps.lock().is_empty());
    }

    #[test]
    fn uptime_is_monotonic() {
        let a = abi_uptime_us();
        let b = abi_uptime_us();
        assert!(b >= a);
        assert!(abi_uptime_ms() >= 0);
    }
}
