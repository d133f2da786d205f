// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Calling context handed to every capability invocation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use badge_arena::{Pid, ResumePoint, SharedArena};
use log::warn;
use parking_lot::Mutex;

/// Suspension primitive of the host scheduler.
pub trait Suspend: Send + Sync {
    /// Gives up the remainder of the current time slice.
    fn yield_now(&self);
    /// Blocks for at least `duration`.
    fn sleep(&self, duration: Duration);
}

/// Suspends by parking the calling OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSuspend;

impl Suspend for ThreadSuspend {
    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Transfers control back to a process's resume point.
pub trait Resume: Send + Sync {
    /// Continues at `point` with `code` as the program's exit status.
    ///
    /// Targets that switch stacks never return from this call. Hosts that
    /// cannot do so return once the executor has been told to unwind.
    fn resume(&self, ctx: &AbiContext, point: ResumePoint, code: i32);
}

/// One execution unit and the process currently bound to it.
#[derive(Debug, Default)]
pub struct ExecUnit {
    active: AtomicU32,
}

impl ExecUnit {
    /// Creates an unit with no process bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `pid` as the active process.
    pub fn activate(&self, pid: Pid) {
        self.active.store(pid.raw(), Ordering::Release);
    }

    /// Clears the binding.
    pub fn deactivate(&self) {
        self.active.store(0, Ordering::Release);
    }

    /// Currently bound process, if any.
    pub fn active(&self) -> Option<Pid> {
        match self.active.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Pid::new(raw)),
        }
    }
}

/// The process identity a capability acts on behalf of.
#[derive(Clone)]
pub struct AbiContext {
    pid: Pid,
    arena: SharedArena,
    unit: Arc<ExecUnit>,
    suspend: Arc<dyn Suspend>,
    resume: Option<Arc<dyn Resume>>,
    exit_code: Arc<Mutex<Option<i32>>>,
}

impl AbiContext {
    /// Builds a context for `pid` running on `unit`.
    pub fn new(pid: Pid, arena: SharedArena, unit: Arc<ExecUnit>, suspend: Arc<dyn Suspend>) -> Self {
        Self { pid, arena, unit, suspend, resume: None, exit_code: Arc::new(Mutex::new(None)) }
    }

    /// Routes [`AbiContext::exit`] through `resume`.
    pub fn with_resume(mut self, resume: Arc<dyn Resume>) -> Self {
        self.resume = Some(resume);
        self
    }

    /// Process identity.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The process memory arena.
    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    /// The execution unit this context runs on.
    pub fn unit(&self) -> &Arc<ExecUnit> {
        &self.unit
    }

    /// Binds this process to its execution unit.
    pub fn enter(&self) {
        self.unit.activate(self.pid);
    }

    /// Yields, then re-establishes this process as active.
    pub fn yield_now(&self) {
        self.suspend.yield_now();
        self.enter();
    }

    /// Sleeps, then re-establishes this process as active.
    pub fn sleep(&self, duration: Duration) {
        self.suspend.sleep(duration);
        self.enter();
    }

    /// Records where execution resumes.
    pub fn set_resume_point(&self, point: ResumePoint) {
        self.arena.lock().set_resume_point(point);
    }

    /// Last recorded resume point.
    pub fn resume_point(&self) -> Option<ResumePoint> {
        self.arena.lock().resume_point()
    }

    /// Ends the program with `code` by continuing at the recorded resume point.
    ///
    /// The first exit code sticks; later calls only repeat the transfer.
    pub fn exit(&self, code: i32) {
        let code = *self.exit_code.lock().get_or_insert(code);
        match (self.resume_point(), self.resume.as_ref()) {
            (Some(point), Some(resume)) => resume.resume(self, point, code),
            (None, _) => warn!("abi: pid {} exited with {code} before a resume point was recorded", self.pid),
            (Some(_), None) => warn!("abi: pid {} exited with {code} but nothing can resume it", self.pid),
        }
    }

    /// Exit code passed to [`AbiContext::exit`], shared by every clone of this context.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }
}

impl core::fmt::Debug for AbiContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AbiContext").field("pid", &self.pid).finish_non_exhaustive()
    }
}
