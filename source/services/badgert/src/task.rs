// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Application tasks: creation, entry and the single teardown path.

use std::io;
use std::sync::Arc;

use badge_abi::{AbiContext, ExecUnit, Resume};
use badge_arena::{Pid, ResumePoint};
use badge_loader::Linkage;
use log::info;

use crate::ProcessTable;

/// Smallest stack a host thread is given, whatever the configured size.
pub const MIN_HOST_STACK: usize = 256 * 1024;

/// Why a process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The entry function returned.
    Returned(i32),
    /// The program called its exit primitive, landing on the resume point.
    Exited(i32),
}

impl ExitReason {
    /// Exit status regardless of path.
    pub fn code(self) -> i32 {
        match self {
            Self::Returned(code) | Self::Exited(code) => code,
        }
    }
}

/// Invoked once a process has been torn down.
pub struct ExitHook(Box<dyn FnOnce(Pid, ExitReason) + Send>);

impl ExitHook {
    /// Wraps a callback.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce(Pid, ExitReason) + Send + 'static,
    {
        Self(Box::new(func))
    }

    fn call(self, pid: Pid, reason: ExitReason) {
        (self.0)(pid, reason);
    }
}

/// Entry parameters of a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Translated entry address.
    pub entry: usize,
    /// Argument vector.
    pub argv: Vec<String>,
    /// Environment.
    pub envp: Vec<String>,
}

/// Transfers control into application code.
pub trait Executor: Send + Sync {
    /// Resume point the program's exit primitive must jump to.
    fn resume_point(&self, ctx: &AbiContext) -> ResumePoint;

    /// Runs `program` and yields the entry function's return value.
    ///
    /// Also returns once `_exit` has landed on the resume point; the exit
    /// code recorded on `ctx` then takes precedence.
    fn execute(&self, ctx: &AbiContext, program: &Program) -> i32;

    /// Transfers control to `point` on behalf of `_exit`.
    ///
    /// Real targets restore `pc`/`sp` and never come back. Hosts may return,
    /// in which case `execute` must unwind on its own.
    fn resume(&self, ctx: &AbiContext, point: ResumePoint, code: i32);
}

/// Lets `_exit` reach the executor that entered the program.
pub(crate) struct ExecutorResume(pub(crate) Arc<dyn Executor>);

impl Resume for ExecutorResume {
    fn resume(&self, ctx: &AbiContext, point: ResumePoint, code: i32) {
        self.0.resume(ctx, point, code);
    }
}

/// Body of a task.
pub type TaskBody = Box<dyn FnOnce() + Send>;

/// Creates scheduled tasks.
pub trait TaskSpawner: Send + Sync {
    /// Starts `body` on a new task. On error `body` has been dropped.
    fn spawn(&self, name: String, stack_bytes: usize, body: TaskBody) -> io::Result<()>;

    /// Execution unit the next task will run on.
    ///
    /// Spawners scheduling onto fixed cores hand out that core's unit.
    fn exec_unit(&self) -> Arc<ExecUnit> {
        Arc::new(ExecUnit::new())
    }
}

/// One OS thread per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, name: String, stack_bytes: usize, body: TaskBody) -> io::Result<()> {
        std::thread::Builder::new().name(name).stack_size(stack_bytes.max(MIN_HOST_STACK)).spawn(body)?;
        Ok(())
    }
}

/// Everything a task owns for the lifetime of its process.
pub(crate) struct Task {
    pub(crate) ctx: AbiContext,
    pub(crate) linkage: Linkage,
    pub(crate) program: Program,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) processes: Arc<ProcessTable>,
    pub(crate) exit_hook: Option<ExitHook>,
}

impl Task {
    pub(crate) fn run(self) {
        let Task { ctx, linkage, program, executor, processes, exit_hook } = self;
        let pid = ctx.pid();

        ctx.enter();
        ctx.set_resume_point(executor.resume_point(&ctx));
        let ret = executor.execute(&ctx, &program);
        let reason = match ctx.exit_code() {
            Some(code) => ExitReason::Exited(code),
            None => ExitReason::Returned(ret),
        };

        // Both exit paths end here.
        ctx.unit().deactivate();
        drop(ctx);
        drop(linkage);
        processes.remove(pid);
        info!("badgert: process {pid} exited with code {}", reason.code());
        if let Some(hook) = exit_hook {
            hook.call(pid, reason);
        }
    }
}
