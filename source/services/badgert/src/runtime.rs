// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime state object and launch protocol.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use badge_abi::{
    AbiContext, CapabilityProvider, CodeGenerator, DirectCalls, ExportRegistry, Suspend, ThreadSuspend,
};
use badge_arena::{Arena, HeapAllocator, Pid, RawAllocator};
use badge_loader::{ElfParser, Linkage, ObjectParser};
use log::{error, info};
use parking_lot::Mutex;

use crate::config::{ConfigError, Isolation, RuntimeConfig};
use crate::resolve::resolve_dependencies;
use crate::task::{ExecutorResume, ExitHook, Executor, Program, Task, TaskSpawner, ThreadSpawner};
use crate::{LaunchError, LibraryRegistry, ProcessTable};

type AllocatorFactory = Arc<dyn Fn() -> Box<dyn RawAllocator> + Send + Sync>;

/// Owns every process-wide table: processes, libraries and the capability catalog.
pub struct Runtime {
    config: RuntimeConfig,
    parser: Arc<dyn ObjectParser>,
    exports: ExportRegistry,
    libraries: Mutex<LibraryRegistry>,
    processes: Arc<ProcessTable>,
    spawner: Arc<dyn TaskSpawner>,
    executor: Arc<dyn Executor>,
    suspend: Arc<dyn Suspend>,
    allocator: AllocatorFactory,
}

/// Assembles a [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    executor: Arc<dyn Executor>,
    parser: Arc<dyn ObjectParser>,
    codegen: Option<Box<dyn CodeGenerator>>,
    providers: Vec<Box<dyn CapabilityProvider>>,
    spawner: Arc<dyn TaskSpawner>,
    suspend: Arc<dyn Suspend>,
    allocator: AllocatorFactory,
}

impl RuntimeBuilder {
    /// Uses `config` instead of the defaults.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the ELF parser.
    pub fn parser(mut self, parser: Arc<dyn ObjectParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Code generator used when isolation is `trampoline`.
    pub fn code_generator(mut self, codegen: Box<dyn CodeGenerator>) -> Self {
        self.codegen = Some(codegen);
        self
    }

    /// Adds a capability provider after the built-in ones.
    pub fn provider(mut self, provider: impl CapabilityProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Replaces the task spawner.
    pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Replaces the suspension primitive used by blocking capabilities.
    pub fn suspend(mut self, suspend: Arc<dyn Suspend>) -> Self {
        self.suspend = suspend;
        self
    }

    /// Replaces the raw allocator every new arena is created with.
    pub fn allocator<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn RawAllocator> + Send + Sync + 'static,
    {
        self.allocator = Arc::new(factory);
        self
    }

    /// Validates the configuration and builds the runtime.
    pub fn build(self) -> Result<Runtime, ConfigError> {
        let codegen: Box<dyn CodeGenerator> = match (self.config.isolation, self.codegen) {
            (Isolation::Direct, _) => Box::new(DirectCalls),
            (Isolation::Trampoline, Some(codegen)) => codegen,
            (Isolation::Trampoline, None) => return Err(ConfigError::MissingCodeGenerator),
        };
        let exports =
            self.providers.into_iter().fold(ExportRegistry::with_builtins(codegen), |registry, provider| {
                registry.with_boxed_provider(provider)
            });

        let mut libraries = LibraryRegistry::new();
        for dir in &self.config.search_dirs {
            libraries.add_search_dir(dir.clone());
        }

        Ok(Runtime {
            config: self.config,
            parser: self.parser,
            exports,
            libraries: Mutex::new(libraries),
            processes: Arc::new(ProcessTable::new()),
            spawner: self.spawner,
            executor: self.executor,
            suspend: self.suspend,
            allocator: self.allocator,
        })
    }
}

impl Runtime {
    /// Starts building a runtime that runs programs with `executor`.
    pub fn builder(executor: Arc<dyn Executor>) -> RuntimeBuilder {
        RuntimeBuilder {
            config: RuntimeConfig::default(),
            executor,
            parser: Arc::new(ElfParser),
            codegen: None,
            providers: Vec::new(),
            spawner: Arc::new(ThreadSpawner),
            suspend: Arc::new(ThreadSuspend),
            allocator: Arc::new(|| Box::new(HeapAllocator::new()) as Box<dyn RawAllocator>),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The capability catalog.
    pub fn exports(&self) -> &ExportRegistry {
        &self.exports
    }

    /// Live process table.
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Number of running processes.
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Registers an in-memory library image.
    pub fn register_library_buffer(&self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.libraries.lock().register_buffer(name, bytes);
    }

    /// Registers a library file.
    pub fn register_library_file(&self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.libraries.lock().register_file(name, path);
    }

    /// Removes a library registration.
    pub fn unregister_library(&self, name: &str) -> bool {
        self.libraries.lock().unregister(name)
    }

    /// Adds a library search directory.
    pub fn add_search_dir(&self, dir: impl Into<PathBuf>) -> bool {
        self.libraries.lock().add_search_dir(dir)
    }

    /// Removes a library search directory.
    pub fn remove_search_dir(&self, dir: &Path) -> bool {
        self.libraries.lock().remove_search_dir(dir)
    }

    /// A fresh linkage over a new arena with its own process id, for
    /// embedders that load objects themselves before [`Runtime::start_preloaded`].
    pub fn new_linkage(&self) -> Linkage {
        let pid = self.processes.allocate_pid();
        self.linkage_for(pid)
    }

    /// Loads, links and launches the executable at `path`.
    ///
    /// The program is known by the last path component.
    pub fn start(&self, path: &Path, exit_hook: Option<ExitHook>) -> Result<Pid, LaunchError> {
        let name = program_name(path);
        let mut file = File::open(path).map_err(|source| {
            error!("badgert: cannot open {}: {source}", path.display());
            LaunchError::Io { path: path.to_path_buf(), source }
        })?;
        self.start_from_handle(&name, &mut file, exit_hook)
    }

    /// Loads, links and launches the executable read from `handle`.
    pub fn start_from_handle(
        &self,
        name: &str,
        handle: &mut dyn Read,
        exit_hook: Option<ExitHook>,
    ) -> Result<Pid, LaunchError> {
        let pid = self.processes.allocate_pid();
        let mut linkage = self.linkage_for(pid);
        self.processes.insert(pid, name, linkage.arena().clone());

        let outcome = self.prepare(&mut linkage, name, handle).and_then(|()| self.spawn(linkage, exit_hook));
        if let Err(err) = &outcome {
            self.processes.remove(pid);
            error!("badgert: failed to start {name}: {err}");
        }
        outcome.map(|()| pid)
    }

    /// Launches a linkage the caller already loaded and linked.
    pub fn start_preloaded(&self, linkage: Linkage, exit_hook: Option<ExitHook>) -> Result<Pid, LaunchError> {
        if !linkage.is_ready_as_program() {
            error!("badgert: pid {} is not ready to run", linkage.pid());
            return Err(LaunchError::NotReady);
        }
        let pid = linkage.pid();
        let name = linkage.filenames().next().unwrap_or("a.out").to_string();
        self.processes.insert(pid, name, linkage.arena().clone());
        let outcome = self.spawn(linkage, exit_hook);
        if outcome.is_err() {
            self.processes.remove(pid);
        }
        outcome.map(|()| pid)
    }

    fn linkage_for(&self, pid: Pid) -> Linkage {
        let arena = Arena::new(pid, (self.allocator)()).into_shared();
        Linkage::new(arena, self.parser.clone()).with_collision_policy(self.config.symbol_collisions.into())
    }

    fn prepare(&self, linkage: &mut Linkage, name: &str, handle: &mut dyn Read) -> Result<(), LaunchError> {
        linkage
            .load_executable(name, handle)
            .map_err(|source| LaunchError::Load { name: name.to_string(), source })?;
        resolve_dependencies(linkage, &self.config, &self.libraries.lock())?;
        self.exports.export_wrapped(linkage.symbols_mut())?;
        linkage.link().map_err(LaunchError::Link)
    }

    fn spawn(&self, mut linkage: Linkage, exit_hook: Option<ExitHook>) -> Result<(), LaunchError> {
        let entry = linkage.entry().ok_or(LaunchError::NotReady)?;
        linkage.garbage_collect();

        let pid = linkage.pid();
        let ctx = AbiContext::new(pid, linkage.arena().clone(), self.spawner.exec_unit(), self.suspend.clone())
            .with_resume(Arc::new(ExecutorResume(self.executor.clone())));
        let program = Program { entry, argv: vec![self.config.argv0.clone()], envp: self.config.envp.clone() };
        let task = Task {
            ctx,
            linkage,
            program,
            executor: self.executor.clone(),
            processes: self.processes.clone(),
            exit_hook,
        };

        info!("badgert: starting pid {pid} at {entry:#x}");
        self.spawner.spawn(format!("badge-{pid}"), self.config.task_stack_bytes, Box::new(move || task.run())).map_err(
            |err| {
                error!("badgert: failed to create task for pid {pid}: {err}");
                LaunchError::Spawn(err)
            },
        )
    }
}

/// Final component of `path`, splitting on both separator styles.
fn program_name(path: &Path) -> String {
    let full = path.to_string_lossy();
    full.rsplit(['/', '\\']).next().unwrap_or(&full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_takes_the_last_component() {
        assert_eq!(program_name(Path::new("/apps/demo.elf")), "demo.elf");
        assert_eq!(program_name(Path::new("C:\\apps\\demo.elf")), "demo.elf");
        assert_eq!(program_name(Path::new("demo.elf")), "demo.elf");
    }
}
