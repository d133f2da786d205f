// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use badge_arena::{Pid, SharedArena};
use parking_lot::Mutex;

/// What the runtime remembers about a live process.
///
/// The record shares ownership of the arena, so memory is released once
/// the task has finished and the record is removed.
#[derive(Clone)]
pub struct ProcessRecord {
    /// Executable name.
    pub name: String,
    /// The process memory arena.
    pub arena: SharedArena,
}

impl fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRecord").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Live processes keyed by id. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct ProcessTable {
    next: AtomicU32,
    records: Mutex<HashMap<Pid, ProcessRecord>>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self { next: AtomicU32::new(1), records: Mutex::new(HashMap::new()) }
    }
}

impl ProcessTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh id without creating a record.
    pub fn allocate_pid(&self) -> Pid {
        Pid::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Records `pid` as live with its arena.
    pub fn insert(&self, pid: Pid, name: impl Into<String>, arena: SharedArena) {
        self.records.lock().insert(pid, ProcessRecord { name: name.into(), arena });
    }

    /// Forgets `pid`, returning its record if it was live.
    pub fn remove(&self, pid: Pid) -> Option<ProcessRecord> {
        self.records.lock().remove(&pid)
    }

    /// Record for `pid`, if live.
    pub fn get(&self, pid: Pid) -> Option<ProcessRecord> {
        self.records.lock().get(&pid).cloned()
    }

    /// Number of live processes.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no process is live.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
