// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Named libraries the resolver may load, plus on-disk search directories.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

#[derive(Debug, Clone)]
enum Source {
    Buffer(Arc<[u8]>),
    File(PathBuf),
}

/// Explicit library registrations and search directories.
#[derive(Debug, Default)]
pub struct LibraryRegistry {
    libraries: HashMap<String, Source>,
    search_dirs: Vec<PathBuf>,
}

impl LibraryRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-memory image under `name`, replacing any earlier registration.
    pub fn register_buffer(&mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.libraries.insert(name.into(), Source::Buffer(bytes.into()));
    }

    /// Registers a file path under `name`. The file is opened at resolution time.
    pub fn register_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.libraries.insert(name.into(), Source::File(path.into()));
    }

    /// Removes a registration. Returns false if `name` was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.libraries.remove(name).is_some()
    }

    /// Whether `name` has an explicit registration.
    pub fn is_registered(&self, name: &str) -> bool {
        self.libraries.contains_key(name)
    }

    /// Appends a search directory. Returns false if it is already present.
    pub fn add_search_dir(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.search_dirs.contains(&dir) {
            return false;
        }
        self.search_dirs.push(dir);
        true
    }

    /// Removes a search directory. Returns false if it was not present.
    pub fn remove_search_dir(&mut self, dir: &Path) -> bool {
        let before = self.search_dirs.len();
        self.search_dirs.retain(|d| d != dir);
        self.search_dirs.len() != before
    }

    /// Search directories in lookup order.
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Opens the library called `name`.
    ///
    /// Registrations take precedence over search directories. Returns
    /// `Ok(None)` when nothing provides the name.
    pub fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read + Send>>> {
        match self.libraries.get(name) {
            Some(Source::Buffer(bytes)) => return Ok(Some(Box::new(Cursor::new(bytes.clone())))),
            Some(Source::File(path)) => return Ok(Some(Box::new(File::open(path)?))),
            None => {}
        }
        for dir in &self.search_dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                debug!("badgert: {name} found at {}", candidate.display());
                return Ok(Some(Box::new(File::open(candidate)?)));
            }
        }
        Ok(None)
    }
}
