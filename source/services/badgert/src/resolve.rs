// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dependency closure of a freshly loaded executable.

use std::collections::{HashMap, HashSet};

use badge_loader::Linkage;
use log::{debug, error};

use crate::{LaunchError, LibraryRegistry, RuntimeConfig};

/// Loads every library the modules in `linkage` transitively need.
///
/// Names already loaded and built-in names count as satisfied. Each newly
/// loaded module restarts the scan, and is checked for closing a cycle.
pub(crate) fn resolve_dependencies(
    linkage: &mut Linkage,
    config: &RuntimeConfig,
    libraries: &LibraryRegistry,
) -> Result<(), LaunchError> {
    let mut satisfied: HashSet<String> =
        linkage.filenames().map(str::to_owned).chain(config.builtin_libraries.iter().cloned()).collect();

    'scan: loop {
        for index in 0..linkage.modules().len() {
            let needed = linkage.modules()[index].needed().to_vec();
            for name in needed {
                if !satisfied.insert(name.clone()) {
                    continue;
                }
                let Some(mut handle) =
                    libraries.open(&name).map_err(|source| LaunchError::Open { name: name.clone(), source })?
                else {
                    error!("badgert: library not found: {name}");
                    return Err(LaunchError::MissingLibrary(name));
                };
                debug!("badgert: loading dependency {name}");
                linkage
                    .load_library(&name, &mut handle)
                    .map_err(|source| LaunchError::Load { name: name.clone(), source })?;
                check_cycle(linkage, &name)?;
                continue 'scan;
            }
        }
        return Ok(());
    }
}

/// Fails if `start` can reach itself through loaded modules' needs.
fn check_cycle(linkage: &Linkage, start: &str) -> Result<(), LaunchError> {
    let graph: HashMap<&str, &[String]> = linkage.modules().iter().map(|m| (m.name(), m.needed())).collect();
    let mut in_progress = HashSet::new();
    let mut done = HashSet::new();
    if visit(&graph, start, &mut in_progress, &mut done) {
        error!("badgert: dependency cycle through {start}");
        return Err(LaunchError::DependencyCycle(start.to_string()));
    }
    Ok(())
}

fn visit<'a>(
    graph: &HashMap<&'a str, &'a [String]>,
    node: &'a str,
    in_progress: &mut HashSet<&'a str>,
    done: &mut HashSet<&'a str>,
) -> bool {
    if done.contains(node) {
        return false;
    }
    if !in_progress.insert(node) {
        return true;
    }
    let edges = graph.get(node).copied().unwrap_or_default();
    for next in edges {
        if graph.contains_key(next.as_str()) && visit(graph, next, in_progress, done) {
            return true;
        }
    }
    in_progress.remove(node);
    done.insert(node);
    false
}
