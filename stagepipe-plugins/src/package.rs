//! Installed-package resolution.
//!
//! A package is a plugin addressed by logical name instead of a path. The host
//! can install packages in-process (statically linked plugins), otherwise the
//! name is mapped to the platform library file name and looked up in the
//! loader's search directories.

use crate::EntryPoint;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// In-process index of installed package entry points.
#[derive(Default, Clone)]
pub struct PackageIndex {
    entries: HashMap<String, EntryPoint>,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a package. Replaces any earlier entry of the same name.
    pub fn install(&mut self, name: impl Into<String>, entry: EntryPoint) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<EntryPoint> {
        self.entries.get(name).copied()
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Installed package names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageIndex")
            .field("packages", &self.names())
            .finish()
    }
}

/// Platform library file names a package name may be built as.
///
/// Cargo turns `hello-plugin` into `libhello_plugin.so`, so the underscore
/// form is tried as well.
pub fn library_candidates(name: &str) -> Vec<OsString> {
    let mut candidates = vec![libloading::library_filename(name)];
    let normalized = name.replace('-', "_");
    if normalized != name {
        candidates.push(libloading::library_filename(normalized));
    }
    candidates
}

/// Find the first library file for `name` in `dirs`.
pub fn find_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let candidates = library_candidates(name);
    dirs.iter().find_map(|dir| {
        candidates
            .iter()
            .map(|file| dir.join(file))
            .find(|p| p.is_file())
    })
}
