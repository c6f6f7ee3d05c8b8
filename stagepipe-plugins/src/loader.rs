//! Plugin loader: loads .so/.dll/.dylib plugins via libloading and invokes
//! their `register` entry point.
//!
//! Loading a plugin executes arbitrary code with host privilege. Only load
//! trusted plugins.

use crate::package::{self, PackageIndex};
use crate::{
    ENTRY_POINT_SYMBOL, EntryPoint, LoadedUnit, PluginDescriptor, PluginLoadError, UNIT_PREFIX,
    UnitOrigin,
};
use chrono::Utc;
use stagepipe_core::{ComponentRegistry, panic_message};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A dynamic library opened by a [`ModuleBackend`].
///
/// Dropping the box closes the library.
pub trait LoadedModule {
    /// Look up the `register` entry point.
    fn entry_point(&self) -> Result<EntryPoint, String>;

    /// Keep the library mapped for the rest of the process.
    ///
    /// Called once the entry point has run, since registered factories may
    /// point into the library's code.
    fn keep_resident(self: Box<Self>);
}

/// Opens dynamic libraries. The default backend is [`LibloadingBackend`].
pub trait ModuleBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn LoadedModule>, String>;
}

/// Backend over the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibloadingBackend;

struct NativeModule {
    lib: libloading::Library,
}

impl ModuleBackend for LibloadingBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn LoadedModule>, String> {
        // SAFETY: running the library's initializers is inherent to loading a plugin.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| e.to_string())?;
        Ok(Box::new(NativeModule { lib }))
    }
}

impl LoadedModule for NativeModule {
    fn entry_point(&self) -> Result<EntryPoint, String> {
        // SAFETY: plugins are required to export `register` with the `EntryPoint` signature.
        let symbol = unsafe { self.lib.get::<EntryPoint>(ENTRY_POINT_SYMBOL) }
            .map_err(|e| e.to_string())?;
        Ok(*symbol)
    }

    fn keep_resident(self: Box<Self>) {
        std::mem::forget(self.lib);
    }
}

/// Loads plugins and keeps the table of loaded units.
pub struct PluginLoader {
    backend: Box<dyn ModuleBackend>,
    search_dirs: Vec<PathBuf>,
    packages: PackageIndex,
    units: Vec<LoadedUnit>,
}

impl PluginLoader {
    /// Create a loader over the platform dynamic loader.
    pub fn new() -> Self {
        Self::with_backend(Box::new(LibloadingBackend))
    }

    /// Create a loader over a custom backend.
    pub fn with_backend(backend: Box<dyn ModuleBackend>) -> Self {
        Self {
            backend,
            search_dirs: Vec::new(),
            packages: PackageIndex::new(),
            units: Vec::new(),
        }
    }

    /// Add a directory to search for package libraries.
    pub fn add_search_dir(&mut self, dir: impl Into<PathBuf>) {
        self.search_dirs.push(dir.into());
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Install a package entry point so `load_from_package(name)` finds it
    /// without touching the filesystem.
    pub fn install_package(&mut self, name: impl Into<String>, entry: EntryPoint) {
        self.packages.install(name, entry);
    }

    pub fn packages(&self) -> &PackageIndex {
        &self.packages
    }

    /// List available plugin libraries in search directories.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut plugins = Vec::new();
        for dir in &self.search_dirs {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if is_plugin_library(&path) {
                        plugins.push(path);
                    }
                }
            }
        }
        plugins.sort();
        plugins
    }

    /// Units loaded so far, in load order.
    pub fn loaded_units(&self) -> &[LoadedUnit] {
        &self.units
    }

    pub fn is_loaded(&self, unit: &str) -> bool {
        self.units.iter().any(|u| u.name == unit)
    }

    /// Load a plugin library from a file path and invoke its `register`
    /// entry point. Returns the synthesized unit name.
    pub fn load_from_path(
        &mut self,
        path: impl AsRef<Path>,
        registry: &mut ComponentRegistry,
    ) -> Result<String, PluginLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PluginLoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if !is_plugin_library(path) {
            return Err(PluginLoadError::WrongExtension {
                path: path.to_path_buf(),
                expected: std::env::consts::DLL_EXTENSION,
            });
        }

        let unit = self.unique_unit_name(&format!("{}{}", UNIT_PREFIX, library_stem(path)));
        self.load_library(unit, path, UnitOrigin::Path(path.to_path_buf()), registry)
    }

    /// Resolve an installed plugin by logical name and invoke its `register`
    /// entry point. Returns the unit name.
    ///
    /// Packages installed in-process win over libraries in search dirs.
    pub fn load_from_package(
        &mut self,
        name: &str,
        registry: &mut ComponentRegistry,
    ) -> Result<String, PluginLoadError> {
        if let Some(entry) = self.packages.get(name) {
            let unit = self.unique_unit_name(name);
            self.reserve(&unit, UnitOrigin::Installed(name.to_string()));
            let result = invoke_entry(&unit, entry, registry);
            return self.settle(unit, result);
        }

        match package::find_in_dirs(name, &self.search_dirs) {
            Some(path) => {
                let unit = self.unique_unit_name(name);
                self.load_library(unit, &path, UnitOrigin::SearchDir(path.clone()), registry)
            }
            None => Err(PluginLoadError::PackageNotFound {
                name: name.to_string(),
                searched: self.search_dirs.len(),
            }),
        }
    }

    /// Load descriptors in order, stopping at the first failure.
    ///
    /// Not transactional: units loaded before the failure stay loaded and
    /// their registrations stay in the registry.
    pub fn load_many(
        &mut self,
        descriptors: &[PluginDescriptor],
        registry: &mut ComponentRegistry,
    ) -> Result<Vec<String>, PluginLoadError> {
        let mut loaded = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let unit = match (&descriptor.path, &descriptor.package) {
                (Some(path), _) => self.load_from_path(path, registry)?,
                (None, Some(name)) => self.load_from_package(name, registry)?,
                (None, None) => return Err(PluginLoadError::InvalidDescriptor),
            };
            loaded.push(unit);
        }
        Ok(loaded)
    }

    fn load_library(
        &mut self,
        unit: String,
        path: &Path,
        origin: UnitOrigin,
        registry: &mut ComponentRegistry,
    ) -> Result<String, PluginLoadError> {
        self.reserve(&unit, origin);

        let module = match self.backend.open(path) {
            Ok(module) => module,
            Err(message) => {
                let err = PluginLoadError::LoadFailed {
                    path: path.to_path_buf(),
                    message,
                };
                return self.settle(unit, Err(err));
            }
        };

        let entry = match module.entry_point() {
            Ok(entry) => entry,
            Err(message) => {
                // Entry point never ran; dropping the module closes the library.
                drop(module);
                let err = PluginLoadError::MissingEntryPoint {
                    unit: unit.clone(),
                    message,
                };
                return self.settle(unit, Err(err));
            }
        };

        let result = invoke_entry(&unit, entry, registry);
        module.keep_resident();
        self.settle(unit, result)
    }

    fn reserve(&mut self, unit: &str, origin: UnitOrigin) {
        debug!(unit = %unit, ?origin, "Loading plugin");
        self.units.push(LoadedUnit {
            name: unit.to_string(),
            origin,
            loaded_at: Utc::now(),
        });
    }

    /// Keep the unit on success, evict it on failure.
    fn settle(
        &mut self,
        unit: String,
        result: Result<(), PluginLoadError>,
    ) -> Result<String, PluginLoadError> {
        match result {
            Ok(()) => {
                info!(unit = %unit, "Loaded plugin");
                Ok(unit)
            }
            Err(e) => {
                self.units.retain(|u| u.name != unit);
                warn!(unit = %unit, error = %e, "Plugin failed to load");
                Err(e)
            }
        }
    }

    fn unique_unit_name(&self, base: &str) -> String {
        if !self.is_loaded(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| !self.is_loaded(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("search_dirs", &self.search_dirs)
            .field("packages", &self.packages)
            .field("units", &self.units)
            .finish()
    }
}

fn invoke_entry(
    unit: &str,
    entry: EntryPoint,
    registry: &mut ComponentRegistry,
) -> Result<(), PluginLoadError> {
    // Only catches panics on the host's runtime; a `cdylib` must catch its own
    // through `declare_plugin!`.
    match catch_unwind(AssertUnwindSafe(|| entry(registry))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PluginLoadError::RegisterFailed {
            unit: unit.to_string(),
            message: e.to_string(),
        }),
        Err(payload) => Err(PluginLoadError::RegisterFailed {
            unit: unit.to_string(),
            message: format!("panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

/// File stem with the platform library prefix (`lib`) removed.
fn library_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("plugin");
    let prefix = std::env::consts::DLL_PREFIX;
    stem.strip_prefix(prefix)
        .filter(|s| !prefix.is_empty() && !s.is_empty())
        .unwrap_or(stem)
        .to_string()
}

/// Check if a file path carries this platform's dynamic library extension.
pub fn is_plugin_library(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(std::env::consts::DLL_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};

    #[test]
    fn test_is_plugin_library() {
        assert!(is_plugin_library(Path::new(&format!("libfoo.{}", DLL_EXTENSION))));
        assert!(!is_plugin_library(Path::new("foo.rs")));
        assert!(!is_plugin_library(Path::new("foo.toml")));
        assert!(!is_plugin_library(Path::new("foo")));
    }

    #[test]
    fn test_library_stem_strips_prefix() {
        let file = format!("{}hello_plugin.{}", DLL_PREFIX, DLL_EXTENSION);
        assert_eq!(library_stem(Path::new(&file)), "hello_plugin");
        let bare = format!("demo.{}", DLL_EXTENSION);
        assert_eq!(library_stem(Path::new(&bare)), "demo");
    }

    #[test]
    fn test_discover_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut loader = PluginLoader::new();
        loader.add_search_dir(dir.path());
        assert!(loader.discover().is_empty());
    }

    #[test]
    fn test_discover_finds_libs() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(format!("libplugin.{}", DLL_EXTENSION)), b"fake").unwrap();
        std::fs::write(dir.path().join(format!("other.{}", DLL_EXTENSION)), b"fake").unwrap();
        std::fs::write(dir.path().join("README.md"), b"docs").unwrap();

        let mut loader = PluginLoader::new();
        loader.add_search_dir(dir.path());
        assert_eq!(loader.discover().len(), 2);
    }

    #[test]
    fn test_discover_nonexistent_dir() {
        let mut loader = PluginLoader::new();
        loader.add_search_dir("/nonexistent/path");
        assert!(loader.discover().is_empty());
    }

    #[test]
    fn test_unique_unit_name_suffixes() {
        let mut loader = PluginLoader::new();
        assert_eq!(loader.unique_unit_name("stagepipe_plugin_x"), "stagepipe_plugin_x");
        loader.reserve("stagepipe_plugin_x", UnitOrigin::Path("x".into()));
        assert_eq!(loader.unique_unit_name("stagepipe_plugin_x"), "stagepipe_plugin_x_2");
        loader.reserve("stagepipe_plugin_x_2", UnitOrigin::Path("x".into()));
        assert_eq!(loader.unique_unit_name("stagepipe_plugin_x"), "stagepipe_plugin_x_3");
    }
}
