//! Pipelines that load the demo plugins as real dynamic libraries.
//!
//! The demo crates are dev-dependencies built with the `cdylib` crate type,
//! so cargo leaves their libraries next to this test binary.

use pretty_assertions::assert_eq;
use serde_json::json;
use stagepipe_core::ComponentRegistry;
use stagepipe_core::registry::lock_registry;
use stagepipe_engine::{PipelineOrchestrator, failed_stages};
use stagepipe_plugins::{PluginLoader, UnitOrigin};
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::{Path, PathBuf};

/// Locate `<prefix><crate_name>*.<ext>` beside the test binary, newest first.
fn demo_library(crate_name: &str) -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    let prefix = format!("{}{}", DLL_PREFIX, crate_name);

    let mut found: Vec<PathBuf> = [Some(deps), deps.parent()]
        .into_iter()
        .flatten()
        .filter_map(|dir| std::fs::read_dir(dir).ok())
        .flat_map(|entries| entries.flatten().map(|e| e.path()))
        .filter(|path| is_library_named(path, &prefix))
        .collect();
    found.sort_by_key(|path| {
        std::cmp::Reverse(std::fs::metadata(path).and_then(|m| m.modified()).ok())
    });
    found
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no {}*.{} next to {}", prefix, DLL_EXTENSION, exe.display()))
}

fn is_library_named(path: &Path, prefix: &str) -> bool {
    let extension_matches = path.extension().and_then(|e| e.to_str()) == Some(DLL_EXTENSION);
    let stem_matches = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem == prefix || stem.starts_with(&format!("{}-", prefix)));
    extension_matches && stem_matches
}

fn yaml_path(path: &Path) -> String {
    // Single quotes keep Windows backslashes literal.
    format!("'{}'", path.display())
}

#[test]
fn hello_plugin_loads_from_library_path() {
    let library = demo_library("hello_plugin");
    let yaml = format!(
        "plugins:\n  - path: {}\nstages:\n  - name: custom_hello\n",
        yaml_path(&library)
    );
    let mut orch = PipelineOrchestrator::from_yaml_str(&yaml, None, false)
        .unwrap()
        .with_registry(ComponentRegistry::shared())
        .with_plugin_loader(PluginLoader::new());

    let context = orch.run().unwrap();

    assert_eq!(context["custom_hello_ran"], json!(true));
    assert_eq!(
        context["pipeline_results"]["custom_hello"]["status"],
        json!("success")
    );
    assert!(lock_registry(orch.registry()).has("metric", "avg_seq_length"));

    let units = orch.plugin_loader().loaded_units();
    assert_eq!(units.len(), 1);
    assert!(units[0].name.starts_with("stagepipe_plugin_hello_plugin"));
    assert_eq!(units[0].origin, UnitOrigin::Path(library));
}

#[test]
fn panicking_plugin_stage_is_recorded_as_failed() {
    let yaml = format!(
        r#"
plugins:
  - path: {}
  - path: {}
stages:
  - name: boom
    on_failure: continue
  - name: custom_hello
"#,
        yaml_path(&demo_library("panic_plugin")),
        yaml_path(&demo_library("hello_plugin")),
    );
    let mut orch = PipelineOrchestrator::from_yaml_str(&yaml, None, false)
        .unwrap()
        .with_registry(ComponentRegistry::shared())
        .with_plugin_loader(PluginLoader::new());

    let context = orch.run().unwrap();

    assert_eq!(failed_stages(&context), vec!["boom".to_string()]);
    assert_eq!(
        context["pipeline_results"]["boom"]["error"],
        json!("Stage 'boom' panicked: plugin stage blew up")
    );
    assert_eq!(
        context["pipeline_results"]["custom_hello"]["status"],
        json!("success")
    );
    assert_eq!(context["custom_hello_ran"], json!(true));
}
