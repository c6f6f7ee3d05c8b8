//! Output commands: component listing, dry-run plan, and run summary.

use stagepipe_core::registry::lock_registry;
use stagepipe_core::{Context, SharedRegistry};
use stagepipe_engine::{ExecutionResult, PipelineOrchestrator, builtins, pipeline_results};
use stagepipe_plugins::PluginLoader;
use std::process::ExitCode;
use tracing::warn;

/// Bootstrap built-ins, load every plugin found in the search dirs, and
/// print the registry contents.
pub fn list_components(registry: &SharedRegistry, loader: &mut PluginLoader) {
    for path in loader.discover() {
        let mut guard = lock_registry(registry);
        if let Err(e) = loader.load_from_path(&path, &mut guard) {
            warn!(path = %path.display(), error = %e, "Skipping plugin");
        }
    }
    builtins::bootstrap(registry);

    let listing = lock_registry(registry).list_all();
    println!("\nRegistered Components:");
    println!("{}", "=".repeat(40));
    for (category, names) in listing {
        if names.is_empty() {
            continue;
        }
        println!("\n  {}:", category);
        for name in names {
            println!("    - {}", name);
        }
    }
    println!();
}

/// Print the stages a dry run would execute.
pub fn print_plan(orchestrator: &PipelineOrchestrator) {
    let stages = orchestrator.enabled_stages();
    println!("\nDry run: {} stage(s) would execute", stages.len());
    for (idx, spec) in stages.iter().enumerate() {
        println!(
            "  {}. {} (on_failure: {:?})",
            idx + 1,
            spec.name,
            spec.on_failure
        );
        if !spec.params.is_empty() {
            println!("     params: {}", serde_json::Value::Object(spec.params.clone()));
        }
    }
}

/// Print the per-stage summary and map it to an exit code.
pub fn report(context: &Context) -> ExitCode {
    let results = pipeline_results(context);
    if !results.is_empty() {
        println!("\n{}", format_summary(&results));
    }

    let failed = results.iter().filter(|(_, r)| !r.is_success()).count();
    if failed > 0 {
        println!("\nPipeline completed with {} failure(s).", failed);
        ExitCode::FAILURE
    } else {
        println!("\nPipeline completed successfully.");
        ExitCode::SUCCESS
    }
}

fn format_summary(results: &[(String, ExecutionResult)]) -> String {
    let width = results
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0)
        .max("STAGE".len());
    let mut out = format!("{:<width$}  {:<8}  {:>9}", "STAGE", "STATUS", "SECONDS");
    for (name, result) in results {
        out.push_str(&format!(
            "\n{:<width$}  {:<8}  {:>9.2}",
            name,
            result.status.to_string(),
            result.elapsed_seconds
        ));
        if let Some(error) = &result.error {
            out.push_str(&format!("\n{:<width$}  error: {}", "", error));
        }
    }
    out
}
