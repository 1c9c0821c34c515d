//! CLI subcommand implementations.

pub mod check;
pub mod dump;
pub mod process;

use anyhow::{Context, bail};
use resono_graph::{ExprEnv, GraphDescription, parse_graph};
use resono_pipeline::{Pipeline, PluginRegistry};
use std::path::Path;
use std::sync::Arc;

/// Parses `key=value` environment overrides from the command line.
pub fn parse_env_override(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid variable '{s}' (expected name=value)"))
}

/// Builds an environment from the standard preset plus overrides.
///
/// Values parse as booleans (`true`/`false`), integers, or strings, in
/// that order.
pub fn env_with_overrides(overrides: &[(String, String)]) -> ExprEnv {
    let mut env = ExprEnv::standard();
    for (name, value) in overrides {
        if let Ok(b) = value.parse::<bool>() {
            env.set_boolean(name, b);
        } else if let Ok(i) = value.parse::<i64>() {
            env.set_integer(name, i);
        } else {
            env.set_string(name, value);
        }
    }
    env
}

/// Loads a graph file and builds a ready-to-run pipeline.
pub fn build_pipeline(
    graph_path: &Path,
    purpose: &str,
    sample_rate: u32,
    env: &ExprEnv,
) -> anyhow::Result<Pipeline> {
    let text = std::fs::read_to_string(graph_path)
        .with_context(|| format!("reading graph file {}", graph_path.display()))?;
    let desc = Arc::new(parse_graph(&text).context("parsing graph file")?);
    build_pipeline_from_desc(&desc, purpose, sample_rate, env)
}

/// Builds a pipeline from an in-memory description.
pub fn build_pipeline_from_desc(
    desc: &Arc<GraphDescription>,
    purpose: &str,
    sample_rate: u32,
    env: &ExprEnv,
) -> anyhow::Result<Pipeline> {
    let registry = PluginRegistry::new();
    let mut pipeline = Pipeline::create(Arc::clone(desc), env, purpose)
        .context("constructing pipeline")?;
    pipeline.load(&registry).context("loading modules")?;
    pipeline
        .instantiate(sample_rate, env)
        .context("instantiating modules")?;
    if pipeline.sample_rate() != sample_rate {
        bail!(
            "pipeline instantiated at {} Hz instead of {} Hz",
            pipeline.sample_rate(),
            sample_rate
        );
    }
    Ok(pipeline)
}
