//! Pipeline layout inspection.

use super::{build_pipeline, env_with_overrides, parse_env_override};
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct DumpArgs {
    /// DSP graph file
    #[arg(value_name = "GRAPH")]
    graph: PathBuf,

    /// Pipeline purpose to build
    #[arg(long, default_value = "playback")]
    purpose: String,

    /// Sample rate to instantiate at
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Environment variable overrides (e.g. "disable_drc=true")
    #[arg(long = "var", value_parser = parse_env_override, number_of_values = 1)]
    vars: Vec<(String, String)>,
}

pub fn run(args: DumpArgs) -> anyhow::Result<()> {
    let env = env_with_overrides(&args.vars);
    let pipeline = build_pipeline(&args.graph, &args.purpose, args.sample_rate, &env)?;

    println!("graph:           {}", args.graph.display());
    println!("purpose:         {}", args.purpose);
    println!("sample rate:     {} Hz", pipeline.sample_rate());
    println!("channels:        {} in, {} out", pipeline.input_channels(), pipeline.output_channels());
    println!("instances:       {}", pipeline.instance_count());
    println!("buffer slots:    {}", pipeline.peak_buffers());
    println!("total delay:     {} frames", pipeline.delay());
    let pattern = pipeline.label_pattern();
    println!(
        "module pattern:  {}",
        if pattern.is_empty() {
            "(endpoints only)"
        } else {
            pattern.as_str()
        }
    );
    pipeline.dump();
    Ok(())
}
