//! Server configuration validation.

use anyhow::Context;
use clap::Args;
use resono_config::ServerConfig;
use resono_graph::parse_graph;
use resono_pipeline::offload::parse_offload_map;
use std::path::PathBuf;

#[derive(Args)]
pub struct CheckArgs {
    /// Server configuration file (TOML)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
}

pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let config = ServerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    println!("config:     ok ({} device(s))", config.devices.len());

    if let Some(graph_path) = &config.graph_path {
        let text = std::fs::read_to_string(graph_path)
            .with_context(|| format!("reading graph file {}", graph_path.display()))?;
        let desc = parse_graph(&text).context("parsing graph file")?;
        println!(
            "graph:      ok ({} plugin(s), {} flow(s))",
            desc.plugins.len(),
            desc.flows.len()
        );
    } else {
        println!("graph:      none (devices get passthrough pipelines)");
    }

    if config.dsp_offload_map.is_empty() {
        println!("offload:    not configured");
    } else {
        let entries = parse_offload_map(&config.dsp_offload_map).context("parsing offload map")?;
        println!("offload:    ok ({} node type(s))", entries.len());
        for entry in &entries {
            let pattern = if entry.pattern.is_empty() {
                "(no modules)"
            } else {
                entry.pattern.as_str()
            };
            println!(
                "  {} -> pipeline {} [{}]",
                entry.node_type, entry.pipeline_id, pattern
            );
        }
    }

    for device in &config.devices {
        let format = device.audio_format()?;
        println!(
            "device:     {} ({:?}, {} Hz, {}ch, {} frame ring)",
            device.name,
            device.purpose,
            format.frame_rate,
            format.num_channels,
            device.buffer_size
        );
    }

    Ok(())
}
