//! Offline WAV processing through a DSP graph.

use super::{build_pipeline, env_with_overrides, parse_env_override};
use anyhow::{Context, bail};
use clap::Args;
use resono_dsp::SampleFormat;
use std::path::PathBuf;

#[derive(Args)]
pub struct ProcessArgs {
    /// Input WAV file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// DSP graph file
    #[arg(short, long)]
    graph: PathBuf,

    /// Pipeline purpose to build
    #[arg(long, default_value = "playback")]
    purpose: String,

    /// Environment variable overrides (e.g. "dsp_name=hifi")
    #[arg(long = "var", value_parser = parse_env_override, number_of_values = 1)]
    vars: Vec<(String, String)>,

    /// Frames per processing call
    #[arg(long, default_value = "2048")]
    block_size: usize,
}

pub fn run(args: ProcessArgs) -> anyhow::Result<()> {
    let mut reader = hound::WavReader::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!("only 16-bit integer WAV input is supported");
    }

    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .context("reading samples")?;
    let channels = spec.channels as usize;
    let frames = samples.len() / channels;
    println!(
        "Read {}: {} frames, {} Hz, {} channel(s)",
        args.input.display(),
        frames,
        spec.sample_rate,
        channels
    );

    let env = env_with_overrides(&args.vars);
    let mut pipeline = build_pipeline(&args.graph, &args.purpose, spec.sample_rate, &env)?;
    if pipeline.input_channels() != channels {
        bail!(
            "graph expects {} channel(s) but the file has {}",
            pipeline.input_channels(),
            channels
        );
    }
    println!(
        "Pipeline: {} ({} frames delay)",
        if pipeline.label_pattern().is_empty() {
            "passthrough".to_string()
        } else {
            pipeline.label_pattern()
        },
        pipeline.delay()
    );

    // Interleaved s16 bytes, processed in place block by block.
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in &samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    let frame_bytes = channels * 2;
    let block = args.block_size.max(1);
    let mut offset = 0;
    let mut remaining = frames;
    while remaining > 0 {
        let chunk = remaining.min(block);
        let slice = &mut bytes[offset..offset + chunk * frame_bytes];
        pipeline
            .apply(slice, SampleFormat::S16Le, chunk)
            .context("processing block")?;
        offset += chunk * frame_bytes;
        remaining -= chunk;
    }

    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for frame_chunk in bytes.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([frame_chunk[0], frame_chunk[1]]))?;
    }
    writer.finalize()?;

    let stats = pipeline.stats();
    println!(
        "Wrote {} ({} blocks, {:?} total processing time)",
        args.output.display(),
        stats.total_blocks,
        stats.total_time
    );
    Ok(())
}
