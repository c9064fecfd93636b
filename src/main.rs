//! bitflat CLI - convert safetensors weights into a flat binary model
//!
//! Usage: `bitflat <INPUT> <OUTPUT>`

use std::path::PathBuf;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rs_bitflat::{utils::format_bytes, ConvertOptions, Converter};

#[derive(Parser)]
#[command(name = "bitflat")]
#[command(author, version, about = "Convert safetensors weights into a flat binary model", long_about = None)]
struct Cli {
    /// Input .safetensors file or directory of shards
    input: PathBuf,

    /// Output path for the flat model
    output: PathBuf,

    /// Re-read the output and check it against the layout plan
    #[arg(long)]
    verify: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // Usage errors exit with 1, not clap's default 2
            let _ = e.print();
            std::process::exit(1);
        }
    };

    // Initialize logging
    let default_filter = if cli.quiet { "rs_bitflat=warn" } else { "rs_bitflat=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = ConvertOptions {
        verify: cli.verify,
        show_progress: !cli.quiet,
        ..Default::default()
    };

    let summary = Converter::new(options)
        .convert(&cli.input, &cli.output)
        .with_context(|| {
            format!(
                "Failed to convert {} to {}",
                cli.input.display(),
                cli.output.display()
            )
        })?;

    println!("Wrote flat model to {}", cli.output.display());
    if !cli.quiet {
        let dims = &summary.dims;
        println!(
            "  dim={} vocab={} layers={} ffn_dim={}",
            dims.embedding_width, dims.vocabulary_size, dims.layer_count, dims.ffn_width
        );
        println!(
            "  {} tensors, {}{}",
            summary.tensors,
            format_bytes(summary.bytes_written),
            if summary.verified { ", verified" } else { "" }
        );
    }

    Ok(())
}
