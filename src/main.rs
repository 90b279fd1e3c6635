//! Command-line front end: load a PE, run the recovery, report.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use memmap2::Mmap;
use serde::Serialize;
use tracing::error;

use sibyl::resources::{License, PackageInfo};
use sibyl::{Analyser, DelphiGeneration, PeImage, RecoveredObject};

#[derive(Parser)]
#[command(name = "sibyl")]
#[command(version)]
#[command(about = "Recover RTTI and class hierarchy information from compiled Delphi executables")]
struct Args {
    /// Portable executable file to process
    file: PathBuf,

    /// Where to write the JSON report
    #[arg(short, long, default_value = "output.json")]
    output: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    info: ReportInfo,
    header_length: Option<u32>,
    generation: Option<DelphiGeneration>,
    license: Option<License>,
    units: Option<&'a PackageInfo>,
    items: &'a [RecoveredObject],
}

#[derive(Serialize)]
struct ReportInfo {
    creator: &'static str,
    version: &'static str,
    file: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.json_logs {
        sibyl::logging::init_tracing_json();
    } else {
        sibyl::logging::init_tracing();
    }

    let file = File::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let mapped = unsafe { Mmap::map(&file) }
        .with_context(|| format!("mapping {}", args.file.display()))?;

    let image = PeImage::parse(&mapped)?;
    let mut analyser = Analyser::from_image(&image);
    if let Err(fatal) = analyser.analyse() {
        error!(%fatal, "analysis aborted");
        return Err(fatal.into());
    }

    let context = &analyser.context;
    let report = Report {
        info: ReportInfo {
            creator: "sibyl, a tool to recover RTTI from Delphi executables",
            version: env!("CARGO_PKG_VERSION"),
            file: args.file.display().to_string(),
        },
        header_length: context.header_length,
        generation: context.version,
        license: context.license,
        units: context.units.as_ref(),
        items: &context.items,
    };

    let out = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(out), &report)?;

    println!(
        "Found {} total items, report written to {}",
        context.items.len(),
        args.output.display()
    );
    Ok(())
}
