use clap::Parser;
use std::path::{Path, PathBuf};

use hkc::diag::ConvertError;
use hkc::dialect::{Target, ALL_TARGETS};
use hkc::model::Model;
use hkc::pipeline::{convert_model, ConversionOutput, ConvertOptions};
use hkc::scaffold::ScaffoldSet;
use tracing::{info, warn};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Write every source unit below the output directory
    Files,
    /// Print the file list with digests as JSON
    Manifest,
}

#[derive(Parser, Debug)]
#[command(
    name = "hkc",
    version,
    about = "Helicity Kernel Compiler — converts amplitude call graphs to numeric kernel source"
)]
struct Cli {
    /// Amplitude model (JSON)
    model: PathBuf,

    /// Scaffold directory (<dir>/<target>/<unit>_<part>.inc)
    #[arg(short, long)]
    scaffolds: PathBuf,

    /// Target dialect (repeatable; default: all)
    #[arg(short, long = "target", value_enum)]
    targets: Vec<Target>,

    /// Output directory
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Files)]
    emit: EmitStage,

    /// Log conversion steps
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let targets = if cli.targets.is_empty() {
        ALL_TARGETS.to_vec()
    } else {
        cli.targets.clone()
    };

    let output = match run(&cli.model, &cli.scaffolds, targets) {
        Ok(output) => output,
        Err(e) => fail(&e),
    };

    match cli.emit {
        EmitStage::Manifest => match output.manifest_json() {
            Ok(json) => print!("{json}"),
            Err(e) => fail(&e),
        },
        EmitStage::Files => {
            if let Err(e) = write_files(&cli.output, &output) {
                eprintln!("hkc: error: {}: {}", cli.output.display(), e);
                std::process::exit(2);
            }
        }
    }
}

fn run(model: &Path, scaffolds: &Path, targets: Vec<Target>) -> Result<ConversionOutput, ConvertError> {
    let (model, source) = Model::load(model)?;
    let scaffolds = ScaffoldSet::load_dir(scaffolds, &targets)?;
    if scaffolds.is_empty() {
        warn!("no scaffold fragments found");
    }
    info!(model = %model.name, processes = model.processes.len(), "loaded model");
    convert_model(&model, &source, &scaffolds, &ConvertOptions { targets })
}

fn write_files(dir: &Path, output: &ConversionOutput) -> std::io::Result<()> {
    if dir.exists() {
        warn!(dir = %dir.display(), "output directory exists; files will be overwritten");
    }
    for file in &output.files {
        let path = dir.join(&file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &file.source)?;
        info!(path = %path.display(), sha256 = %file.sha256, "wrote");
    }
    Ok(())
}

fn fail(e: &ConvertError) -> ! {
    eprintln!("hkc: error[{}]: {}", e.code(), e);
    std::process::exit(if e.is_io() { 2 } else { 1 });
}
