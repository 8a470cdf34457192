//! mmo - downmix tooling
//!
//! Usage:
//!   mmo downmix qa --src 5_1.wav --ref 2_0.wav --source-layout LAYOUT.5_1
//!   mmo downmix show --source LAYOUT.7_1 --target LAYOUT.2_0 --format csv
//!   mmo downmix list --conversions

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use mmo_downmix::{render_matrix, DownmixMatrixService, MatrixFormat, OntologySource};
use mmo_qa::{DecoderKind, DownmixQaEngine, MeterPack, QaConfig, ReportFormat};

#[derive(Parser)]
#[command(name = "mmo", version, about = "Downmix matrices and downmix-fold QA")]
struct Cli {
    /// Debug logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Downmix matrices and QA
    #[command(subcommand)]
    Downmix(DownmixCommand),
}

#[derive(Subcommand)]
enum DownmixCommand {
    /// Fold a multichannel render and compare it with a stereo reference
    Qa(QaArgs),
    /// Print the resolved matrix for a layout pair
    Show(ShowArgs),
    /// List layouts, policies or conversions as JSON
    List(ListArgs),
}

#[derive(Args)]
struct QaArgs {
    /// Multichannel source render
    #[arg(long)]
    src: PathBuf,

    /// Stereo reference render
    #[arg(long = "ref")]
    reference: PathBuf,

    /// Source layout id (e.g. LAYOUT.5_1)
    #[arg(long)]
    source_layout: Option<String>,

    /// Target layout id
    #[arg(long)]
    target_layout: Option<String>,

    /// Downmix policy id
    #[arg(long)]
    policy: Option<String>,

    /// Meter pack (truth, basic)
    #[arg(long)]
    meters: Option<MeterPack>,

    /// Seconds to compare; 0 compares everything
    #[arg(long)]
    max_seconds: Option<f64>,

    #[arg(long)]
    tolerance_lufs: Option<f64>,

    #[arg(long)]
    tolerance_true_peak: Option<f64>,

    #[arg(long)]
    tolerance_corr: Option<f64>,

    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tolerance preset (default, strict, lenient)
    #[arg(long, conflicts_with = "config")]
    preset: Option<String>,

    /// Decoder backend (native, ffmpeg)
    #[arg(long)]
    decoder: Option<DecoderKind>,

    /// Ontology directory instead of the built-in one
    #[arg(long)]
    ontology: Option<PathBuf>,

    /// Report format (json, csv, text)
    #[arg(long, default_value = "json")]
    format: ReportFormat,

    /// Write the report here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(long)]
    source: String,

    #[arg(long)]
    target: String,

    #[arg(long)]
    policy: Option<String>,

    /// Matrix format (json, csv)
    #[arg(long, default_value = "json")]
    format: MatrixFormat,

    #[arg(long)]
    ontology: Option<PathBuf>,

    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    layouts: bool,

    #[arg(long)]
    policies: bool,

    #[arg(long)]
    conversions: bool,

    #[arg(long)]
    ontology: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Commands::Downmix(DownmixCommand::Qa(args)) => run_qa(args),
        Commands::Downmix(DownmixCommand::Show(args)) => show_matrix(args).map(|()| ExitCode::SUCCESS),
        Commands::Downmix(DownmixCommand::List(args)) => list_registry(args).map(|()| ExitCode::SUCCESS),
    }
}

fn ontology_source(dir: Option<PathBuf>) -> OntologySource {
    dir.map_or(OntologySource::Builtin, OntologySource::Directory)
}

/// Stdout or a file, creating parent directories
fn emit(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// QA
// ═══════════════════════════════════════════════════════════════════════════════

/// Config file or preset, then flag overrides
fn build_config(args: &QaArgs) -> Result<QaConfig> {
    let mut config = match (&args.config, &args.preset) {
        (Some(path), _) => QaConfig::from_yaml_file(path)?,
        (None, Some(name)) => QaConfig::preset(name)?,
        (None, None) => QaConfig::default(),
    };

    if let Some(layout) = &args.source_layout {
        config = config.with_source_layout(layout);
    }
    if let Some(layout) = &args.target_layout {
        config = config.with_target_layout(layout);
    }
    if let Some(policy) = &args.policy {
        config = config.with_policy(policy);
    }
    if let Some(meters) = args.meters {
        config = config.with_meters(meters);
    }
    if let Some(seconds) = args.max_seconds {
        config = config.with_max_seconds(seconds);
    }
    if let Some(tolerance) = args.tolerance_lufs {
        config = config.with_lufs_tolerance(tolerance);
    }
    if let Some(tolerance) = args.tolerance_true_peak {
        config = config.with_true_peak_tolerance(tolerance);
    }
    if let Some(tolerance) = args.tolerance_corr {
        config = config.with_correlation_tolerance(tolerance);
    }
    if let Some(decoder) = args.decoder {
        config = config.with_decoder(decoder);
    }
    if let Some(dir) = &args.ontology {
        config = config.with_ontology_dir(dir);
    }

    config.validate()?;
    Ok(config)
}

fn run_qa(args: QaArgs) -> Result<ExitCode> {
    let config = build_config(&args)?;

    let Some(source_layout) = config.source_layout_id.clone() else {
        bail!("Missing source layout. Provide --source-layout or set source_layout_id in --config.");
    };

    let service = DownmixMatrixService::from_source(ontology_source(config.ontology_dir.clone()))
        .context("Failed to load downmix ontology")?;
    let layouts = service.ontology().layouts();
    if !layouts.contains(&source_layout) {
        bail!("Unknown source layout: {source_layout}");
    }
    if !layouts.contains(&config.target_layout_id) {
        bail!("Unknown target layout: {}", config.target_layout_id);
    }

    let engine = DownmixQaEngine::new(config);
    let report = engine.run(&args.src, &args.reference, &source_layout);

    let text = report
        .generate(args.format)
        .context("Failed to render downmix QA report")?;
    emit(&text, args.out.as_deref())?;

    if report.has_blocking_issues() {
        log::warn!(
            "downmix QA found blocking issues (max severity {})",
            report.max_severity().unwrap_or_default()
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHOW / LIST
// ═══════════════════════════════════════════════════════════════════════════════

fn show_matrix(args: ShowArgs) -> Result<()> {
    let service = DownmixMatrixService::from_source(ontology_source(args.ontology))
        .context("Failed to load downmix ontology")?;
    let matrix = service.resolve_matrix(&args.source, &args.target, args.policy.as_deref())?;
    let text = render_matrix(&matrix, args.format)?;
    emit(&text, args.out.as_deref())
}

fn list_registry(args: ListArgs) -> Result<()> {
    let service = DownmixMatrixService::from_source(ontology_source(args.ontology))
        .context("Failed to load downmix ontology")?;
    let ontology = service.ontology();

    // no flag lists everything
    let all = !(args.layouts || args.policies || args.conversions);
    let mut listing = serde_json::Map::new();

    if all || args.layouts {
        let layouts: Vec<&str> = ontology.layouts().ids().collect();
        listing.insert("layouts".into(), serde_json::to_value(layouts)?);
    }
    if all || args.policies {
        let policies = ontology.registry().list_policy_ids();
        listing.insert("policies".into(), serde_json::to_value(policies)?);
    }
    if all || args.conversions {
        let conversions = ontology.registry().list_conversions();
        listing.insert("conversions".into(), serde_json::to_value(conversions)?);
    }

    emit(&serde_json::to_string_pretty(&listing)?, None)
}
