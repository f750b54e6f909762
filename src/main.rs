use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use tracing::info;

use xrai::{Architecture, DiagnosisEngine, EnsembleReport, ExplainabilityArtifact, Settings};

/// Command line interface for the diagnosis engine.
///
/// Runs the ensemble or the explainability pass against a single image
/// file and prints the result as a table or as JSON for downstream
/// collaborators.
#[derive(Parser)]
#[command(name = "xrai", about = "X-ray ensemble diagnosis and explainability engine")]
struct Cli {
    /// Emit JSON instead of a human-readable table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full ensemble against an image and print the report
    Run {
        /// Path to the radiograph (PNG/JPEG/BMP/TIFF)
        image: PathBuf,
    },
    /// Compute explainability maps for one architecture
    Explain {
        /// Path to the radiograph
        image: PathBuf,
        /// Architecture slug (e.g. resnet50, coatnet_hybrid)
        architecture: Architecture,
    },
    /// List the registered architectures and artifact availability
    Models,
}

fn main() -> anyhow::Result<()> {
    // Load settings first
    let settings = Settings::new()?;

    // Initialize the subscriber first, before any engine work
    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        settings
            .logging
            .file
            .as_deref()
            .unwrap_or_else(|| Path::new("logs")),
        "xrai",
    );

    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        // Disable ANSI colors for cleaner log files
        .with_ansi(false)
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_max_level(parse_level(&settings.logging.level))
        .init();

    info!("xrai starting up");
    info!(models_dir = %settings.models.directory.display(), "settings loaded");

    let cli = Cli::parse();
    let engine = DiagnosisEngine::new(settings);

    match cli.command {
        Command::Run { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading image {}", image.display()))?;
            let report = engine.run(&bytes)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Command::Explain {
            image,
            architecture,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading image {}", image.display()))?;
            let artifact = engine.explain(&bytes, architecture)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&artifact)?);
            } else {
                print_artifact(&artifact);
            }
        }
        Command::Models => {
            let statuses = engine.registry().scan_store();
            if cli.json {
                let rows: Vec<_> = statuses
                    .iter()
                    .map(|(spec, available)| {
                        serde_json::json!({
                            "architecture": spec.architecture.slug(),
                            "resolution": spec.input_resolution,
                            "dual_branch": spec.supports_dual_branch,
                            "footprint_bytes": spec.memory_footprint,
                            "available": available,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_models(&statuses);
            }
        }
    }

    Ok(())
}

fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

fn print_report(report: &EnsembleReport) {
    println!(
        "Prediction {}: {} (confidence {:.4}, agreement {:.3})",
        report.id, report.label, report.confidence, report.agreement_ratio
    );

    let mut table = Table::new();
    table
        .set_header(vec![
            Cell::new("Architecture").add_attribute(Attribute::Bold),
            Cell::new("Label").add_attribute(Attribute::Bold),
            Cell::new("Probability").add_attribute(Attribute::Bold),
            Cell::new("Duration (ms)").add_attribute(Attribute::Bold),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for verdict in &report.verdicts {
        table.add_row(vec![
            verdict.architecture.to_string(),
            verdict.label.clone(),
            format!("{:.4}", verdict.probabilities[verdict.label_index]),
            verdict.duration_ms.to_string(),
        ]);
    }
    println!("{table}");

    for failure in &report.failures {
        println!("failed: {} ({})", failure.architecture, failure.reason);
    }
}

fn print_artifact(artifact: &ExplainabilityArtifact) {
    println!(
        "{} explains '{}': {}x{} class-activation map",
        artifact.architecture,
        artifact.predicted_label,
        artifact.class_activation.width,
        artifact.class_activation.height
    );
    if let (Some(attention), Some(blend)) = (&artifact.attention, artifact.blend_weight) {
        println!(
            "dual-branch: {}x{} attention map, fused with blend weight {:.2}",
            attention.width, attention.height, blend
        );
    }
}

fn print_models(statuses: &[(xrai::ModelSpec, bool)]) {
    let mut table = Table::new();
    table
        .set_header(vec![
            Cell::new("Architecture").add_attribute(Attribute::Bold),
            Cell::new("Resolution").add_attribute(Attribute::Bold),
            Cell::new("Dual-branch").add_attribute(Attribute::Bold),
            Cell::new("Footprint (MB)").add_attribute(Attribute::Bold),
            Cell::new("Artifact").add_attribute(Attribute::Bold),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for (spec, available) in statuses {
        table.add_row(vec![
            spec.architecture.to_string(),
            format!("{0}x{0}", spec.input_resolution),
            if spec.supports_dual_branch { "yes" } else { "no" }.to_string(),
            format!("{}", spec.memory_footprint / (1024 * 1024)),
            if *available { "present" } else { "missing" }.to_string(),
        ]);
    }
    println!("{table}");
}
