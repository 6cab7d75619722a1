//! coreg CLI: correlates a master and a slave image and exports tie points.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use common::{get_file_extension, setup_logging, SerdeFormat};
use coreg::{Correlator, CorrelatorConfig, ImageFileOpener, Keywordlist, Parameters};

/// Keyword prefix of the correlator parameters in `.kwl` files.
const KEYWORD_PREFIX: &str = "correlator";

#[derive(Parser)]
#[command(name = "coreg")]
#[command(about = "Find tie points between two geo-referenced images")]
#[command(version)]
struct Cli {
    /// Job description: `.kwl` keyword list, `.yaml` or `.json`.
    config: PathBuf,

    /// Override a parameter, e.g. `--set min_score=0.8` or
    /// `--set rejection.ransac.seed=7`. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    overrides: Vec<String>,

    /// Write the effective configuration to this file and exit.
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Tile edge used when decoding input files.
    #[arg(long, default_value = "256")]
    tile_size: usize,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write daily rolling log files here.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn load_config(path: &Path) -> anyhow::Result<CorrelatorConfig> {
    if get_file_extension(path).is_some_and(|ext| ext.eq_ignore_ascii_case("kwl")) {
        let kwl = Keywordlist::read_file(path)?;
        return Ok(CorrelatorConfig::load_state(&kwl, KEYWORD_PREFIX)?);
    }
    let format = SerdeFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    let config: CorrelatorConfig = format.deserialize(&text)?;
    config.validate()?;
    Ok(config)
}

fn save_config(config: &CorrelatorConfig, path: &Path) -> anyhow::Result<()> {
    if get_file_extension(path).is_some_and(|ext| ext.eq_ignore_ascii_case("kwl")) {
        let mut kwl = Keywordlist::new();
        config.save_state(&mut kwl, KEYWORD_PREFIX)?;
        kwl.write_file(path)?;
    } else {
        std::fs::write(path, SerdeFormat::from_path(path)?.serialize(config)?)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.log_dir.as_deref())?;

    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load job {}", cli.config.display()))?;
    for item in &cli.overrides {
        let Some((name, value)) = item.split_once('=') else {
            bail!("Override {item:?} is not NAME=VALUE");
        };
        config
            .set_parameter(name.trim(), value.trim())
            .with_context(|| format!("Invalid override {item:?}"))?;
    }

    if let Some(path) = &cli.dump_config {
        save_config(&config, path)?;
        tracing::info!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    let opener = ImageFileOpener::new(cli.tile_size.max(1));
    let report = Correlator::new(config, Box::new(opener))?.run()?;

    tracing::info!(
        "Processed {}/{} tiles, {} tie points, {} exported",
        report.tie_gen.tiles_processed,
        report.tie_gen.tiles_total,
        report.tie_gen.tie_count,
        report.ties.len()
    );
    if let Some(stats) = &report.stats {
        tracing::info!("Displacement: {}", stats);
    }
    match &report.rejection {
        Some(Ok(outcome)) => tracing::info!(
            "Outlier rejection kept {} of {} points, variance {:.4} px^2",
            outcome.inliers,
            outcome.inliers + outcome.outliers,
            outcome.variance
        ),
        Some(Err(err)) => tracing::warn!("Outlier rejection failed: {}", err),
        None => {}
    }
    Ok(())
}
