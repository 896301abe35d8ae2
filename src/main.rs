use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::*;
use pdfgather::{
    output_file_path, Error, PdfMerger, Pipeline, PipelineConfig, Settings, SourceReference,
    StorageMode, DEFAULT_DOWNLOAD_DIR, DEFAULT_OUTPUT_NAME, MAX_DIRECT_URLS,
};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdfgather")]
#[command(about = "Collect the PDFs linked from a web page, or a list of PDF URLs, into a single merged PDF")]
#[command(version)]
struct Args {
    /// Settings file to use instead of the one in the user config directory
    #[arg(long = "settings", global = true)]
    settings_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a page for .pdf links, download them and merge them in page order
    Scrape {
        /// URL of the page to scrape
        url: String,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Download PDFs from the given URLs and merge them in the order given
    Urls {
        /// Direct PDF URLs (up to 40)
        #[arg(required = true, num_args = 1..=MAX_DIRECT_URLS)]
        urls: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Merge existing PDF files into a single document
    Merge {
        /// PDF files, in merge order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file path for the merged PDF
        #[arg(short = 'o', long = "output", default_value = DEFAULT_OUTPUT_NAME)]
        output_file: PathBuf,
    },
    /// Show or change persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(ClapArgs)]
struct OutputArgs {
    /// Full output path for the merged PDF
    #[arg(short = 'o', long = "output", conflicts_with_all = ["name", "dir"])]
    output: Option<PathBuf>,

    /// Output file name; forbidden characters are removed and .pdf is appended
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Directory for the merged PDF (defaults to the saved default location)
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,
}

#[derive(ClapArgs)]
struct FetchArgs {
    /// Keep downloads on disk or in memory [default: disk for scrape, memory for urls]
    #[arg(long = "storage")]
    storage: Option<StorageMode>,

    /// Directory downloaded PDFs are written to with --storage disk
    #[arg(long = "download-dir", default_value = DEFAULT_DOWNLOAD_DIR)]
    download_dir: PathBuf,

    /// Reject downloads whose Content-Type does not mention pdf
    #[arg(long = "validate", conflicts_with = "no_validate")]
    validate: bool,

    /// Accept downloads regardless of their Content-Type
    #[arg(long = "no-validate")]
    no_validate: bool,

    /// Number of downloads to run at once
    #[arg(short = 'j', long = "jobs", default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
    jobs: u16,

    /// Request timeout in seconds (0 disables the timeout)
    #[arg(short = 't', long = "timeout", default_value = "30.0", value_parser = parse_timeout)]
    timeout: Duration,
}

impl FetchArgs {
    fn config(&self, default_storage: StorageMode, default_validate: bool) -> PipelineConfig {
        let validate_content_type = if self.validate {
            true
        } else if self.no_validate {
            false
        } else {
            default_validate
        };

        PipelineConfig {
            storage: self.storage.unwrap_or(default_storage),
            download_dir: self.download_dir.clone(),
            validate_content_type,
            jobs: usize::from(self.jobs),
            timeout: self.timeout,
        }
    }
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show,
    /// Remember a default directory for merged PDFs
    SetSavePath {
        /// Directory merged PDFs are saved to when no --dir or --output is given
        dir: PathBuf,
    },
    /// Forget the default directory
    ClearSavePath,
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if !value.is_finite() || value < 0.0 {
        return Err("Must be zero or positive number.".to_string());
    }
    Duration::try_from_secs_f64(value).map_err(|_| "Timeout is too large.".to_string())
}

fn resolve_output_path(args: &OutputArgs, settings: &Settings) -> Result<PathBuf> {
    if let Some(path) = &args.output {
        return Ok(path.clone());
    }

    let dir = args
        .dir
        .clone()
        .or_else(|| settings.default_save_path.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let name = args.name.as_deref().unwrap_or(DEFAULT_OUTPUT_NAME);

    Ok(output_file_path(name, &dir)?)
}

async fn run_pipeline(
    source: SourceReference,
    config: PipelineConfig,
    output: &OutputArgs,
    settings_path: &Path,
) -> Result<()> {
    let settings = Settings::load(settings_path).await?;
    let output_path = resolve_output_path(output, &settings)?;

    debug!(
        "Running with storage={} validate={} jobs={}",
        config.storage, config.validate_content_type, config.jobs
    );

    let pipeline = Pipeline::new(config)?;
    let result = pipeline.run(&source, &output_path).await?;

    info!(
        "Merged PDF saved as: {} ({} files, {} pages)",
        result.output_path.display().to_string().green(),
        result.documents,
        result.pages
    );
    Ok(())
}

async fn merge_files(files: &[PathBuf], output_file: &Path) -> Result<()> {
    info!("Found {} PDF files to merge:", files.len());
    for (i, path) in files.iter().enumerate() {
        info!("  {}: {}", i + 1, path.display().to_string().blue());
    }

    let mut merger = PdfMerger::new();
    for path in files {
        merger.add_pdf(path).await?;
    }

    let result = merger.save(output_file).await?;
    info!(
        "Successfully merged {} PDFs into: {}",
        result.documents,
        result.output_path.display().to_string().green()
    );
    Ok(())
}

async fn settings_command(action: SettingsAction, settings_path: &Path) -> Result<()> {
    let mut settings = Settings::load(settings_path).await?;

    match action {
        SettingsAction::Show => {
            println!("Settings file: {}", settings_path.display());
            match &settings.default_save_path {
                Some(dir) => println!("default_save_path = {}", dir.display()),
                None => println!("default_save_path is not set"),
            }
            if let Some(geometry) = &settings.window_geometry {
                println!("window_geometry = {}", geometry);
            }
            return Ok(());
        }
        SettingsAction::SetSavePath { dir } => {
            if !dir.is_dir() {
                bail!("'{}' is not a directory", dir.display());
            }
            let dir = dir
                .canonicalize()
                .with_context(|| format!("Failed to resolve '{}'", dir.display()))?;
            info!("Default save location set to: {}", dir.display().to_string().green());
            settings.default_save_path = Some(dir);
        }
        SettingsAction::ClearSavePath => {
            info!("Default save location cleared");
            settings.default_save_path = None;
        }
    }

    settings.save(settings_path).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env()
        .add_directive("pdfgather=info".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();
    let settings_path = args.settings_file.unwrap_or_else(Settings::default_path);

    let result = match args.command {
        Commands::Scrape { url, output, fetch } => {
            let config = fetch.config(StorageMode::Disk, false);
            run_pipeline(SourceReference::Page(url), config, &output, &settings_path).await
        }
        Commands::Urls { urls, output, fetch } => {
            let config = fetch.config(StorageMode::Memory, true);
            run_pipeline(SourceReference::DirectUrls(urls), config, &output, &settings_path).await
        }
        Commands::Merge { files, output_file } => merge_files(&files, &output_file).await,
        Commands::Settings { action } => settings_command(action, &settings_path).await,
    };

    if let Err(e) = result {
        if let Some(err) = e.downcast_ref::<Error>() {
            if err.is_recoverable() {
                warn!("{}", err.to_string().yellow());
                return;
            }
        }
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}
