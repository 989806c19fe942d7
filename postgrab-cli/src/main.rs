mod cli;
mod config;
mod error;
mod output;

use crate::{
    cli::{Args, Commands, OutputFormat},
    config::AppConfig,
    error::{AppError, Result},
    output::OutputManager,
};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use postgrab::Scraper;
use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    process,
};
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let output_format = args.command.output_format();

    if let Err(e) = run(args).await {
        match output_format {
            Some(OutputFormat::Json) | Some(OutputFormat::JsonCompact) => {
                let error_json = serde_json::json!({
                    "status": "error",
                    "message": e.to_string(),
                });
                println!("{error_json}");
            }
            _ => {
                error!("Application error: {}", e);
                #[cfg(feature = "colored-output")]
                {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                }
                #[cfg(not(feature = "colored-output"))]
                {
                    eprintln!("Error: {}", e);
                }
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    let config = AppConfig::load(args.config.as_deref())?;

    match &args.command {
        Commands::Fetch {
            urls,
            input,
            save_dir,
            output,
            concurrency,
        } => {
            let urls = collect_urls(urls, input.as_deref()).await?;
            let scraper = Scraper::new(config.to_scraper_config(&args)?)?;
            let concurrency = concurrency.unwrap_or(config.concurrency);
            fetch(&scraper, urls, save_dir.as_deref(), *output, concurrency).await
        }

        Commands::Config { show } => {
            if *show {
                println!("{}", config.show()?);
            } else {
                let path = args
                    .config
                    .clone()
                    .or_else(AppConfig::default_path)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(none)".to_string());
                println!("Configuration file: {path}");
                println!("Use --show to display the current configuration");
            }
            Ok(())
        }
    }
}

async fn fetch(
    scraper: &Scraper,
    urls: Vec<String>,
    save_dir: Option<&Path>,
    format: OutputFormat,
    concurrency: usize,
) -> Result<()> {
    let total = urls.len();
    info!(total, concurrency, "Fetching posts");

    let output = OutputManager::new(std::io::stdout().is_terminal());
    let results = scraper.fetch_posts(urls, concurrency).await;

    let mut failed = 0;
    for (index, (url, result)) in results.into_iter().enumerate() {
        match result {
            Ok(post) => {
                let saved: Vec<PathBuf> = match save_dir {
                    Some(dir) => output::save_media(dir, index + 1, &post.media).await?,
                    None => Vec::new(),
                };
                println!("{}", output.format_post(&url, &post, &saved, format)?);
            }
            Err(e) => {
                failed += 1;
                error!(%url, error = %e, "Failed to fetch post");
                println!("{}", output.format_failure(&url, &e.to_string(), format)?);
            }
        }
    }

    if failed > 0 {
        return Err(AppError::PartialFailure { failed, total });
    }
    Ok(())
}

/// Positional URLs followed by the non-empty, non-comment lines of `input`.
async fn collect_urls(urls: &[String], input: Option<&Path>) -> Result<Vec<String>> {
    let mut all: Vec<String> = urls.to_vec();
    if let Some(path) = input {
        let content = tokio::fs::read_to_string(path).await?;
        all.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }
    if all.is_empty() {
        return Err(AppError::InvalidInput(
            "no post URLs given; pass them as arguments or with --input".to_string(),
        ));
    }
    Ok(all)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}
