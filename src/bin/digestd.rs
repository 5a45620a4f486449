//! Daily digest runner.
//!
//! Collects the configured feeds, renders the digest document, and
//! dispatches it to every recipient. When delivery fails the digest is
//! saved locally so the run's output is never lost.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use digest_dispatch::digest::{self, DigestRenderer};
use digest_dispatch::{DigestConfig, Dispatcher, FeedCollector};

#[derive(Debug, Parser)]
#[command(
    name = "digestd",
    about = "Collects configured feeds and dispatches the daily digest"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Collect and render only; save the digest locally instead of sending.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "digest run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DigestConfig::from_path(&args.config)?;

    let collector = FeedCollector::new(&config.digest.user_agent)?;
    let topics = collector.collect(&config.feeds).await;
    tracing::info!(topics = topics.len(), "feeds collected");

    let renderer = DigestRenderer::new(config.digest.display_offset_hours);
    let rendered = renderer.render(&topics);

    if args.dry_run {
        let path = save_fallback(&config, &rendered.html)?;
        tracing::info!(path = %path.display(), "dry run, digest saved locally");
        return Ok(());
    }

    let messages = digest::to_messages(&rendered, &config.recipients)?;
    let dispatcher = Dispatcher::new(config.dispatch_config()?);

    match dispatcher.send_batch(messages).await {
        Ok(report) if report.is_complete() => {
            tracing::info!(
                delivered = report.delivered,
                total = report.total,
                took = ?report.duration,
                "digest dispatched"
            );
            Ok(())
        }
        Ok(report) => {
            let path = save_fallback(&config, &rendered.html)?;
            tracing::warn!(
                unresolved = report.unresolved.len(),
                path = %path.display(),
                "deliveries unresolved, digest saved locally"
            );
            Err(format!("{} deliveries unresolved", report.unresolved.len()).into())
        }
        Err(e) => {
            let path = save_fallback(&config, &rendered.html)?;
            tracing::error!(path = %path.display(), "dispatch aborted, digest saved locally");
            Err(e.into())
        }
    }
}

fn save_fallback(config: &DigestConfig, html: &str) -> std::io::Result<PathBuf> {
    let dir = &config.digest.fallback_dir;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "daily_digest_{}.html",
        chrono::Utc::now().format("%Y-%m-%d")
    ));
    std::fs::write(&path, html)?;
    Ok(path)
}
