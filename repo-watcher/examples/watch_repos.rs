//! Watch a few repositories and print a line whenever one of them changes.
//!
//! Usage: cargo run -p repo-watcher --example watch_repos -- ~/src/a ~/src/b

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use repo_watcher::{Delivery, RepoWatcher, WatchConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Args {
    /// Repository roots to watch.
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// Quiet period before a burst is reported, in milliseconds.
    #[arg(long, default_value_t = 500)]
    debounce_ms: u64,

    /// Do not watch `.git/index` and `.git/HEAD`.
    #[arg(long)]
    no_metadata: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = WatchConfig::default()
        .with_debounce(Duration::from_millis(args.debounce_ms))
        .track_metadata(!args.no_metadata);

    let watcher = RepoWatcher::new(config)?;
    watcher.start();
    for root in &args.roots {
        watcher.register(root).await?;
    }
    println!("Watching {} repos (Ctrl-C to stop)", watcher.roots().await.len());

    let consumer = watcher.consumer();
    let mut next_change = Box::pin(consumer.next_notification());
    let mut next_error = Box::pin(consumer.next_error());
    loop {
        tokio::select! {
            change = &mut next_change => match change {
                Delivery::Item(change) => {
                    println!(
                        "{} [{}] {}",
                        change.fired_at.format("%H:%M:%S%.3f"),
                        change.root.display(),
                        change.relative_path().display(),
                    );
                    next_change = Box::pin(consumer.next_notification());
                }
                Delivery::Closed => break,
            },
            error = &mut next_error => match error {
                Delivery::Item(error) => {
                    eprintln!("watch error: {error}");
                    next_error = Box::pin(consumer.next_error());
                }
                Delivery::Closed => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watcher.close().await?;
    let stats = watcher.stats().await;
    println!("Stopped after watching {} paths", stats.watched_paths);
    Ok(())
}
