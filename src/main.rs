mod analyst;
mod cli;
mod config;
mod run_loop;
mod seeds;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use oddcrawler_fetcher::{Fetcher, HttpFetcher, RetryPolicy};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use crate::cli::{Cli, Commands};
use crate::run_loop::RunLoop;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(32)
        .thread_stack_size(8 * 1024 * 1024)
        .max_blocking_threads(512)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let app_config = config::load(&cli.config)?;

    match cli.command {
        Commands::Run { seeds: seed_list, seed_file, max_pages } => {
            let fetch_config = oddcrawler_core::FetchConfig {
                timeout: std::time::Duration::from_secs(app_config.general.download_timeout_seconds),
                max_body_size: app_config.general.max_body_size_mb * 1024 * 1024,
                follow_redirects: true,
                user_agent: app_config.general.user_agent.clone(),
            };
            let socks_proxy =
                if app_config.tor.enabled { Some(app_config.tor.socks_proxy.as_str()) } else { None };
            let fetcher: Arc<dyn Fetcher> =
                Arc::new(HttpFetcher::new(fetch_config, RetryPolicy::default(), true, socks_proxy)?);

            let stop = Arc::new(AtomicBool::new(false));
            register_shutdown(stop.clone());

            let mut run_loop = RunLoop::new(app_config, fetcher, stop)?;

            let mut seeds = Vec::new();
            if let Some(path) = &seed_file {
                seeds.extend(seeds::load_seed_file(std::path::Path::new(path))?);
            }
            if let Some(list) = seed_list {
                seeds.extend(list);
            }
            if seeds.is_empty() {
                seeds = seeds::default_seeds();
            }
            run_loop.add_seeds(&seeds);

            info!(seed_count = seeds.len(), max_pages = ?max_pages, "starting crawl");
            run_loop.run(max_pages).await?;
        }
        Commands::Status { run_dir } => {
            let dir = run_dir.unwrap_or(app_config.general.run_dir.clone());
            let summary_path = oddcrawler_storage::summary_path(std::path::Path::new(&dir));
            match std::fs::read_to_string(&summary_path) {
                Ok(contents) => println!("{contents}"),
                Err(err) => eprintln!("no summary at {}: {err}", summary_path.display()),
            }
        }
    }

    Ok(())
}

fn register_shutdown(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop signal received, finishing current page and checkpointing");
            stop.store(true, Ordering::Relaxed);
        }
    });
}
