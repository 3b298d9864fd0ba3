use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "oddcrawler", about = "Polite crawler that hunts down odd corners of the web")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start (or resume) a crawl run
    Run {
        /// Seed URLs, comma-separated
        #[arg(short, long, value_delimiter = ',')]
        seeds: Option<Vec<String>>,

        /// Path to a newline-delimited seed file
        #[arg(long)]
        seed_file: Option<String>,

        /// Stop after this many pages (unbounded if omitted)
        #[arg(short, long)]
        max_pages: Option<u64>,
    },
    /// Print the run's metrics summary and exit
    Status {
        /// Run directory to read (defaults to the configured run_dir)
        #[arg(long)]
        run_dir: Option<String>,
    },
}
