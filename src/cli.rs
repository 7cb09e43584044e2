use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "feed-forge", about)]
pub struct Cli {
    /// Where to load config from
    #[arg(long, value_enum, default_value_t = ConfigSource::File)]
    pub config: ConfigSource,

    /// Tokio worker threads
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,

    /// Run a single feed type once and exit, instead of starting the server + scheduler.
    #[arg(long)]
    pub run_once: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ConfigSource {
    Env,
    File,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
