mod appconfig;
mod broadcaster;
mod cli;
mod coordinator;
mod error;
mod fetcher;
mod http;
mod model;
mod registry;
mod scheduler;
mod shard;
mod store;
#[cfg(test)]
mod tests;
mod uploader;

use crate::appconfig::AppConfig;
use crate::coordinator::Coordinator;
use crate::error::AppResult;
use crate::registry::FeedTypeRegistry;
use crate::scheduler::Scheduler;
use crate::store::StateStore;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

fn main() -> AppResult<()> {
    let cli = cli::Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.workers)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(run(cli))
}

async fn run(cli: cli::Cli) -> AppResult<()> {
    let cfg = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cfg.logging.level))
        .init();

    tracing::info!(id = %cfg.id, env = %cfg.env, "starting feed-forge");

    let registry = Arc::new(FeedTypeRegistry::build(&cfg.feed_types).await?);

    let redis_url = std::env::var(&cfg.store.url_env)
        .expect("store.url_env validated at config load time");
    let store = Arc::new(
        StateStore::connect(
            &redis_url,
            Duration::from_secs(cfg.store.keepalive_interval_sec),
        )
        .await?,
    );

    let broadcaster = broadcaster::spawn();

    let ftp_user = std::env::var(&cfg.ftp.user_env).expect("ftp.user_env validated at load time");
    let ftp_password =
        std::env::var(&cfg.ftp.password_env).expect("ftp.password_env validated at load time");

    let coordinator = Arc::new(Coordinator::new(
        registry.clone(),
        store.clone(),
        broadcaster.clone(),
        cfg.ftp.host.clone(),
        cfg.ftp.port,
        ftp_user,
        ftp_password,
    ));

    if let Some(feed_type) = cli.run_once {
        return coordinator.generate_feed(&feed_type).await;
    }

    let redis_client = redis::Client::open(redis_url.as_str())
        .map_err(|e| error::AppError::InvalidConfig(format!("invalid redis url: {e}")))?;
    let redis_manager = redis::aio::ConnectionManager::new(redis_client).await?;

    let generate_coordinator = coordinator.clone();
    let generate: scheduler::GenerateFn = Arc::new(move |feed_type: String| {
        let coordinator = generate_coordinator.clone();
        Box::pin(async move { coordinator.generate_feed(&feed_type).await })
    });

    let scheduler = Arc::new(Scheduler::new(redis_manager, generate).await?);
    scheduler.schedule_all_saved_generations().await?;
    scheduler.start().await?;

    let state = http::routes::AppState {
        coordinator,
        registry,
        store,
        scheduler,
        broadcaster,
    };

    http::serve(&cfg.http.bind_addr, state).await
}
