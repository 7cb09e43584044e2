//! Generation coordinator (SPEC_FULL.md §4.4): wires the fetch -> shard ->
//! upload pipeline for a single run, owns its cancellation, and keeps the
//! state store and broadcaster in sync with the run's lifecycle.

use crate::broadcaster::BroadcasterHandle;
use crate::error::{AppError, AppResult};
use crate::fetcher::DataFetcher;
use crate::model::Generation;
use crate::registry::FeedTypeRegistry;
use crate::shard::ShardWriter;
use crate::store::StateStore;
use crate::uploader::Uploader;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use suppaftp::AsyncFtpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Coordinator {
    registry: Arc<FeedTypeRegistry>,
    store: Arc<StateStore>,
    broadcaster: BroadcasterHandle,
    ftp_host: String,
    ftp_port: u16,
    ftp_user: String,
    ftp_password: String,
}

impl Coordinator {
    pub fn new(
        registry: Arc<FeedTypeRegistry>,
        store: Arc<StateStore>,
        broadcaster: BroadcasterHandle,
        ftp_host: String,
        ftp_port: u16,
        ftp_user: String,
        ftp_password: String,
    ) -> Self {
        Self {
            registry,
            store,
            broadcaster,
            ftp_host,
            ftp_port,
            ftp_user,
            ftp_password,
        }
    }

    pub async fn generate_feed(&self, feed_type: &str) -> AppResult<()> {
        self.registry.get(feed_type)?;
        let id = Uuid::new_v4().to_string();
        let g = Generation::new(id.clone(), feed_type.to_string(), Utc::now());
        self.store.store(&g).await?;
        self.run(g).await
    }

    pub async fn restart_generation(&self, id: &str) -> AppResult<()> {
        let mut g = self.store.get(id).await?;
        self.registry.get(&g.feed_type)?;
        g.reset();
        self.store.store(&g).await?;
        self.run(g).await
    }

    async fn run(&self, g: Generation) -> AppResult<()> {
        let entry = self.registry.get(&g.feed_type)?;
        let cancel = CancellationToken::new();
        let generation_id = g.id.clone();

        let watch_cancel = cancel.clone();
        let watch_store = self.store.clone();
        let watch_id = generation_id.clone();
        let cancel_watch = tokio::spawn(async move {
            let _ = watch_store
                .on_canceled(watch_cancel.clone(), &watch_id, || {
                    watch_cancel.cancel();
                })
                .await;
        });

        let shared = Arc::new(Mutex::new(g));

        let (records_tx, records_rx) = mpsc::channel(64);
        let (shards_tx, shards_rx) = mpsc::channel(8);

        let pool = entry.pool.clone();
        let feed_type = entry.feed_type.clone();
        let store_fetch = self.store.clone();
        let broadcaster_fetch = self.broadcaster.clone();
        let shared_fetch = shared.clone();
        let cancel_fetch = cancel.clone();
        let id_fetch = generation_id.clone();
        let fetch_task = tokio::spawn(async move {
            let shared_data_fetched = shared_fetch.clone();
            let store_data_fetched = store_fetch.clone();
            let broadcaster_data_fetched = broadcaster_fetch.clone();

            let shared_progress = shared_fetch.clone();
            let store_progress = store_fetch.clone();
            let broadcaster_progress = broadcaster_fetch.clone();

            let id_data_fetched = id_fetch.clone();
            let id_progress = id_fetch.clone();
            let mut fetcher = DataFetcher::new(
                &feed_type,
                &pool,
                move || {
                    // Mutate only the field this worker owns, under a single
                    // lock acquisition, then snapshot for the broadcast.
                    let snapshot = {
                        let mut g = shared_data_fetched.lock().unwrap();
                        g.data_fetched = true;
                        g.clone()
                    };
                    let id = id_data_fetched.clone();
                    let store = store_data_fetched.clone();
                    let broadcaster = broadcaster_data_fetched.clone();
                    tokio::spawn(async move {
                        if store.set_data_fetched(&id).await.is_ok() {
                            let _ = broadcaster.broadcast_generation(&snapshot).await;
                        }
                    });
                },
                move |pct| {
                    let (progress, end_time, snapshot) = {
                        let mut g = shared_progress.lock().unwrap();
                        g.set_progress(pct, Utc::now());
                        (g.progress, g.end_time, g.clone())
                    };
                    let id = id_progress.clone();
                    let store = store_progress.clone();
                    let broadcaster = broadcaster_progress.clone();
                    tokio::spawn(async move {
                        if store.set_progress(&id, progress, end_time).await.is_ok() {
                            let _ = broadcaster.broadcast_generation(&snapshot).await;
                        }
                    });
                },
            );
            fetcher.stream_data(records_tx, cancel_fetch).await
        });

        let size_limit = entry.feed_type.size_limit_bytes;
        let line_limit = entry.feed_type.line_limit;
        let cancel_format = cancel.clone();
        let format_task = tokio::spawn(async move {
            let writer = ShardWriter::new(size_limit, line_limit);
            writer.run(records_rx, shards_tx, cancel_format).await
        });

        let ftp_host = self.ftp_host.clone();
        let ftp_port = self.ftp_port;
        let ftp_user = self.ftp_user.clone();
        let ftp_password = self.ftp_password.clone();
        let feed_type_upload = entry.feed_type.clone();
        let shared_upload = shared.clone();
        let store_upload = self.store.clone();
        let broadcaster_upload = self.broadcaster.clone();
        let cancel_upload = cancel.clone();
        let id_upload_task = generation_id.clone();
        let upload_task = tokio::spawn(async move {
            let mut ftp = AsyncFtpStream::connect(format!("{ftp_host}:{ftp_port}")).await?;
            ftp.login(&ftp_user, &ftp_password).await?;

            let shared_cb = shared_upload.clone();
            let store_cb = store_upload.clone();
            let broadcaster_cb = broadcaster_upload.clone();
            let id_upload = id_upload_task.clone();
            let mut uploader = Uploader::new(&feed_type_upload, &mut ftp, move |n| {
                let (files_uploaded, snapshot) = {
                    let mut g = shared_cb.lock().unwrap();
                    g.files_uploaded = n.max(g.files_uploaded);
                    (g.files_uploaded, g.clone())
                };
                let id = id_upload.clone();
                let store = store_cb.clone();
                let broadcaster = broadcaster_cb.clone();
                tokio::spawn(async move {
                    if store.set_files_uploaded(&id, files_uploaded).await.is_ok() {
                        let _ = broadcaster.broadcast_generation(&snapshot).await;
                    }
                });
            });
            uploader.upload_files(shards_rx, cancel_upload).await
        });

        let (fetch_res, format_res, upload_res) =
            tokio::join!(fetch_task, format_task, upload_task);
        cancel.cancel();
        cancel_watch.abort();

        let results = [
            fetch_res.map_err(AppError::from).and_then(|r| r),
            format_res.map_err(AppError::from).and_then(|r| r),
            upload_res.map_err(AppError::from).and_then(|r| r),
        ];

        results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
    }

    pub async fn cancel(&self, id: &str) -> AppResult<()> {
        self.store.cancel(id).await
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn first_error_among_stages_wins() {
        let results: [Result<(), &str>; 3] = [Ok(()), Err("boom"), Ok(())];
        let first_err = results.into_iter().find(Result::is_err);
        assert_eq!(first_err, Some(Err("boom")));
    }
}
