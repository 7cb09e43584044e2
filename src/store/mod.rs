//! State store adapter (SPEC_FULL.md §4.5): persists `Generation` records in
//! Redis and bridges the `generation.updated` / `<id>.canceled` Redis
//! Pub/Sub channels to in-process subscribers.

pub mod keys;

use crate::error::{AppError, AppResult};
use crate::model::Generation;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::time::timeout;

/// How often a pub/sub receive loop must ping the connection to keep it alive
/// (SPEC_FULL.md §5). Hard-coded per §9's Open Question decision.
pub const STORE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct StateStore {
    client: redis::Client,
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl StateStore {
    pub async fn connect(uri: &str, command_timeout: Duration) -> AppResult<Self> {
        let client = redis::Client::open(uri)
            .map_err(|e| AppError::InvalidConfig(format!("invalid redis uri '{uri}': {e}")))?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            manager,
            command_timeout,
        })
    }

    pub async fn store(&self, g: &Generation) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let key = keys::generation_hash_key(&g.id);
        self.with_timeout(async {
            conn.sadd::<_, _, ()>(keys::GENERATION_IDS_SET, &g.id)
                .await?;
            write_fields(&mut conn, &key, g).await
        })
        .await
    }

    pub async fn get(&self, id: &str) -> AppResult<Generation> {
        let mut conn = self.manager.clone();
        let key = keys::generation_hash_key(id);
        self.with_timeout(async {
            let fields: std::collections::HashMap<String, String> = conn.hgetall(&key).await?;
            read_generation(id, &fields)
        })
        .await
    }

    pub async fn list(&self) -> AppResult<Vec<Generation>> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = self
            .with_timeout(async { conn.smembers(keys::GENERATION_IDS_SET).await })
            .await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.get(&id).await?);
        }
        Ok(out)
    }

    /// Marks a generation's select query as having started, without
    /// touching any field owned by another worker (SPEC_FULL.md §5: each
    /// field has exactly one writer).
    pub async fn set_data_fetched(&self, id: &str) -> AppResult<()> {
        let key = keys::generation_hash_key(id);
        self.hset_and_publish(&key, id, "data_fetched", true).await
    }

    /// Writes the fetcher-owned `progress` field (and `end_time`, set by the
    /// same worker once progress reaches 100).
    pub async fn set_progress(
        &self,
        id: &str,
        progress: u32,
        end_time: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let key = keys::generation_hash_key(id);
        self.with_timeout(async {
            conn.hset::<_, _, _, ()>(&key, "progress", progress).await?;
            if let Some(end) = end_time {
                conn.hset::<_, _, _, ()>(&key, "end_time", end.timestamp())
                    .await?;
            }
            conn.publish::<_, _, ()>(keys::GENERATION_UPDATED_CHANNEL, id)
                .await?;
            Ok::<(), redis::RedisError>(())
        })
        .await
    }

    /// Writes the uploader-owned `files_uploaded` field.
    pub async fn set_files_uploaded(&self, id: &str, files_uploaded: u32) -> AppResult<()> {
        let key = keys::generation_hash_key(id);
        self.hset_and_publish(&key, id, "files_uploaded", files_uploaded)
            .await
    }

    async fn hset_and_publish(
        &self,
        key: &str,
        id: &str,
        field: &str,
        value: impl redis::ToSingleRedisArg + Send + Sync,
    ) -> AppResult<()> {
        let mut conn = self.manager.clone();
        self.with_timeout(async {
            conn.hset::<_, _, _, ()>(key, field, value).await?;
            conn.publish::<_, _, ()>(keys::GENERATION_UPDATED_CHANNEL, id)
                .await?;
            Ok::<(), redis::RedisError>(())
        })
        .await
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let key = keys::generation_hash_key(id);
        self.with_timeout(async { conn.del::<_, ()>(&key).await.map_err(AppError::from) })
            .await
    }

    pub async fn cancel(&self, id: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let key = keys::generation_hash_key(id);
        self.with_timeout(async {
            conn.hset::<_, _, _, ()>(&key, "is_canceled", true).await?;
            conn.publish::<_, _, ()>(keys::generation_canceled_channel(id), 1)
                .await?;
            Ok::<(), redis::RedisError>(())
        })
        .await
    }

    /// Subscribes to `<id>.canceled` and invokes `cb` exactly once on the
    /// first message, pinging a side connection every
    /// [`STORE_KEEPALIVE_INTERVAL`] while waiting.
    pub async fn on_canceled(
        &self,
        cancel: tokio_util::sync::CancellationToken,
        id: &str,
        mut cb: impl FnMut() + Send,
    ) -> AppResult<()> {
        use futures_util::StreamExt;
        let channel = keys::generation_canceled_channel(id);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        let mut keepalive = self.manager.clone();
        let mut messages = pubsub.into_on_message();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(STORE_KEEPALIVE_INTERVAL) => {
                    let _: Result<String, _> = redis::cmd("PING").query_async(&mut keepalive).await;
                }
                msg = messages.next() => {
                    if msg.is_some() {
                        cb();
                        return Ok(());
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Subscribes to `generation.updated`; for every message, loads the
    /// referenced generation and invokes `cb`. Runs until `cancel` fires.
    pub async fn on_updated(
        &self,
        cancel: tokio_util::sync::CancellationToken,
        mut cb: impl FnMut(Generation) + Send,
    ) -> AppResult<()> {
        use futures_util::StreamExt;
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(keys::GENERATION_UPDATED_CHANNEL).await?;
        let mut keepalive = self.manager.clone();
        let mut messages = pubsub.into_on_message();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(STORE_KEEPALIVE_INTERVAL) => {
                    let _: Result<String, _> = redis::cmd("PING").query_async(&mut keepalive).await;
                }
                msg = messages.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let id: String = msg.get_payload()?;
                    let g = self.get(&id).await?;
                    cb(g);
                }
            }
        }
    }

    async fn with_timeout<T, E: Into<AppError>>(
        &self,
        fut: impl std::future::Future<Output = Result<T, E>>,
    ) -> AppResult<T> {
        timeout(self.command_timeout, fut)
            .await
            .map_err(|_| {
                AppError::Redis(redis::RedisError::from((
                    redis::ErrorKind::Io,
                    "state store command timed out",
                )))
            })?
            .map_err(Into::into)
    }
}

async fn write_fields(
    conn: &mut ConnectionManager,
    key: &str,
    g: &Generation,
) -> Result<(), redis::RedisError> {
    let mut items: Vec<(&str, String)> = vec![
        ("id", g.id.clone()),
        ("type", g.feed_type.clone()),
        ("progress", g.progress.to_string()),
        ("data_fetched", g.data_fetched.to_string()),
        ("files_uploaded", g.files_uploaded.to_string()),
        ("is_canceled", g.is_canceled.to_string()),
        ("start_time", g.start_time.timestamp().to_string()),
    ];
    if let Some(end) = g.end_time {
        items.push(("end_time", end.timestamp().to_string()));
    }
    conn.hset_multiple(key, &items).await
}

fn read_generation(
    id: &str,
    fields: &std::collections::HashMap<String, String>,
) -> AppResult<Generation> {
    if fields.is_empty() {
        return Err(AppError::GenerationNotFound { id: id.to_string() });
    }
    let parse_ts = |s: &str| -> AppResult<DateTime<Utc>> {
        s.parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| AppError::InvalidTimestamp { id: id.to_string() })
    };

    Ok(Generation {
        id: id.to_string(),
        feed_type: fields.get("type").cloned().unwrap_or_default(),
        progress: fields
            .get("progress")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        data_fetched: fields
            .get("data_fetched")
            .map(|s| s == "true")
            .unwrap_or(false),
        files_uploaded: fields
            .get("files_uploaded")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        is_canceled: fields
            .get("is_canceled")
            .map(|s| s == "true")
            .unwrap_or(false),
        start_time: fields
            .get("start_time")
            .map(|s| parse_ts(s))
            .transpose()?
            .ok_or_else(|| AppError::InvalidTimestamp { id: id.to_string() })?,
        end_time: fields.get("end_time").map(|s| parse_ts(s)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_generation_rejects_unparseable_timestamp() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("type".to_string(), "orders".to_string());
        fields.insert("start_time".to_string(), "not-a-number".to_string());
        let err = read_generation("abc", &fields).unwrap_err();
        assert!(matches!(err, AppError::InvalidTimestamp { .. }));
    }

    #[test]
    fn read_generation_missing_entirely_is_not_found() {
        let fields = std::collections::HashMap::new();
        let err = read_generation("abc", &fields).unwrap_err();
        assert!(matches!(err, AppError::GenerationNotFound { .. }));
    }
}
