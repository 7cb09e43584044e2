//! Feed-type registry / factory (SPEC_FULL.md §4.8).

use crate::appconfig::FeedTypeConfig;
use crate::error::{AppError, AppResult};
use crate::model::FeedType;
use arc_swap::ArcSwap;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

pub struct FeedTypeEntry {
    pub feed_type: FeedType,
    pub pool: PgPool,
}

/// Held behind an `ArcSwap` so the registry can be atomically rebuilt at
/// runtime; no operation in this crate currently triggers a rebuild, but the
/// seam matches how `AppConfig`-driven state is held elsewhere in this
/// codebase.
pub struct FeedTypeRegistry {
    entries: ArcSwap<HashMap<String, Arc<FeedTypeEntry>>>,
}

impl FeedTypeRegistry {
    pub async fn build(configs: &[FeedTypeConfig]) -> AppResult<Self> {
        let mut entries = HashMap::new();
        for cfg in configs {
            let dsn = std::env::var(&cfg.dsn_env).map_err(|_| {
                AppError::InvalidConfig(format!("environment variable '{}' not set", cfg.dsn_env))
            })?;
            let pool = PgPool::connect(&dsn).await?;
            let feed_type = FeedType {
                name: cfg.name.clone(),
                count_query: cfg.count_query.clone(),
                select_query: cfg.select_query.clone(),
                size_limit_bytes: cfg.size_limit_bytes,
                line_limit: cfg.line_limit,
                destination_dir: cfg.destination_dir.clone(),
            };
            entries.insert(
                cfg.name.clone(),
                Arc::new(FeedTypeEntry { feed_type, pool }),
            );
        }
        Ok(Self {
            entries: ArcSwap::from_pointee(entries),
        })
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<FeedTypeEntry>> {
        self.entries
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownFeedType(name.to_string()))
    }

    pub fn is_allowed_type(&self, name: &str) -> bool {
        self.entries.load().contains_key(name)
    }

    pub fn list_allowed_types(&self) -> Vec<String> {
        self.entries.load().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_with_no_configs_yields_empty_registry() {
        let registry = FeedTypeRegistry::build(&[]).await.unwrap();
        assert!(registry.list_allowed_types().is_empty());
        assert!(!registry.is_allowed_type("orders"));
        assert!(matches!(
            registry.get("orders").unwrap_err(),
            AppError::UnknownFeedType(_)
        ));
    }
}
