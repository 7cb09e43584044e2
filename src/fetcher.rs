//! Data fetcher (SPEC_FULL.md §4.2): runs the feed type's count + select
//! queries against its source database and streams rows as records.

use crate::error::{AppError, AppResult};
use crate::model::FeedType;
use crate::shard::Record;
use sqlx::{Column, PgPool, Row};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct DataFetcher<'a> {
    feed_type: &'a FeedType,
    pool: &'a PgPool,
    on_data_fetched: Box<dyn FnMut() + Send + 'a>,
    on_progress: Box<dyn FnMut(u32) + Send + 'a>,
}

impl<'a> DataFetcher<'a> {
    pub fn new(
        feed_type: &'a FeedType,
        pool: &'a PgPool,
        on_data_fetched: impl FnMut() + Send + 'a,
        on_progress: impl FnMut(u32) + Send + 'a,
    ) -> Self {
        Self {
            feed_type,
            pool,
            on_data_fetched: Box::new(on_data_fetched),
            on_progress: Box::new(on_progress),
        }
    }

    /// Streams the header row, then every data row, onto `out`. Closes `out`
    /// on every exit path, including cancellation and error.
    pub async fn stream_data(
        &mut self,
        out: mpsc::Sender<Record>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        let result = self.stream_data_inner(&out, &cancel).await;
        drop(out);
        result
    }

    async fn stream_data_inner(
        &mut self,
        out: &mpsc::Sender<Record>,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let total: i64 = sqlx::query_scalar(&self.feed_type.count_query)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| AppError::NoRecords {
                feed_type: self.feed_type.name.clone(),
            })?;

        // Column metadata comes from the cursor itself, not the first row,
        // so the header is correct (and `on_data_fetched` fires) even when
        // the select query yields zero rows.
        let describe = sqlx::Executor::describe(self.pool, &self.feed_type.select_query).await?;
        let header: Record = describe
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        out.send(header).await.ok();
        (self.on_data_fetched)();

        let mut rows = sqlx::query(&self.feed_type.select_query).fetch(self.pool);

        let mut processed: i64 = 0;
        let mut last_fired: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AppError::Canceled { id: String::new() });
                }
                row = futures_util::StreamExt::next(&mut rows) => {
                    let Some(row) = row else { break };
                    let row = row?;

                    let record = row_to_record(&row);
                    out.send(record).await.ok();

                    processed += 1;
                    if total > 0 {
                        let pct = ((processed as f64 / total as f64) * 100.0).round() as u32;
                        let pct = pct.min(100);
                        if pct > last_fired {
                            last_fired = pct;
                            (self.on_progress)(pct);
                        }
                    }
                }
            }
        }

        if processed > 0 && last_fired < 100 {
            (self.on_progress)(100);
        }

        Ok(())
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Record {
    (0..row.columns().len())
        .map(|i| {
            row.try_get_raw(i)
                .ok()
                .and_then(|raw| {
                    use sqlx::ValueRef;
                    if raw.is_null() {
                        None
                    } else {
                        row.try_get::<String, _>(i)
                            .ok()
                            .or_else(|| row.try_get::<i64, _>(i).ok().map(|v| v.to_string()))
                            .or_else(|| row.try_get::<f64, _>(i).ok().map(|v| v.to_string()))
                            .or_else(|| row.try_get::<bool, _>(i).ok().map(|v| v.to_string()))
                    }
                })
                .unwrap_or_default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_formula_clamps_at_100() {
        let pct = ((4.0_f64 / 4.0) * 100.0).round() as u32;
        assert_eq!(pct.min(100), 100);
    }

    #[test]
    fn progress_formula_rounds_to_nearest_integer_percent() {
        let pct = ((1.0_f64 / 3.0) * 100.0).round() as u32;
        assert_eq!(pct, 33);
    }
}
