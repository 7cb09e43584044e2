//! Bounded CSV shard writer (SPEC_FULL.md §4.1).
//!
//! Consumes records from `records_in` and emits complete, encoded shard
//! buffers on `shards_out`. Every shard stays within `size_limit_bytes` and
//! `line_limit` records and starts with `header`; a record is never split
//! across shards.

use crate::error::{AppError, AppResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Record = Vec<String>;

pub struct ShardWriter {
    size_limit_bytes: usize,
    line_limit: usize,
}

impl ShardWriter {
    pub fn new(size_limit_bytes: usize, line_limit: usize) -> Self {
        Self {
            size_limit_bytes,
            line_limit,
        }
    }

    /// Drives the fetch -> shard boundary. The first record received is
    /// treated as the header and reused at the top of every shard. Closes
    /// `shards_out` on return.
    pub async fn run(
        &self,
        mut records_in: mpsc::Receiver<Record>,
        shards_out: mpsc::Sender<Vec<u8>>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        let header = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Canceled { id: String::new() }),
            record = records_in.recv() => match record {
                Some(r) => r,
                None => return Ok(()),
            },
        };

        let mut buf = ShardBuffer::new(&header, self.size_limit_bytes, self.line_limit)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AppError::Canceled { id: String::new() });
                }
                record = records_in.recv() => {
                    let Some(record) = record else { break };
                    self.write_one(&mut buf, record, &shards_out).await?;
                }
            }
        }

        if !buf.is_empty() {
            let bytes = buf.finish()?;
            let _ = shards_out.send(bytes).await;
        }
        Ok(())
    }

    async fn write_one(
        &self,
        buf: &mut ShardBuffer,
        record: Record,
        shards_out: &mpsc::Sender<Vec<u8>>,
    ) -> AppResult<()> {
        match buf.try_append(&record)? {
            AppendOutcome::Appended => Ok(()),
            AppendOutcome::Overflow => {
                if buf.is_empty() {
                    let record_len = encoded_len(&record)?;
                    return Err(AppError::RecordOverflowsLimits {
                        record_len,
                        size_limit: self.size_limit_bytes,
                        line_limit: self.line_limit,
                    });
                }
                let bytes = buf.take_and_reset()?;
                let _ = shards_out.send(bytes).await;
                match buf.try_append(&record)? {
                    AppendOutcome::Appended => Ok(()),
                    AppendOutcome::Overflow => {
                        let record_len = encoded_len(&record)?;
                        Err(AppError::RecordOverflowsLimits {
                            record_len,
                            size_limit: self.size_limit_bytes,
                            line_limit: self.line_limit,
                        })
                    }
                }
            }
        }
    }
}

fn encoded_len(record: &Record) -> AppResult<usize> {
    let mut wtr = csv::WriterBuilder::new().from_writer(Vec::new());
    wtr.write_record(record)?;
    Ok(wtr.into_inner().map_err(|e| e.into_error())?.len())
}

enum AppendOutcome {
    Appended,
    Overflow,
}

struct ShardBuffer {
    writer: csv::Writer<Vec<u8>>,
    byte_count: usize,
    line_count: usize,
    size_limit: usize,
    line_limit: usize,
    header: Record,
}

impl ShardBuffer {
    fn new(header: &Record, size_limit: usize, line_limit: usize) -> AppResult<Self> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(header)?;
        writer.flush()?;
        let byte_count = writer.get_ref().len();
        Ok(Self {
            writer,
            byte_count,
            line_count: 0,
            size_limit,
            line_limit,
            header: header.clone(),
        })
    }

    fn is_empty(&self) -> bool {
        self.line_count == 0
    }

    fn try_append(&mut self, record: &Record) -> AppResult<AppendOutcome> {
        if self.line_count + 1 > self.line_limit {
            return Ok(AppendOutcome::Overflow);
        }
        let added_len = encoded_len(record)?;
        if self.byte_count + added_len > self.size_limit {
            return Ok(AppendOutcome::Overflow);
        }
        self.writer.write_record(record)?;
        self.writer.flush()?;
        self.byte_count += added_len;
        self.line_count += 1;
        Ok(AppendOutcome::Appended)
    }

    fn take_and_reset(&mut self) -> AppResult<Vec<u8>> {
        self.writer.flush()?;
        let finished = std::mem::replace(
            &mut self.writer,
            csv::WriterBuilder::new().from_writer(Vec::new()),
        );
        let bytes = finished.into_inner().map_err(|e| e.into_error())?;
        self.writer.write_record(&self.header)?;
        self.writer.flush()?;
        self.byte_count = self.writer.get_ref().len();
        self.line_count = 0;
        Ok(bytes)
    }

    fn finish(&mut self) -> AppResult<Vec<u8>> {
        self.writer.flush()?;
        let finished = std::mem::replace(
            &mut self.writer,
            csv::WriterBuilder::new().from_writer(Vec::new()),
        );
        finished.into_inner().map_err(|e| e.into_error().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_shards(
        header: Record,
        records: Vec<Record>,
        size_limit: usize,
        line_limit: usize,
    ) -> AppResult<Vec<Vec<u8>>> {
        let (tx_in, rx_in) = mpsc::channel(16);
        let (tx_out, mut rx_out) = mpsc::channel(16);
        tx_in.send(header).await.unwrap();
        for r in records {
            tx_in.send(r).await.unwrap();
        }
        drop(tx_in);

        let writer = ShardWriter::new(size_limit, line_limit);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(async move { writer.run(rx_in, tx_out, cancel).await });

        let mut shards = Vec::new();
        while let Some(shard) = rx_out.recv().await {
            shards.push(shard);
        }
        handle.await.unwrap()?;
        Ok(shards)
    }

    #[tokio::test]
    async fn splits_by_line_limit() {
        let header = vec!["a".into()];
        let records: Vec<Record> = (0..5).map(|i| vec![i.to_string()]).collect();
        let shards = run_shards(header, records, 1_000_000, 3).await.unwrap();
        assert_eq!(shards.len(), 2);
    }

    #[tokio::test]
    async fn zero_line_limit_overflows_immediately() {
        let header = vec!["a".into()];
        let records = vec![vec!["x".to_string()]];
        let err = run_shards(header, records, 1_000_000, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RecordOverflowsLimits { .. }));
    }

    #[tokio::test]
    async fn every_shard_starts_with_header() {
        let header = vec!["col".into()];
        let records: Vec<Record> = (0..6).map(|i| vec![i.to_string()]).collect();
        let shards = run_shards(header, records, 1_000_000, 2).await.unwrap();
        for shard in shards {
            let mut rdr = csv::Reader::from_reader(shard.as_slice());
            let first: Vec<String> = rdr
                .records()
                .next()
                .unwrap()
                .unwrap()
                .iter()
                .map(String::from)
                .collect();
            assert_eq!(first, vec!["col".to_string()]);
        }
    }

    #[tokio::test]
    async fn empty_input_produces_no_shard() {
        let shards = run_shards(vec!["a".into()], vec![], 1_000_000, 10)
            .await
            .unwrap();
        assert!(shards.is_empty());
    }
}
