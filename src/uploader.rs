//! Uploader (SPEC_FULL.md §4.3): drains shard buffers to the feed type's FTP
//! destination directory under a deterministic `<type>_<N>.csv` name.

use crate::error::AppResult;
use crate::model::FeedType;
use suppaftp::AsyncFtpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Uploader<'a> {
    feed_type: &'a FeedType,
    ftp: &'a mut AsyncFtpStream,
    on_upload: Box<dyn FnMut(u32) + Send + 'a>,
}

impl<'a> Uploader<'a> {
    pub fn new(
        feed_type: &'a FeedType,
        ftp: &'a mut AsyncFtpStream,
        on_upload: impl FnMut(u32) + Send + 'a,
    ) -> Self {
        Self {
            feed_type,
            ftp,
            on_upload: Box::new(on_upload),
        }
    }

    /// Resets the destination directory then uploads every shard received on
    /// `shards_in`, incrementing the upload counter as it goes.
    pub async fn upload_files(
        &mut self,
        mut shards_in: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        // Removal failure is non-fatal: the directory may simply not exist yet.
        let _ = self.ftp.rmdir(&self.feed_type.destination_dir).await;
        self.ftp.mkdir(&self.feed_type.destination_dir).await?;
        self.ftp.cwd(&self.feed_type.destination_dir).await?;

        let mut index: u32 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(crate::error::AppError::Canceled { id: String::new() });
                }
                shard = shards_in.recv() => {
                    let Some(shard) = shard else { break };
                    let filename = format!("{}_{}.csv", self.feed_type.name, index);
                    let mut cursor = futures_util::io::Cursor::new(shard);
                    self.ftp.put_file(&filename, &mut cursor).await?;
                    index += 1;
                    (self.on_upload)(index);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn filename_is_deterministic_and_zero_indexed() {
        let name = |feed_type: &str, index: u32| format!("{feed_type}_{index}.csv");
        assert_eq!(name("orders", 0), "orders_0.csv");
        assert_eq!(name("orders", 1), "orders_1.csv");
    }
}
