use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::batch::Batch;
use crate::directory::{CancelToken, Directory, DirectoryStats};
use crate::error::{Error, Result};
use crate::segment::{Segment, SEGMENT_KIND};

/// The single mutating handle over one index.
///
/// Opening a writer takes the cluster-wide advisory lock through the
/// directory; only one node may hold a writer for an index at a time.
/// Every batch becomes one segment under the next epoch. Closing (or
/// dropping) the writer releases the lock.
#[derive(Clone)]
pub struct Writer {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    index: String,
    dir: Arc<dyn Directory>,
    next_epoch: AtomicU64,
    closed: AtomicBool,
}

impl Writer {
    pub fn open(dir: Arc<dyn Directory>, index: &str) -> Result<Writer> {
        dir.setup(false)?;
        dir.lock()?;

        let epochs = match dir.list(SEGMENT_KIND) {
            Ok(epochs) => epochs,
            Err(err) => {
                let _ = dir.unlock();
                return Err(err);
            }
        };
        let next_epoch = epochs.last().map(|epoch| epoch + 1).unwrap_or(1);

        tracing::debug!(index, next_epoch, "opened writer");
        Ok(Writer {
            inner: Arc::new(WriterInner {
                index: index.to_string(),
                dir,
                next_epoch: AtomicU64::new(next_epoch),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn index(&self) -> &str {
        &self.inner.index
    }

    /// Apply one batch atomically: the whole batch lands as one segment or
    /// the index is left unchanged.
    pub fn batch(&self, batch: &Batch) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::BatchFailed(format!(
                "writer for `{}` is closed",
                self.inner.index
            )));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let segment = Segment::from_batch(batch);
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner
            .dir
            .persist(SEGMENT_KIND, epoch, &segment, &CancelToken::new())
            .map_err(|err| Error::BatchFailed(err.to_string()))
    }

    pub fn stats(&self) -> Result<DirectoryStats> {
        self.inner.dir.stats()
    }

    /// Release the advisory lock. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.dir.unlock()
    }
}

impl Drop for WriterInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(err) = self.dir.unlock() {
                tracing::error!(index = %self.index, %err, "failed to release writer lock");
            }
        }
    }
}
