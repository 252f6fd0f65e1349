use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use super::{
    lock_uri, parse_epoch, segment_file_name, CancelToken, Directory, DirectoryStats,
    LockProvider, WriteTo,
};
use crate::error::{Error, Result};

/// Filesystem-backed segment store. One instance serves one index, rooted
/// at `<uri-path>/<index>`.
pub struct FileDirectory {
    root: PathBuf,
    lock_token: String,
    locks: Option<Arc<dyn LockProvider>>,
}

impl FileDirectory {
    pub fn new(url: &Url, index: &str, locks: Option<Arc<dyn LockProvider>>) -> Result<Self> {
        if url.scheme() != "file" {
            return Err(Error::InvalidUri(url.to_string()));
        }
        let root = PathBuf::from(url.path()).join(index);
        Ok(Self { root, lock_token: lock_uri(url.as_str(), index), locks })
    }

    fn path_of(&self, kind: &str, epoch: u64) -> PathBuf {
        self.root.join(segment_file_name(kind, epoch))
    }
}

impl Directory for FileDirectory {
    fn setup(&self, read_only: bool) -> Result<()> {
        if self.root.is_dir() {
            return Ok(());
        }
        if read_only {
            return Err(Error::storage(format!("{} does not exist", self.root.display())));
        }
        fs::create_dir_all(&self.root).map_err(Error::storage)
    }

    fn list(&self, kind: &str) -> Result<Vec<u64>> {
        let mut epochs = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(Error::storage)?;
        for entry in entries {
            let entry = entry.map_err(Error::storage)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(kind) {
                continue;
            }
            epochs.push(parse_epoch(&name, kind)?);
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    fn load(&self, kind: &str, epoch: u64) -> Result<Vec<u8>> {
        fs::read(self.path_of(kind, epoch)).map_err(Error::storage)
    }

    fn persist(
        &self,
        kind: &str,
        epoch: u64,
        source: &dyn WriteTo,
        cancel: &CancelToken,
    ) -> Result<()> {
        let name = segment_file_name(kind, epoch);
        let target = self.root.join(&name);
        let staging = self.root.join(format!("{name}.tmp"));

        let file = File::create(&staging).map_err(Error::storage)?;
        let mut wtr = BufWriter::new(file);
        let written = source
            .write_to(&mut wtr, cancel)
            .and_then(|n| wtr.flush().map(|_| n));
        let written = match written {
            Ok(n) => n,
            Err(err) => {
                let _ = fs::remove_file(&staging);
                return Err(Error::storage(err));
            }
        };
        if cancel.is_cancelled() {
            let _ = fs::remove_file(&staging);
            return Err(Error::Cancelled(name));
        }

        let file = wtr.into_inner().map_err(Error::storage)?;
        file.sync_all().map_err(Error::storage)?;
        fs::rename(&staging, &target).map_err(Error::storage)?;
        self.sync()?;
        tracing::debug!(segment = %name, bytes = written, "persisted segment");
        Ok(())
    }

    fn remove(&self, kind: &str, epoch: u64) -> Result<()> {
        fs::remove_file(self.path_of(kind, epoch)).map_err(Error::storage)
    }

    fn stats(&self) -> Result<DirectoryStats> {
        let mut stats = DirectoryStats::default();
        let entries = fs::read_dir(&self.root).map_err(Error::storage)?;
        for entry in entries {
            let entry = entry.map_err(Error::storage)?;
            let meta = entry.metadata().map_err(Error::storage)?;
            if meta.is_file() {
                stats.file_count += 1;
                stats.byte_count += meta.len();
            }
        }
        Ok(stats)
    }

    fn sync(&self) -> Result<()> {
        let dir = File::open(&self.root).map_err(Error::storage)?;
        dir.sync_all().map_err(Error::storage)
    }

    fn lock(&self) -> Result<()> {
        match &self.locks {
            Some(locks) => locks.lock(&self.lock_token),
            None => Ok(()),
        }
    }

    fn unlock(&self) -> Result<()> {
        match &self.locks {
            Some(locks) => locks.unlock(&self.lock_token),
            None => Ok(()),
        }
    }
}
