//! Byte-addressable, append-only segment stores.
//!
//! The engine persists immutable segments named `{12-hex-epoch}{kind}` and
//! reads them back by `(kind, epoch)`. Two backends exist, selected by the
//! URI scheme at construction: `file://<path>` and
//! `oss://<bucket>/<prefix>?endpoint=…`.

mod file;
mod oss;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use url::Url;

pub use self::file::FileDirectory;
pub use self::oss::OssDirectory;
use crate::error::{Error, Result};

/// Cooperative cancellation for [`Directory::persist`]. Once cancelled, a
/// persist in progress must commit nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A payload that can stream itself into a directory's staging buffer.
pub trait WriteTo {
    fn write_to(&self, wtr: &mut dyn io::Write, cancel: &CancelToken) -> io::Result<u64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub file_count: u64,
    pub byte_count: u64,
}

/// The capability the index engine needs from its segment store.
pub trait Directory: Send + Sync {
    /// Ensure the backing container exists, creating it when writable.
    fn setup(&self, read_only: bool) -> Result<()>;

    /// Epochs of every stored segment of the given kind, ascending.
    /// A file of the right kind whose name does not parse is an error.
    fn list(&self, kind: &str) -> Result<Vec<u64>>;

    fn load(&self, kind: &str, epoch: u64) -> Result<Vec<u8>>;

    /// Stream `source` into a staging buffer, then store it atomically
    /// under the target name. Nothing is committed when `cancel` fires
    /// first.
    fn persist(
        &self,
        kind: &str,
        epoch: u64,
        source: &dyn WriteTo,
        cancel: &CancelToken,
    ) -> Result<()>;

    fn remove(&self, kind: &str, epoch: u64) -> Result<()>;

    fn stats(&self) -> Result<DirectoryStats>;

    /// Flush pending writes. Object stores are consistent per object and
    /// treat this as a no-op.
    fn sync(&self) -> Result<()>;

    /// Take the cluster-wide advisory lock guarding this directory.
    fn lock(&self) -> Result<()>;

    fn unlock(&self) -> Result<()>;
}

/// Callback capability consulted by [`Directory::lock`]. The daemon wires
/// this to the replicated lock set; directories never reach across
/// components through globals.
pub trait LockProvider: Send + Sync {
    fn lock(&self, token: &str) -> Result<()>;
    fn unlock(&self, token: &str) -> Result<()>;
}

/// Open the directory for one index under the configured URI.
pub fn open(
    index_uri: &str,
    index: &str,
    locks: Option<Arc<dyn LockProvider>>,
) -> Result<Arc<dyn Directory>> {
    let url = Url::parse(index_uri)
        .map_err(|err| Error::InvalidUri(format!("{index_uri}: {err}")))?;
    match url.scheme() {
        "file" => Ok(Arc::new(FileDirectory::new(&url, index, locks)?)),
        "oss" => Ok(Arc::new(OssDirectory::new(&url, index, locks)?)),
        other => Err(Error::UnsupportedScheme(other.to_string())),
    }
}

/// The advisory-lock token guarding writer ownership of one index.
pub fn lock_uri(index_uri: &str, index: &str) -> String {
    format!("{}/{index}", index_uri.trim_end_matches('/'))
}

pub(crate) fn segment_file_name(kind: &str, epoch: u64) -> String {
    format!("{epoch:012x}{kind}")
}

/// Parse the epoch out of a `{12-hex}{kind}` file name. The caller has
/// already matched the kind suffix.
pub(crate) fn parse_epoch(name: &str, kind: &str) -> Result<u64> {
    let base = name
        .strip_suffix(kind)
        .ok_or_else(|| Error::storage(format!("`{name}` is not a `{kind}` segment")))?;
    if base.len() != 12 {
        return Err(Error::storage(format!("bad segment name `{name}`")));
    }
    u64::from_str_radix(base, 16)
        .map_err(|_| Error::storage(format!("bad segment name `{name}`")))
}
