use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::directory::{self, LockProvider};
use crate::error::{Error, Result};
use crate::lru::LruMap;
use crate::reader::Reader;
use crate::registry::flight::single_flight;
use crate::writer::Writer;

const DEFAULT_READER_CAPACITY: usize = 64;

/// Per-index reader and writer caches.
///
/// Construction is lazy and deduplicated: concurrent callers for the same
/// cold index block on one in-flight attempt and share its outcome. On
/// failure nothing is cached and every waiter receives the error.
///
/// Readers sit in a bounded LRU; eviction only drops the registry's
/// handle, queries holding a clone keep theirs until they finish. Writers
/// are kept unconditionally: each one holds the cluster-wide advisory
/// lock, which only an explicit close may release.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    index_uri: String,
    locks: Option<Arc<dyn LockProvider>>,
    readers: RwLock<LruMap<String, Reader>>,
    writers: RwLock<HashMap<String, Writer>>,
    reader_flights: flight::Flights<Reader>,
    writer_flights: flight::Flights<Writer>,
    reader_opens: AtomicU64,
}

impl Registry {
    pub fn new(index_uri: impl Into<String>, locks: Option<Arc<dyn LockProvider>>) -> Registry {
        Registry::with_reader_capacity(index_uri, locks, DEFAULT_READER_CAPACITY)
    }

    pub fn with_reader_capacity(
        index_uri: impl Into<String>,
        locks: Option<Arc<dyn LockProvider>>,
        capacity: usize,
    ) -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                index_uri: index_uri.into(),
                locks,
                readers: RwLock::new(LruMap::new(capacity)),
                writers: RwLock::new(HashMap::new()),
                reader_flights: flight::Flights::default(),
                writer_flights: flight::Flights::default(),
                reader_opens: AtomicU64::new(0),
            }),
        }
    }

    /// The cached reader for `index`, opening one if needed.
    pub fn get_reader(&self, index: &str) -> Result<Reader> {
        if let Some(reader) = self.inner.readers.read().unwrap().get(&index.to_string()) {
            return Ok(reader.clone());
        }

        let inner = self.inner.clone();
        let name = index.to_string();
        single_flight(&self.inner.reader_flights, index, move || {
            inner.reader_opens.fetch_add(1, Ordering::Relaxed);
            let dir = directory::open(&inner.index_uri, &name, inner.locks.clone())
                .map_err(|err| reader_failed(&name, err))?;
            let reader = Reader::open(&dir, &name).map_err(|err| reader_failed(&name, err))?;
            // insert before the flight resolves so late callers hit the cache
            inner.readers.write().unwrap().insert(name.clone(), reader.clone());
            Ok(reader)
        })
    }

    /// The cached writer for `index`, opening one (and taking the
    /// distributed lock) if needed.
    pub fn get_writer(&self, index: &str) -> Result<Writer> {
        if let Some(writer) = self.inner.writers.read().unwrap().get(index) {
            return Ok(writer.clone());
        }

        let inner = self.inner.clone();
        let name = index.to_string();
        single_flight(&self.inner.writer_flights, index, move || {
            let dir = directory::open(&inner.index_uri, &name, inner.locks.clone())
                .map_err(|err| writer_failed(&name, err))?;
            let writer = Writer::open(dir, &name).map_err(|err| writer_failed(&name, err))?;
            inner.writers.write().unwrap().insert(name.clone(), writer.clone());
            Ok(writer)
        })
    }

    /// Drop the cached reader so the next read observes the last write.
    /// The previous reader is closed once its in-flight queries finish.
    pub fn invalidate_reader(&self, index: &str) {
        self.inner.readers.write().unwrap().remove(&index.to_string());
    }

    /// Remove and close both handles of a dropped index.
    pub fn drop_index(&self, index: &str) {
        self.inner.readers.write().unwrap().remove(&index.to_string());
        let writer = self.inner.writers.write().unwrap().remove(index);
        if let Some(writer) = writer {
            if let Err(err) = writer.close() {
                tracing::error!(index, %err, "failed to close writer of dropped index");
            }
        }
    }

    /// Close every writer deterministically. Called on leader shutdown;
    /// followers never opened one.
    pub fn close_all(&self) {
        let writers: Vec<Writer> =
            self.inner.writers.write().unwrap().drain().map(|(_, writer)| writer).collect();
        for writer in writers {
            if let Err(err) = writer.close() {
                tracing::error!(index = writer.index(), %err, "failed to close writer");
            }
        }
    }

    /// How many readers have actually been constructed. One cold index
    /// queried by many callers accounts for exactly one open.
    pub fn reader_opens(&self) -> u64 {
        self.inner.reader_opens.load(Ordering::Relaxed)
    }
}

fn reader_failed(index: &str, err: Error) -> Error {
    match err {
        err @ Error::ReaderCreateFailed { .. } => err,
        other => Error::ReaderCreateFailed { index: index.to_string(), reason: other.to_string() },
    }
}

fn writer_failed(index: &str, err: Error) -> Error {
    match err {
        err @ Error::WriterCreateFailed { .. } => err,
        other => Error::WriterCreateFailed { index: index.to_string(), reason: other.to_string() },
    }
}

mod flight {
    use super::*;

    /// In-flight constructions keyed by index name.
    pub(super) struct Flights<T>(Mutex<HashMap<String, Arc<Flight<T>>>>);

    impl<T> Default for Flights<T> {
        fn default() -> Self {
            Flights(Mutex::new(HashMap::new()))
        }
    }

    struct Flight<T> {
        outcome: Mutex<Option<Result<T>>>,
        done: Condvar,
    }

    /// Run `build` once per key no matter how many callers arrive while it
    /// is in flight; everyone gets a clone of the single outcome.
    pub(super) fn single_flight<T: Clone>(
        flights: &Flights<T>,
        key: &str,
        build: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let (flight, is_leader) = {
            let mut map = flights.0.lock().unwrap();
            match map.get(key) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight = Arc::new(Flight {
                        outcome: Mutex::new(None),
                        done: Condvar::new(),
                    });
                    map.insert(key.to_string(), flight.clone());
                    (flight, true)
                }
            }
        };

        if is_leader {
            let result = build();
            *flight.outcome.lock().unwrap() = Some(result.clone());
            flight.done.notify_all();
            flights.0.lock().unwrap().remove(key);
            result
        } else {
            let mut outcome = flight.outcome.lock().unwrap();
            while outcome.is_none() {
                outcome = flight.done.wait(outcome).unwrap();
            }
            outcome.clone().unwrap()
        }
    }
}
