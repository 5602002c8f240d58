use std::{
    io,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rustc_hash::FxHashMap;

use crate::{
    base::DocumentId,
    config::Credentials,
    errors::StoreError,
    store::{Bucket, Cas, StoredDocument},
    trace,
};

/// In-process document store with named buckets and password users.
///
/// Clones share the same buckets, so several managers opened from one cluster
/// observe and race on the same documents, like processes sharing a server.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster(Arc<ClusterInner>);

/// Handle to one bucket of a [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct MemoryBucket {
    name: String,
    data: Arc<BucketData>,
    cluster: Arc<ClusterInner>,
    closed: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct ClusterInner {
    users: RwLock<FxHashMap<String, String>>,
    buckets: RwLock<FxHashMap<String, Arc<BucketData>>>,
    faults: RwLock<Faults>,
}

#[derive(Debug, Default)]
struct BucketData {
    docs: Mutex<Docs>,
}

#[derive(Debug, Default)]
struct Docs {
    last_cas: Cas,
    entries: FxHashMap<DocumentId, StoredDocument>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    unavailable: bool,
    latency: Option<Duration>,
}

// Implementations

impl MemoryCluster {
    /// Create a cluster with a single user.
    pub fn new(credentials: &Credentials) -> Self {
        let cluster = Self::default();
        cluster.add_user(credentials);
        cluster
    }

    pub fn add_user(&self, credentials: &Credentials) {
        write_lock(&self.0.users).insert(
            credentials.username().to_string(),
            credentials.password().to_string(),
        );
    }

    /// Create an empty bucket. An existing bucket of the same name is kept.
    pub fn create_bucket(&self, name: impl Into<String>) {
        self.create_bucket_with_cas(name, 0);
    }

    /// Create an empty bucket whose first mutation is stamped `cas + 1`.
    pub fn create_bucket_with_cas(&self, name: impl Into<String>, cas: Cas) {
        write_lock(&self.0.buckets)
            .entry(name.into())
            .or_insert_with(|| {
                Arc::new(BucketData {
                    docs: Mutex::new(Docs {
                        last_cas: cas,
                        entries: FxHashMap::default(),
                    }),
                })
            });
    }

    pub fn open_bucket(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Result<MemoryBucket, StoreError> {
        self.fault()?;

        let authenticated = read_lock(&self.0.users)
            .get(credentials.username())
            .is_some_and(|password| password == credentials.password());

        if !authenticated {
            return Err(StoreError::AuthenticationFailed(
                credentials.username().to_string(),
            ));
        }

        let data = read_lock(&self.0.buckets)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))?;

        trace!("Opened memory bucket {name:?}");

        Ok(MemoryBucket {
            name: name.to_string(),
            data,
            cluster: self.0.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Make every operation fail as if the server were unreachable.
    pub fn set_available(&self, available: bool) {
        write_lock(&self.0.faults).unavailable = !available;
    }

    /// Delay every bucket operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        write_lock(&self.0.faults).latency = latency;
    }

    fn fault(&self) -> Result<(), StoreError> {
        self.0.check_available()
    }
}

impl ClusterInner {
    fn check_available(&self) -> Result<(), StoreError> {
        if read_lock(&self.faults).unavailable {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "cluster unavailable",
            )));
        }
        Ok(())
    }
}

impl MemoryBucket {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of documents currently stored in the bucket.
    pub fn len(&self) -> usize {
        self.data.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let latency = read_lock(&self.cluster.faults).latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.cluster.check_available()
    }
}

impl BucketData {
    fn lock(&self) -> std::sync::MutexGuard<'_, Docs> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Docs {
    fn next_cas(&mut self) -> Cas {
        self.last_cas += 1;
        self.last_cas
    }
}

impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &DocumentId) -> Result<StoredDocument, StoreError> {
        self.enter().await?;

        self.data
            .lock()
            .entries
            .get(id)
            .cloned()
            .ok_or(StoreError::KeyNotFound)
    }

    async fn insert(&self, id: &DocumentId, value: String) -> Result<Cas, StoreError> {
        self.enter().await?;

        let mut docs = self.data.lock();

        if let Some(existing) = docs.entries.get(id) {
            return Err(StoreError::KeyExists {
                current: existing.cas,
            });
        }

        let cas = docs.next_cas();
        docs.entries.insert(id.clone(), StoredDocument { value, cas });

        Ok(cas)
    }

    async fn replace(&self, id: &DocumentId, value: String, cas: Cas) -> Result<Cas, StoreError> {
        self.enter().await?;

        let mut docs = self.data.lock();

        let current = docs
            .entries
            .get(id)
            .map(|doc| doc.cas)
            .ok_or(StoreError::KeyNotFound)?;

        if current != cas {
            return Err(StoreError::CasMismatch { current });
        }

        let cas = docs.next_cas();
        docs.entries.insert(id.clone(), StoredDocument { value, cas });

        Ok(cas)
    }

    async fn remove(&self, id: &DocumentId, cas: Cas) -> Result<(), StoreError> {
        self.enter().await?;

        let mut docs = self.data.lock();

        let current = docs
            .entries
            .get(id)
            .map(|doc| doc.cas)
            .ok_or(StoreError::KeyNotFound)?;

        if current != cas {
            return Err(StoreError::CasMismatch { current });
        }

        docs.entries.remove(id);

        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);

        trace!("Closed memory bucket {:?}", self.name);

        Ok(())
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
