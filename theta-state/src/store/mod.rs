pub mod memory;

#[cfg(feature = "local_fs")]
pub mod local_fs;

// Re-exports

#[cfg(feature = "local_fs")]
pub use local_fs::LocalFsBucket;
pub use memory::{MemoryBucket, MemoryCluster};

use std::future::Future;

use crate::{base::DocumentId, errors::StoreError};

/// Store-assigned version of a document, advanced on every mutation.
pub type Cas = u64;

/// Document as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub value: String,
    pub cas: Cas,
}

/// Handle to one bucket of a document store.
///
/// Every mutation is atomic per document and guarded by CAS on the store side.
/// Implementations must not serialize operations on different documents.
pub trait Bucket: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Fetch a document, `KeyNotFound` if absent.
    fn get(
        &self,
        id: &DocumentId,
    ) -> impl Future<Output = Result<StoredDocument, StoreError>> + Send;

    /// Create a document, `KeyExists` if one is already stored under `id`.
    fn insert(
        &self,
        id: &DocumentId,
        value: String,
    ) -> impl Future<Output = Result<Cas, StoreError>> + Send;

    /// Overwrite a document stored with exactly `cas`.
    ///
    /// `CasMismatch` if the stored version differs, `KeyNotFound` if it is gone.
    fn replace(
        &self,
        id: &DocumentId,
        value: String,
        cas: Cas,
    ) -> impl Future<Output = Result<Cas, StoreError>> + Send;

    /// Remove a document stored with exactly `cas`.
    fn remove(&self, id: &DocumentId, cas: Cas)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Release the handle. Operations issued afterwards fail with `Closed`.
    fn close(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Bucket selected at runtime from the address scheme.
#[derive(Debug, Clone)]
pub enum AnyBucket {
    Memory(MemoryBucket),
    #[cfg(feature = "local_fs")]
    LocalFs(LocalFsBucket),
}

// Implementations

impl From<MemoryBucket> for AnyBucket {
    fn from(bucket: MemoryBucket) -> Self {
        AnyBucket::Memory(bucket)
    }
}

#[cfg(feature = "local_fs")]
impl From<LocalFsBucket> for AnyBucket {
    fn from(bucket: LocalFsBucket) -> Self {
        AnyBucket::LocalFs(bucket)
    }
}

impl Bucket for AnyBucket {
    fn name(&self) -> &str {
        match self {
            AnyBucket::Memory(b) => b.name(),
            #[cfg(feature = "local_fs")]
            AnyBucket::LocalFs(b) => b.name(),
        }
    }

    async fn get(&self, id: &DocumentId) -> Result<StoredDocument, StoreError> {
        match self {
            AnyBucket::Memory(b) => b.get(id).await,
            #[cfg(feature = "local_fs")]
            AnyBucket::LocalFs(b) => b.get(id).await,
        }
    }

    async fn insert(&self, id: &DocumentId, value: String) -> Result<Cas, StoreError> {
        match self {
            AnyBucket::Memory(b) => b.insert(id, value).await,
            #[cfg(feature = "local_fs")]
            AnyBucket::LocalFs(b) => b.insert(id, value).await,
        }
    }

    async fn replace(&self, id: &DocumentId, value: String, cas: Cas) -> Result<Cas, StoreError> {
        match self {
            AnyBucket::Memory(b) => b.replace(id, value, cas).await,
            #[cfg(feature = "local_fs")]
            AnyBucket::LocalFs(b) => b.replace(id, value, cas).await,
        }
    }

    async fn remove(&self, id: &DocumentId, cas: Cas) -> Result<(), StoreError> {
        match self {
            AnyBucket::Memory(b) => b.remove(id, cas).await,
            #[cfg(feature = "local_fs")]
            AnyBucket::LocalFs(b) => b.remove(id, cas).await,
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        match self {
            AnyBucket::Memory(b) => b.close().await,
            #[cfg(feature = "local_fs")]
            AnyBucket::LocalFs(b) => b.close().await,
        }
    }
}
