use std::{future::Future, time::Duration};

use crate::{
    base::DocumentId,
    config::ConnectionParams,
    debug,
    errors::{PersistenceError, StoreError},
    etag::ETag,
    store::{AnyBucket, Bucket, MemoryCluster},
    trace, warn,
};

/// CAS-guarded document access for one bucket.
///
/// The manager owns its bucket handle and nothing else. It is safe to share
/// between tasks; operations on different documents never wait on each other,
/// and races on the same document are decided by the store.
#[derive(Debug)]
pub struct PersistenceManager<B: Bucket = AnyBucket> {
    bucket: B,
    timeout: Option<Duration>,
}

// Implementations

impl PersistenceManager<AnyBucket> {
    /// Validate `params`, then open a private handle to `bucket_name`.
    ///
    /// Fails with `Configuration` before any I/O if the bucket name is blank or
    /// the parameters are unusable.
    pub async fn connect(
        bucket_name: &str,
        params: &ConnectionParams,
    ) -> Result<Self, PersistenceError> {
        if bucket_name.trim().is_empty() {
            return Err(PersistenceError::Configuration(
                "bucket name can not be empty".into(),
            ));
        }
        params.validate()?;

        debug!(
            "Connecting to bucket {bucket_name:?} at {} as {:?}",
            params.address,
            params.credentials.username()
        );

        let bucket: AnyBucket = match params.address.scheme() {
            "mem" => {
                let cluster = MemoryCluster::new(&params.credentials);
                cluster.create_bucket(bucket_name);
                cluster
                    .open_bucket(bucket_name, &params.credentials)
                    .map_err(PersistenceError::Connection)?
                    .into()
            }
            #[cfg(feature = "local_fs")]
            "file" => {
                let root = params.address.to_file_path().map_err(|_| {
                    PersistenceError::Configuration(format!(
                        "{} is not a local directory",
                        params.address
                    ))
                })?;

                crate::store::LocalFsBucket::open(&root, bucket_name)
                    .await
                    .map_err(PersistenceError::Connection)?
                    .into()
            }
            scheme => {
                return Err(PersistenceError::Configuration(format!(
                    "unsupported store scheme {scheme:?}"
                )));
            }
        };

        Ok(Self::new(bucket))
    }
}

impl<B: Bucket> PersistenceManager<B> {
    /// Wrap an already opened bucket handle.
    pub fn new(bucket: impl Into<B>) -> Self {
        Self {
            bucket: bucket.into(),
            timeout: None,
        }
    }

    /// Fail any single store operation that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn bucket(&self) -> &B {
        &self.bucket
    }

    /// Read a document, `(None, ETag::None)` if it does not exist.
    pub async fn read(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<(Option<String>, ETag), PersistenceError> {
        let id = DocumentId::new(collection, key)?;

        match self.call(self.bucket.get(&id)).await {
            Ok(doc) => {
                trace!("Read {id} at cas {}", doc.cas);
                Ok((Some(doc.value), ETag::Known(doc.cas)))
            }
            Err(StoreError::KeyNotFound) => {
                trace!("Read {id}: not found");
                Ok((None, ETag::None))
            }
            Err(e) => {
                warn!("Failed to read {id}: {e}");
                Err(PersistenceError::Storage(e))
            }
        }
    }

    /// Write a document and return its new version.
    ///
    /// `ETag::None` inserts and fails with `EntityAlreadyExists` if the document
    /// is already there. `ETag::Known` replaces only that exact version and fails
    /// with `VersionConflict` otherwise, including when the document is gone.
    pub async fn write(
        &self,
        collection: &str,
        key: &str,
        payload: String,
        etag: &ETag,
    ) -> Result<ETag, PersistenceError> {
        let id = DocumentId::new(collection, key)?;

        let res = match etag {
            ETag::Known(cas) => self.call(self.bucket.replace(&id, payload, *cas)).await,
            ETag::None => self.call(self.bucket.insert(&id, payload)).await,
        };

        match res {
            Ok(cas) => {
                trace!("Wrote {id}: {etag:?} -> {cas}");
                Ok(ETag::Known(cas))
            }
            Err(StoreError::KeyExists { current }) if etag.is_none() => {
                debug!("Insert of {id} found an existing document at cas {current}");
                Err(PersistenceError::EntityAlreadyExists {
                    id,
                    current: Some(ETag::Known(current)),
                })
            }
            Err(e @ (StoreError::CasMismatch { .. } | StoreError::KeyNotFound))
                if !etag.is_none() =>
            {
                debug!("Write of {id} with {etag:?} lost the race: {e}");
                Err(PersistenceError::VersionConflict {
                    id,
                    expected: *etag,
                    current: e.current_cas().map(ETag::Known),
                })
            }
            Err(e) => {
                warn!("Failed to write {id}: {e}");
                Err(PersistenceError::Storage(e))
            }
        }
    }

    /// Delete the document stored at exactly `etag`.
    ///
    /// The caller must have read or written the document first; `ETag::None`
    /// is a conflict and never reaches the store.
    pub async fn delete(
        &self,
        collection: &str,
        key: &str,
        etag: &ETag,
    ) -> Result<(), PersistenceError> {
        let id = DocumentId::new(collection, key)?;

        let Some(cas) = etag.cas() else {
            debug!("Delete of {id} without a known version");
            return Err(PersistenceError::VersionConflict {
                id,
                expected: ETag::None,
                current: None,
            });
        };

        match self.call(self.bucket.remove(&id, cas)).await {
            Ok(()) => {
                trace!("Deleted {id} at cas {cas}");
                Ok(())
            }
            Err(e @ (StoreError::CasMismatch { .. } | StoreError::KeyNotFound)) => {
                debug!("Delete of {id} with {etag:?} lost the race: {e}");
                Err(PersistenceError::VersionConflict {
                    id,
                    expected: *etag,
                    current: e.current_cas().map(ETag::Known),
                })
            }
            Err(e) => {
                warn!("Failed to delete {id}: {e}");
                Err(PersistenceError::Storage(e))
            }
        }
    }

    /// Close the bucket handle.
    ///
    /// Taking `self` means every other user of the manager has already let go
    /// of it, so nothing can be in flight.
    pub async fn dispose(self) -> Result<(), PersistenceError> {
        debug!("Disposing manager of bucket {:?}", self.bucket.name());

        self.bucket.close().await.map_err(PersistenceError::Storage)
    }

    async fn call<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, op)
                .await
                .unwrap_or(Err(StoreError::Timeout)),
            None => op.await,
        }
    }
}
