use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    base::DocumentId,
    errors::StoreError,
    store::{Bucket, Cas, StoredDocument},
    trace,
};

const DOC_EXT: &str = "doc";
const TMP_EXT: &str = "tmp";

/// Bucket stored as a directory, one file per document.
///
/// CAS values are microsecond timestamps bumped past both the last one handed
/// out and the version being replaced, so a document's CAS only grows, across
/// reopen too. Mutations of one document are serialized by a per-document
/// lock and run to completion in their own task even if the caller goes away;
/// different documents never wait on each other. Only one process may use a
/// directory at a time.
#[derive(Debug, Clone)]
pub struct LocalFsBucket(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    name: String,
    dir: PathBuf,
    last_cas: AtomicU64,
    locks: Mutex<FxHashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

/// Entry of the per-document lock map, removed once its last holder is gone.
struct DocumentLock {
    inner: Arc<Inner>,
    id: DocumentId,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    cas: Cas,
    value: String,
}

// Implementations

impl LocalFsBucket {
    /// Open the bucket `name` under `root`, creating its directory if needed.
    pub async fn open(root: &Path, name: &str) -> Result<Self, StoreError> {
        let dir = root.join(name);

        if !tokio::fs::try_exists(&dir).await? {
            tokio::fs::create_dir_all(&dir).await?;
        } else if !tokio::fs::metadata(&dir).await?.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("bucket path exists but is not a directory: {dir:?}"),
            )));
        }

        trace!("Opened local bucket {name:?} at {dir:?}");

        Ok(Self(Arc::new(Inner {
            name: name.to_string(),
            dir,
            last_cas: AtomicU64::new(0),
            locks: Mutex::default(),
            closed: AtomicBool::new(false),
        })))
    }

    pub fn dir(&self) -> &Path {
        &self.0.dir
    }

    fn path(&self, id: &DocumentId) -> PathBuf {
        self.file(id, DOC_EXT)
    }

    fn file(&self, id: &DocumentId, ext: &str) -> PathBuf {
        // Percent-encoding keeps separators and dots of the key out of the path
        let stem: String = url::form_urlencoded::byte_serialize(id.as_str().as_bytes()).collect();

        self.0.dir.join(format!("{stem}.{ext}"))
    }

    /// Next CAS, strictly above `floor` and everything handed out before.
    fn next_cas(&self, floor: Cas) -> Cas {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as Cas)
            .unwrap_or_default();

        let bump = |last: Cas| now.max(last + 1).max(floor + 1);

        let prev = self
            .0
            .last_cas
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(bump(last)))
            .unwrap_or_else(|last| last);

        bump(prev)
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn read_envelope(&self, id: &DocumentId) -> Result<Option<Envelope>, StoreError> {
        let bytes = match tokio::fs::read(self.path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        postcard::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupted(format!("{id}: {e}")))
    }

    async fn write_envelope(
        &self,
        id: &DocumentId,
        value: String,
        floor: Cas,
    ) -> Result<Cas, StoreError> {
        let cas = self.next_cas(floor);
        let bytes = postcard::to_stdvec(&Envelope { cas, value })
            .map_err(|e| StoreError::Corrupted(format!("{id}: {e}")))?;

        let path = self.path(id);
        let tmp = self.file(id, TMP_EXT);

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(cas)
    }

    /// Run `op` in its own task while holding the lock of document `id`.
    ///
    /// Dropping the returned future does not cancel `op`; the lock stays held
    /// until it finishes, so no later mutation of the document can overlap it.
    async fn locked<R, F, Fut>(&self, id: &DocumentId, op: F) -> Result<R, StoreError>
    where
        F: FnOnce(LocalFsBucket, DocumentId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, StoreError>> + Send + 'static,
        R: Send + 'static,
    {
        let bucket = self.clone();
        let id = id.clone();

        tokio::spawn(async move {
            let entry = DocumentLock::acquire(&bucket.0, &id);
            let _guard = entry.mutex.lock().await;

            op(bucket, id).await
        })
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
    }
}

impl DocumentLock {
    fn acquire(inner: &Arc<Inner>, id: &DocumentId) -> Self {
        let mutex = lock_map(inner).entry(id.clone()).or_default().clone();

        Self {
            inner: inner.clone(),
            id: id.clone(),
            mutex,
        }
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let mut locks = lock_map(&self.inner);

        // Handles are only cloned under the map lock: the map's and ours are the last two
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.id);
        }
    }
}

impl Bucket for LocalFsBucket {
    fn name(&self) -> &str {
        &self.0.name
    }

    async fn get(&self, id: &DocumentId) -> Result<StoredDocument, StoreError> {
        self.check_open()?;

        match self.read_envelope(id).await? {
            Some(Envelope { cas, value }) => Ok(StoredDocument { value, cas }),
            None => Err(StoreError::KeyNotFound),
        }
    }

    async fn insert(&self, id: &DocumentId, value: String) -> Result<Cas, StoreError> {
        self.check_open()?;

        self.locked(id, move |bucket, id| async move {
            if let Some(existing) = bucket.read_envelope(&id).await? {
                return Err(StoreError::KeyExists {
                    current: existing.cas,
                });
            }

            bucket.write_envelope(&id, value, 0).await
        })
        .await
    }

    async fn replace(&self, id: &DocumentId, value: String, cas: Cas) -> Result<Cas, StoreError> {
        self.check_open()?;

        self.locked(id, move |bucket, id| async move {
            let current = bucket
                .read_envelope(&id)
                .await?
                .ok_or(StoreError::KeyNotFound)?
                .cas;

            if current != cas {
                return Err(StoreError::CasMismatch { current });
            }

            bucket.write_envelope(&id, value, current).await
        })
        .await
    }

    async fn remove(&self, id: &DocumentId, cas: Cas) -> Result<(), StoreError> {
        self.check_open()?;

        self.locked(id, move |bucket, id| async move {
            let current = bucket
                .read_envelope(&id)
                .await?
                .ok_or(StoreError::KeyNotFound)?
                .cas;

            if current != cas {
                return Err(StoreError::CasMismatch { current });
            }

            tokio::fs::remove_file(bucket.path(&id)).await?;

            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.0.closed.store(true, Ordering::Release);

        trace!("Closed local bucket {:?}", self.0.name);

        Ok(())
    }
}

fn lock_map(inner: &Inner) -> MutexGuard<'_, FxHashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>> {
    inner.locks.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    use super::*;

    fn id(key: &str) -> DocumentId {
        DocumentId::new("Account", key).unwrap()
    }

    #[tokio::test]
    async fn test_insert_replace_remove() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        let first = bucket.insert(&id("1"), "a".into()).await.unwrap();
        assert!(matches!(
            bucket.insert(&id("1"), "b".into()).await,
            Err(StoreError::KeyExists { current }) if current == first
        ));

        let second = bucket.replace(&id("1"), "b".into(), first).await.unwrap();
        assert!(second > first);
        assert!(matches!(
            bucket.replace(&id("1"), "c".into(), first).await,
            Err(StoreError::CasMismatch { current }) if current == second
        ));

        assert_eq!(
            bucket.get(&id("1")).await.unwrap(),
            StoredDocument {
                value: "b".into(),
                cas: second
            }
        );

        bucket.remove(&id("1"), second).await.unwrap();
        assert!(matches!(
            bucket.get(&id("1")).await,
            Err(StoreError::KeyNotFound)
        ));
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let root = TempDir::new().unwrap();

        let cas = {
            let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();
            bucket.insert(&id("1"), "a".into()).await.unwrap()
        };

        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();
        assert_eq!(bucket.get(&id("1")).await.unwrap().cas, cas);

        let next = bucket.replace(&id("1"), "b".into(), cas).await.unwrap();
        assert!(next > cas);
    }

    #[tokio::test]
    async fn test_key_with_path_characters() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        let tricky = id("../../etc/passwd");
        bucket.insert(&tricky, "a".into()).await.unwrap();

        assert_eq!(bucket.get(&tricky).await.unwrap().value, "a");
        assert!(bucket.path(&tricky).starts_with(bucket.dir()));
    }

    #[tokio::test]
    async fn test_corrupted_document() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        tokio::fs::write(bucket.path(&id("1")), [0xff; 3])
            .await
            .unwrap();

        assert!(matches!(
            bucket.get(&id("1")).await,
            Err(StoreError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_locks_are_released() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        bucket.insert(&id("1"), "a".into()).await.unwrap();

        assert!(bucket.0.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_bucket() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        bucket.close().await.unwrap();

        assert!(matches!(
            bucket.get(&id("1")).await,
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_callers_release_locks() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        for i in 0..100 {
            let res = timeout(
                Duration::from_millis(1),
                bucket.locked(&id(&i.to_string()), |_, _| async {
                    sleep(Duration::from_millis(10)).await;
                    Ok(())
                }),
            )
            .await;
            assert!(res.is_err());
        }

        sleep(Duration::from_millis(100)).await;

        assert!(bucket.0.locks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_keeps_document_locked() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();

        let res = timeout(
            Duration::from_millis(1),
            bucket.locked(&id("1"), move |_, _| async move {
                sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::Release);
                Ok(())
            }),
        )
        .await;
        assert!(res.is_err());

        // The next mutation waits for the abandoned one to finish
        let seen = bucket
            .locked(&id("1"), move |_, _| async move {
                Ok(done.load(Ordering::Acquire))
            })
            .await
            .unwrap();

        assert!(seen);
        assert!(bucket.0.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_insert_completes() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        let res = timeout(Duration::ZERO, bucket.insert(&id("1"), "a".into())).await;
        assert!(res.is_err());

        assert!(matches!(
            bucket.insert(&id("1"), "b".into()).await,
            Err(StoreError::KeyExists { .. })
        ));
        assert_eq!(bucket.get(&id("1")).await.unwrap().value, "a");
    }

    #[tokio::test]
    async fn test_failed_op_releases_lock() {
        let root = TempDir::new().unwrap();
        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();
        let fail = true;

        let res: Result<(), StoreError> = bucket
            .locked(&id("1"), move |_, _| async move {
                if fail {
                    panic!("operation failed");
                }
                Ok(())
            })
            .await;

        assert!(matches!(res, Err(StoreError::Io(_))));
        assert!(bucket.0.locks.lock().unwrap().is_empty());

        bucket.insert(&id("1"), "a".into()).await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_moves_past_stored_cas() {
        let root = TempDir::new().unwrap();

        // Stamped an hour ahead, as after a clock step back
        let ahead = {
            let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();
            let ahead = bucket.next_cas(0) + 3_600_000_000;
            let bytes = postcard::to_stdvec(&Envelope {
                cas: ahead,
                value: "a".into(),
            })
            .unwrap();

            tokio::fs::write(bucket.path(&id("1")), bytes).await.unwrap();
            ahead
        };

        let bucket = LocalFsBucket::open(root.path(), "states").await.unwrap();

        let next = bucket.replace(&id("1"), "b".into(), ahead).await.unwrap();
        assert!(next > ahead);

        let other = bucket.insert(&id("2"), "c".into()).await.unwrap();
        assert!(other > next);
    }
}
