use std::future::Future;

use uuid::Uuid;

use crate::{
    base::short_type_name,
    codec::{JsonCodec, PersistentState},
    config::StorageOptions,
    debug,
    errors::PersistenceError,
    etag::ETag,
    manager::PersistenceManager,
    store::{AnyBucket, Bucket},
    trace,
};

/// State slot of one actor activation, owned by the runtime.
///
/// The storage only ever touches `state` and `etag`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateContainer<T> {
    pub state: T,
    pub etag: ETag,
}

/// Stable string key of an entity, unique within its type.
pub trait EntityReference: Sync {
    fn to_key_string(&self) -> String;
}

/// State persistence as seen by the actor runtime.
///
/// `type_name` is the fully qualified type of the entity; only its last
/// segment is used to partition documents.
pub trait StateStorage: Send + Sync {
    /// Load the stored state into `container`. Leaves it untouched if nothing is stored.
    fn read_state<T: PersistentState>(
        &self,
        type_name: &str,
        reference: &(impl EntityReference + ?Sized),
        container: &mut StateContainer<T>,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Save `container.state` against `container.etag` and record the new version.
    fn write_state<T: PersistentState>(
        &self,
        type_name: &str,
        reference: &(impl EntityReference + ?Sized),
        container: &mut StateContainer<T>,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Delete the stored state at `container.etag`.
    ///
    /// The container must hold a version from an earlier read or write, otherwise
    /// this fails with `VersionConflict`.
    fn clear_state<T: PersistentState>(
        &self,
        type_name: &str,
        reference: &(impl EntityReference + ?Sized),
        container: &mut StateContainer<T>,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

/// [`StateStorage`] backed by JSON documents in a bucket.
#[derive(Debug)]
pub struct DocumentStorage<B: Bucket = AnyBucket> {
    manager: PersistenceManager<B>,
    codec: JsonCodec,
}

// Implementations

impl<T> StateContainer<T> {
    pub fn new(state: T) -> Self {
        Self {
            state,
            etag: ETag::None,
        }
    }
}

impl EntityReference for Uuid {
    fn to_key_string(&self) -> String {
        self.to_string()
    }
}

impl EntityReference for str {
    fn to_key_string(&self) -> String {
        self.to_string()
    }
}

impl EntityReference for String {
    fn to_key_string(&self) -> String {
        self.clone()
    }
}

impl EntityReference for u64 {
    fn to_key_string(&self) -> String {
        self.to_string()
    }
}

impl EntityReference for i64 {
    fn to_key_string(&self) -> String {
        self.to_string()
    }
}

impl<R: EntityReference + ?Sized> EntityReference for &R {
    fn to_key_string(&self) -> String {
        (**self).to_key_string()
    }
}

impl DocumentStorage<AnyBucket> {
    /// Connect the provider registered as `provider_name`.
    pub async fn from_options(
        provider_name: Option<&str>,
        options: &StorageOptions,
    ) -> Result<Self, PersistenceError> {
        let bucket_name = options.bucket_for(provider_name);
        let params = options.connection_params()?;

        debug!("Initializing state storage {provider_name:?} on bucket {bucket_name:?}");

        let manager = PersistenceManager::connect(&bucket_name, &params)
            .await?
            .with_timeout(options.operation_timeout());

        Ok(Self::new(manager, JsonCodec::indented(options.indent_json)))
    }
}

impl<B: Bucket> DocumentStorage<B> {
    pub fn new(manager: PersistenceManager<B>, codec: JsonCodec) -> Self {
        Self { manager, codec }
    }

    pub fn manager(&self) -> &PersistenceManager<B> {
        &self.manager
    }

    pub fn codec(&self) -> &JsonCodec {
        &self.codec
    }

    /// Close the underlying bucket handle.
    pub async fn dispose(self) -> Result<(), PersistenceError> {
        self.manager.dispose().await
    }
}

impl<B: Bucket> StateStorage for DocumentStorage<B> {
    async fn read_state<T: PersistentState>(
        &self,
        type_name: &str,
        reference: &(impl EntityReference + ?Sized),
        container: &mut StateContainer<T>,
    ) -> Result<(), PersistenceError> {
        let collection = short_type_name(type_name);
        let key = reference.to_key_string();

        let (payload, etag) = self.manager.read(collection, &key).await?;

        let Some(payload) = payload else {
            trace!("No stored state for {collection} {key}");
            return Ok(());
        };

        self.codec.decode_into(&payload, &mut container.state)?;
        container.etag = etag;

        Ok(())
    }

    async fn write_state<T: PersistentState>(
        &self,
        type_name: &str,
        reference: &(impl EntityReference + ?Sized),
        container: &mut StateContainer<T>,
    ) -> Result<(), PersistenceError> {
        let collection = short_type_name(type_name);
        let key = reference.to_key_string();

        let payload = self.codec.encode(&container.state)?;
        let etag = self
            .manager
            .write(collection, &key, payload, &container.etag)
            .await?;

        container.etag = etag;

        Ok(())
    }

    async fn clear_state<T: PersistentState>(
        &self,
        type_name: &str,
        reference: &(impl EntityReference + ?Sized),
        container: &mut StateContainer<T>,
    ) -> Result<(), PersistenceError> {
        let collection = short_type_name(type_name);
        let key = reference.to_key_string();

        self.manager
            .delete(collection, &key, &container.etag)
            .await?;

        container.etag = ETag::None;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use crate::{
        config::Credentials,
        store::{MemoryBucket, MemoryCluster},
    };

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Account {
        balance: i64,
        #[serde(default)]
        nickname: Option<String>,
    }

    impl PersistentState for Account {
        const TYPE_NAME: &'static str = "bank.grains.Account";
    }

    const TYPE: &str = "bank.grains.Account";

    fn storage() -> DocumentStorage<MemoryBucket> {
        let creds = Credentials::new("admin", "password");
        let cluster = MemoryCluster::new(&creds);
        cluster.create_bucket("states");

        let bucket = cluster.open_bucket("states", &creds).unwrap();

        DocumentStorage::new(PersistenceManager::new(bucket), JsonCodec::new())
    }

    #[tokio::test]
    async fn test_read_absent_leaves_container() {
        let storage = storage();
        let mut container = StateContainer::new(Account {
            balance: 5,
            nickname: None,
        });

        storage.read_state(TYPE, "42", &mut container).await.unwrap();

        assert_eq!(container.state.balance, 5);
        assert_eq!(container.etag, ETag::None);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let storage = storage();

        let mut writer = StateContainer::new(Account {
            balance: 10,
            nickname: Some("main".into()),
        });
        storage.write_state(TYPE, "42", &mut writer).await.unwrap();
        assert!(!writer.etag.is_none());

        let mut reader = StateContainer::<Account>::default();
        storage.read_state(TYPE, "42", &mut reader).await.unwrap();

        assert_eq!(reader, writer);
    }

    #[tokio::test]
    async fn test_collection_is_short_type_name() {
        let storage = storage();
        let mut container = StateContainer::new(Account::default());

        storage.write_state(TYPE, &42u64, &mut container).await.unwrap();

        let (payload, etag) = storage.manager().read("Account", "42").await.unwrap();
        assert_eq!(etag, container.etag);
        assert_eq!(
            storage.codec().type_name_of(&payload.unwrap()).unwrap().as_deref(),
            Some("bank.grains.Account")
        );
    }

    #[tokio::test]
    async fn test_failed_write_keeps_etag() {
        let storage = storage();

        let mut first = StateContainer::new(Account::default());
        storage.write_state(TYPE, "42", &mut first).await.unwrap();

        let mut second = first.clone();
        second.state.balance = 1;
        storage.write_state(TYPE, "42", &mut second).await.unwrap();

        first.state.balance = 2;
        let before = first.etag;
        let res = storage.write_state(TYPE, "42", &mut first).await;

        assert!(matches!(res, Err(PersistenceError::VersionConflict { .. })));
        assert_eq!(first.etag, before);
    }

    #[tokio::test]
    async fn test_clear_state() {
        let storage = storage();

        let mut container = StateContainer::new(Account::default());
        storage.write_state(TYPE, "42", &mut container).await.unwrap();
        storage.clear_state(TYPE, "42", &mut container).await.unwrap();

        assert_eq!(container.etag, ETag::None);

        let (payload, _) = storage.manager().read("Account", "42").await.unwrap();
        assert!(payload.is_none());

        // A cleared entity starts over with an insert
        storage.write_state(TYPE, "42", &mut container).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_without_prior_read() {
        let storage = storage();

        let mut writer = StateContainer::new(Account::default());
        storage.write_state(TYPE, "42", &mut writer).await.unwrap();

        let mut fresh = StateContainer::new(Account::default());
        assert!(matches!(
            storage.clear_state(TYPE, "42", &mut fresh).await,
            Err(PersistenceError::VersionConflict { .. })
        ));
    }

    #[test]
    fn test_entity_reference_keys() {
        let id = Uuid::nil();

        assert_eq!(id.to_key_string(), "00000000-0000-0000-0000-000000000000");
        assert_eq!("a".to_key_string(), "a");
        assert_eq!(String::from("b").to_key_string(), "b");
        assert_eq!((-3i64).to_key_string(), "-3");
    }
}
