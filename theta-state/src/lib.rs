//! Optimistic-concurrency state storage for theta actors.
//!
//! Actor state is stored as JSON documents named `{Type}_{key}`. Every write
//! carries the [`ETag`](etag::ETag) observed by the last read or write, and the
//! store rejects it if another activation got there first.

extern crate self as theta_state;

pub mod base;
pub mod codec;
pub mod config;
pub mod errors;
pub mod etag;
pub mod manager;
pub mod storage;
pub mod store;

// Re-exports

pub use codec::PersistentState;
pub use errors::{CodecError, PersistenceError, StoreError};
pub use etag::ETag;
pub use manager::PersistenceManager;
pub use storage::{DocumentStorage, StateContainer, StateStorage};

pub mod prelude {
    pub use crate::base::DocumentId;
    pub use crate::codec::{JsonCodec, PersistentState};
    pub use crate::config::{ConnectionParams, Credentials, StorageOptions};
    pub use crate::errors::PersistenceError;
    pub use crate::etag::ETag;
    pub use crate::manager::PersistenceManager;
    pub use crate::storage::{DocumentStorage, EntityReference, StateContainer, StateStorage};

    #[cfg(feature = "macros")]
    pub use theta_state_macros::PersistentState;
}
