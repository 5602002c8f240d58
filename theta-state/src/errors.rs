use thiserror::Error;

use crate::{base::DocumentId, etag::ETag, store::Cas};

/// Failure of a persistence operation, as seen by the actor runtime.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Missing or invalid connection parameters, raised before any I/O.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid document identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid etag {0:?}")]
    InvalidETag(String),

    /// The supplied token does not match the stored version. The document is unchanged.
    #[error("version conflict on {id}: expected {expected:?}, found {}", display_current(.current))]
    VersionConflict {
        id: DocumentId,
        expected: ETag,
        current: Option<ETag>,
    },

    /// An insert targeted a document that already exists.
    #[error("entity {id} already exists")]
    EntityAlreadyExists {
        id: DocumentId,
        current: Option<ETag>,
    },

    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),

    #[error("connection failure: {0}")]
    Connection(#[source] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Status reported by a document store bucket.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    KeyNotFound,
    #[error("key already exists (cas {current})")]
    KeyExists { current: Cas },
    #[error("cas mismatch (current cas {current})")]
    CasMismatch { current: Cas },

    #[error("bucket {0:?} not found")]
    BucketNotFound(String),
    #[error("authentication failed for user {0:?}")]
    AuthenticationFailed(String),
    #[error("bucket handle is closed")]
    Closed,
    #[error("operation timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupted document: {0}")]
    Corrupted(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize state: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("{0} does not serialize to a JSON object")]
    NotAnObject(&'static str),
    #[error("{0} already has a field named {1:?}, which is reserved for the type discriminator")]
    ReservedField(&'static str, &'static str),
    #[error("stored payload is not a JSON object")]
    MalformedPayload,
}

fn display_current(current: &Option<ETag>) -> String {
    match current {
        Some(etag) => format!("{etag:?}"),
        None => "no document".into(),
    }
}

// Implementations

impl PersistenceError {
    /// Whether re-reading and retrying the load-modify-save cycle may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PersistenceError::VersionConflict { .. } | PersistenceError::EntityAlreadyExists { .. }
        )
    }
}

impl StoreError {
    pub fn current_cas(&self) -> Option<Cas> {
        match self {
            StoreError::KeyExists { current } | StoreError::CasMismatch { current } => {
                Some(*current)
            }
            _ => None,
        }
    }
}
