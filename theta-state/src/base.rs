use std::{
    borrow::{Borrow, Cow},
    fmt::Display,
};

use serde::{Deserialize, Serialize};

use crate::errors::PersistenceError;

/// Separator between the collection name and the entity key.
pub const ID_SEPARATOR: char = '_';

/// Escape character for separators inside collection names.
pub const ID_ESCAPE: char = '%';

/// Longest document id the store accepts, in bytes.
pub const MAX_ID_LEN: usize = 250;

/// Identity of a stored document, `{collection}_{key}`.
///
/// Separators and escapes inside the collection are percent-encoded (`_` as
/// `%5F`, `%` as `%25`), so the first separator always splits the two halves
/// and distinct `(collection, key)` pairs never map to the same id. Plain
/// collection names are kept as they are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

#[macro_export]
#[doc(hidden)]
macro_rules! trace {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] tracing::trace!($($arg)*);}
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! debug {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] tracing::debug!($($arg)*);}
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! info {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] tracing::info!($($arg)*);}
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! warn {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] tracing::warn!($($arg)*);}
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! error {
    ($($arg:tt)*) => {
        {#[cfg(feature = "tracing")] tracing::error!($($arg)*);}
    };
}

/// Strip namespace and generic arguments from a fully qualified type name.
///
/// Both `.` (runtime type names) and `::` (Rust paths) count as separators.
///
/// ```
/// use theta_state::base::short_type_name;
///
/// assert_eq!(short_type_name("Bank.Grains.Account"), "Account");
/// assert_eq!(short_type_name("bank::grains::Account"), "Account");
/// assert_eq!(short_type_name("bank::Ledger<bank::Entry>"), "Ledger");
/// ```
pub fn short_type_name(fully_qualified: &str) -> &str {
    let head = match fully_qualified.find('<') {
        Some(idx) => &fully_qualified[..idx],
        None => fully_qualified,
    };

    head.rsplit(['.', ':']).next().unwrap_or(head).trim()
}

// Implementations

impl DocumentId {
    pub fn new(collection: &str, key: &str) -> Result<Self, PersistenceError> {
        if collection.is_empty() {
            return Err(PersistenceError::InvalidIdentity(
                "collection name can not be empty".into(),
            ));
        }
        if key.is_empty() {
            return Err(PersistenceError::InvalidIdentity(format!(
                "key for collection {collection:?} can not be empty"
            )));
        }

        let id = format!("{}{ID_SEPARATOR}{key}", escape_collection(collection));

        if id.len() > MAX_ID_LEN {
            return Err(PersistenceError::InvalidIdentity(format!(
                "document id is {} bytes long, at most {MAX_ID_LEN} allowed",
                id.len()
            )));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape_collection(collection: &str) -> Cow<'_, str> {
    if !collection.contains([ID_SEPARATOR, ID_ESCAPE]) {
        return Cow::Borrowed(collection);
    }

    let mut escaped = String::with_capacity(collection.len() + 4);
    for c in collection.chars() {
        match c {
            ID_ESCAPE => escaped.push_str("%25"),
            ID_SEPARATOR => escaped.push_str("%5F"),
            c => escaped.push(c),
        }
    }

    Cow::Owned(escaped)
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_format() {
        let id = DocumentId::new("Account", "42").unwrap();

        assert_eq!(id.as_str(), "Account_42");
    }

    #[test]
    fn test_document_id_is_deterministic() {
        let a = DocumentId::new("Account", "42").unwrap();
        let b = DocumentId::new("Account", "42").unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_document_id_injective() {
        let pairs = [
            ("Account", "42"),
            ("Account", "4_2"),
            ("Account", "_42"),
            ("Accounts", "42"),
            ("Ledger", "Account_42"),
            ("My_Grain", "42"),
            ("My", "Grain_42"),
            ("My", "%5FGrain_42"),
            ("My%5FGrain", "42"),
            ("A_", "b"),
            ("A", "__b"),
        ];

        let ids = pairs
            .iter()
            .map(|(c, k)| DocumentId::new(c, k).unwrap())
            .collect::<Vec<_>>();

        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate() {
                assert_eq!(i == j, a == b, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_document_id_escapes_collection() {
        assert_eq!(
            DocumentId::new("My_Grain", "42").unwrap().as_str(),
            "My%5FGrain_42"
        );
        assert_eq!(
            DocumentId::new("100%", "x_y").unwrap().as_str(),
            "100%25_x_y"
        );
    }

    #[test]
    fn test_document_id_rejects_empty_parts() {
        assert!(matches!(
            DocumentId::new("", "42"),
            Err(PersistenceError::InvalidIdentity(_))
        ));
        assert!(DocumentId::new("Account", "").is_err());
    }

    #[test]
    fn test_document_id_length_limit() {
        let key = "k".repeat(MAX_ID_LEN - "Account_".len());
        assert!(DocumentId::new("Account", &key).is_ok());

        let key = "k".repeat(MAX_ID_LEN);
        assert!(DocumentId::new("Account", &key).is_err());
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("Account"), "Account");
        assert_eq!(short_type_name("Bank.Grains.Account"), "Account");
        assert_eq!(short_type_name("bank::grains::Account"), "Account");
        assert_eq!(short_type_name("bank::Ledger<bank::Entry>"), "Ledger");
    }
}
