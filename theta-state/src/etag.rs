use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{errors::PersistenceError, store::Cas};

/// Version token carried between persistence operations.
///
/// `None` means the caller has never observed the document, so the next write
/// is an insert. `Known` pins the exact store version the caller last saw.
///
/// The text form is `""` for `None` and the decimal CAS value otherwise,
/// which is what the runtime keeps in its state container between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ETag {
    #[default]
    None,
    Known(Cas),
}

// Implementations

impl ETag {
    pub fn is_none(&self) -> bool {
        matches!(self, ETag::None)
    }

    pub fn cas(&self) -> Option<Cas> {
        match self {
            ETag::None => None,
            ETag::Known(cas) => Some(*cas),
        }
    }
}

impl From<Cas> for ETag {
    fn from(cas: Cas) -> Self {
        ETag::Known(cas)
    }
}

impl From<Option<Cas>> for ETag {
    fn from(cas: Option<Cas>) -> Self {
        cas.map_or(ETag::None, ETag::Known)
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ETag::None => Ok(()),
            ETag::Known(cas) => write!(f, "{cas}"),
        }
    }
}

impl FromStr for ETag {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Ok(ETag::None);
        }

        s.parse::<Cas>()
            .map(ETag::Known)
            .map_err(|_| PersistenceError::InvalidETag(s.to_string()))
    }
}

impl Serialize for ETag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ETag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_text_form() {
        assert_eq!(ETag::None.to_string(), "");
        assert_eq!(ETag::Known(100).to_string(), "100");
    }

    #[test]
    fn test_etag_parse() {
        assert_eq!("".parse::<ETag>().unwrap(), ETag::None);
        assert_eq!("  ".parse::<ETag>().unwrap(), ETag::None);
        assert_eq!("101".parse::<ETag>().unwrap(), ETag::Known(101));
    }

    #[test]
    fn test_etag_rejects_malformed() {
        assert!(matches!(
            "abc".parse::<ETag>(),
            Err(PersistenceError::InvalidETag(s)) if s == "abc"
        ));
        assert!("-1".parse::<ETag>().is_err());
    }

    #[test]
    fn test_etag_serde_as_string() {
        let json = serde_json::to_string(&ETag::Known(7)).unwrap();
        assert_eq!(json, "\"7\"");

        let back: ETag = serde_json::from_str("\"\"").unwrap();
        assert_eq!(back, ETag::None);
    }
}
