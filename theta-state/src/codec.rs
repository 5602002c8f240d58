use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::errors::CodecError;

/// Reserved top-level field carrying the fully qualified type of the state.
pub const TYPE_FIELD: &str = "type";

/// State that can be stored as a document.
///
/// Usually derived with `#[derive(PersistentState)]`, which sets `TYPE_NAME`
/// to the module path of the type. A stable name can be pinned with
/// `#[state(type_name = "...")]` so documents survive a module move.
pub trait PersistentState: Serialize + DeserializeOwned + Send + Sync {
    /// Fully qualified type name, written to the [`TYPE_FIELD`] of every document.
    const TYPE_NAME: &'static str;
}

/// JSON document codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    indent: bool,
}

// Implementations

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty-print encoded documents. Has no effect on what is stored.
    pub fn indented(indent: bool) -> Self {
        Self { indent }
    }

    /// Serialize `value` and tag it with its type discriminator.
    pub fn encode<T: PersistentState>(&self, value: &T) -> Result<String, CodecError> {
        let Value::Object(mut fields) = serde_json::to_value(value).map_err(CodecError::Serialize)?
        else {
            return Err(CodecError::NotAnObject(T::TYPE_NAME));
        };

        if fields.contains_key(TYPE_FIELD) {
            return Err(CodecError::ReservedField(T::TYPE_NAME, TYPE_FIELD));
        }

        fields.insert(TYPE_FIELD.to_string(), Value::String(T::TYPE_NAME.to_string()));

        let doc = Value::Object(fields);
        let text = if self.indent {
            serde_json::to_string_pretty(&doc)
        } else {
            serde_json::to_string(&doc)
        };

        text.map_err(CodecError::Serialize)
    }

    /// Populate `target` from `payload` in place.
    ///
    /// Fields present in the payload overwrite the target, nested objects are
    /// merged field by field, and fields the payload lacks keep whatever the
    /// target held. On error `target` is left untouched.
    pub fn decode_into<T: PersistentState>(
        &self,
        payload: &str,
        target: &mut T,
    ) -> Result<(), CodecError> {
        let Value::Object(mut incoming) =
            serde_json::from_str::<Value>(payload).map_err(CodecError::Deserialize)?
        else {
            return Err(CodecError::MalformedPayload);
        };

        incoming.remove(TYPE_FIELD);

        let mut current = serde_json::to_value(&*target).map_err(CodecError::Serialize)?;
        let Value::Object(fields) = &mut current else {
            return Err(CodecError::NotAnObject(T::TYPE_NAME));
        };

        merge_fields(fields, incoming);

        *target = serde_json::from_value(current).map_err(CodecError::Deserialize)?;

        Ok(())
    }

    /// Read the type discriminator of a stored payload, if it has one.
    pub fn type_name_of(&self, payload: &str) -> Result<Option<String>, CodecError> {
        let Value::Object(mut fields) =
            serde_json::from_str::<Value>(payload).map_err(CodecError::Deserialize)?
        else {
            return Err(CodecError::MalformedPayload);
        };

        Ok(match fields.remove(TYPE_FIELD) {
            Some(Value::String(name)) => Some(name),
            _ => None,
        })
    }
}

fn merge_fields(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        if let Value::Object(nested) = value {
            if let Some(Value::Object(existing)) = target.get_mut(&key) {
                merge_fields(existing, nested);
                continue;
            }
            target.insert(key, Value::Object(nested));
        } else {
            target.insert(key, value);
        }
    }
}
