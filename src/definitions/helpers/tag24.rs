//! Support for embedded
//! [CBOR Data Items](https://www.ietf.org/rfc/rfc8949.html#name-encoded-cbor-data-item),
//! also known as a tagged data item with tag number 24.

use ciborium::Value;
use coset::{AsCborValue, CborSerializable, CoseError};

use crate::cbor::{self, CborError};

/// A wrapper for a struct that is to be encoded as a CBOR tagged item, with tag number 24.
///
/// If this struct is created through deserializing CBOR, then the original byte representation is
/// preserved for future serializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag24<T> {
    inner: T,
    pub inner_bytes: Vec<u8>,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Expected a CBOR byte string, received: '{0:?}'")]
    InvalidTag24(Box<Value>),
    #[error("Expected a CBOR tagged data item with tag number 24, received: '{0:?}'")]
    NotATag24(Box<Value>),
    #[error("Unable to encode value as CBOR: {0}")]
    UnableToEncode(String),
    #[error("Unable to decode bytes to inner type: {0}")]
    UnableToDecode(String),
}

impl<T> Tag24<T> {
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The complete encoding of the tagged item, `#6.24(bstr)`.
    pub fn to_tagged_bytes(&self) -> Result<Vec<u8>, CborError> {
        cbor::value_to_vec(&Value::Tag(
            24,
            Box::new(Value::Bytes(self.inner_bytes.clone())),
        ))
    }
}

impl<T: CborSerializable + Clone> Tag24<T> {
    pub fn new(inner: T) -> Result<Tag24<T>> {
        let inner_bytes = inner
            .clone()
            .to_vec()
            .map_err(|e| Error::UnableToEncode(e.to_string()))?;
        Ok(Self { inner, inner_bytes })
    }

    pub fn from_bytes(inner_bytes: Vec<u8>) -> Result<Tag24<T>> {
        let inner = T::from_slice(&inner_bytes).map_err(|e| Error::UnableToDecode(e.to_string()))?;
        Ok(Self { inner, inner_bytes })
    }
}

impl<T: CborSerializable> TryFrom<Value> for Tag24<T> {
    type Error = Error;

    fn try_from(v: Value) -> Result<Tag24<T>> {
        match v {
            Value::Tag(24, inner_value) => match *inner_value {
                Value::Bytes(inner_bytes) => {
                    let inner = T::from_slice(&inner_bytes)
                        .map_err(|e| Error::UnableToDecode(e.to_string()))?;
                    Ok(Tag24 { inner, inner_bytes })
                }
                other => Err(Error::InvalidTag24(Box::new(other))),
            },
            _ => Err(Error::NotATag24(Box::new(v))),
        }
    }
}

impl<T> From<Tag24<T>> for Value {
    fn from(Tag24 { inner_bytes, .. }: Tag24<T>) -> Value {
        Value::Tag(24, Box::new(Value::Bytes(inner_bytes)))
    }
}

impl<T> AsRef<T> for Tag24<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: CborSerializable> CborSerializable for Tag24<T> {}
impl<T: CborSerializable> AsCborValue for Tag24<T> {
    fn from_cbor_value(value: Value) -> coset::Result<Self> {
        Tag24::try_from(value).map_err(|e| {
            CoseError::DecodeFailed(ciborium::de::Error::Semantic(None, e.to_string()))
        })
    }

    fn to_cbor_value(self) -> coset::Result<Value> {
        Ok(self.into())
    }
}
