//! Thin wrappers over [ciborium] so the rest of the crate has one place to encode and decode
//! CBOR, and one error type for it.
use std::io::Cursor;

use serde::{de, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
    /// CBOR input had extra data.
    #[error("extraneous data")]
    ExtraneousData,
}

impl From<coset::CoseError> for CborError {
    fn from(e: coset::CoseError) -> Self {
        match e {
            coset::CoseError::ExtraneousData => CborError::ExtraneousData,
            coset::CoseError::EncodeFailed => CborError::EncodeFailed("COSE".to_string()),
            other => CborError::DecodeFailed(other.to_string()),
        }
    }
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

/// Decode exactly one CBOR item from `slice`; trailing bytes are rejected.
pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    let mut cursor = Cursor::new(slice);
    let value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| CborError::DecodeFailed(e.to_string()))?;
    if cursor.position() as usize != slice.len() {
        return Err(CborError::ExtraneousData);
    }
    Ok(value)
}

/// Encode a [ciborium::Value] tree.
pub fn value_to_vec(value: &ciborium::Value) -> Result<Vec<u8>, CborError> {
    to_vec(value)
}

/// Decode bytes into a [ciborium::Value] tree.
pub fn value_from_slice(slice: &[u8]) -> Result<ciborium::Value, CborError> {
    from_slice(slice)
}

/// Split a CBOR map with text keys into its entries; `what` names the structure in errors.
pub fn text_map(value: ciborium::Value, what: &str) -> Result<Vec<(String, ciborium::Value)>, CborError> {
    let ciborium::Value::Map(entries) = value else {
        return Err(CborError::DecodeFailed(format!("{what} is not a map")));
    };
    entries
        .into_iter()
        .map(|(k, v)| match k {
            ciborium::Value::Text(k) => Ok((k, v)),
            _ => Err(CborError::DecodeFailed(format!("{what} has a non-text key"))),
        })
        .collect()
}

/// Implements [coset::AsCborValue] and [coset::CborSerializable] for a type that already converts
/// to and from [ciborium::Value].
macro_rules! cbor_serializable {
    ($t:ty) => {
        impl ::coset::CborSerializable for $t {}
        impl ::coset::AsCborValue for $t {
            fn from_cbor_value(value: ::ciborium::Value) -> ::coset::Result<Self> {
                <$t as TryFrom<::ciborium::Value>>::try_from(value).map_err(|e| {
                    ::coset::CoseError::DecodeFailed(::ciborium::de::Error::Semantic(
                        None,
                        e.to_string(),
                    ))
                })
            }

            fn to_cbor_value(self) -> ::coset::Result<::ciborium::Value> {
                Ok(self.into())
            }
        }
    };
}
pub(crate) use cbor_serializable;
