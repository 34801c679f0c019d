use ciborium::Value;
use coset::{AsCborValue, CborSerializable, CoseError};

/// A CBOR byte string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteStr(Vec<u8>);

impl From<Vec<u8>> for ByteStr {
    fn from(bytes: Vec<u8>) -> ByteStr {
        ByteStr(bytes)
    }
}

impl From<ByteStr> for Vec<u8> {
    fn from(ByteStr(bytes): ByteStr) -> Vec<u8> {
        bytes
    }
}

impl AsRef<[u8]> for ByteStr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<ByteStr> for Value {
    fn from(ByteStr(bytes): ByteStr) -> Value {
        Value::Bytes(bytes)
    }
}

impl TryFrom<Value> for ByteStr {
    type Error = CoseError;

    fn try_from(v: Value) -> Result<ByteStr, CoseError> {
        match v {
            Value::Bytes(bytes) => Ok(ByteStr(bytes)),
            _ => Err(CoseError::UnexpectedItem("value", "byte string")),
        }
    }
}

impl CborSerializable for ByteStr {}
impl AsCborValue for ByteStr {
    fn from_cbor_value(value: Value) -> coset::Result<Self> {
        value.try_into()
    }

    fn to_cbor_value(self) -> coset::Result<Value> {
        Ok(self.into())
    }
}
