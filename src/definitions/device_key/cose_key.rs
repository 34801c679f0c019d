use ciborium::Value;
use coset::iana::Algorithm;
use coset::{AsCborValue, CborSerializable, CoseError};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};

/// An implementation of RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
/// restricted to the EC2 keys used for engagement, session establishment and device
/// authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseKey {
    EC2 { crv: EC2Curve, x: Vec<u8>, y: EC2Y },
}

/// The sign bit or value of the y-coordinate for the EC point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Y {
    Value(Vec<u8>),
    SignBit(bool),
}

/// The RFC-8152 identifier of the curve, for EC2 key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EC2Curve {
    P256,
    P384,
    P521,
}

/// Errors that can occur when deserialising a COSE_Key.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("COSE_Key of kty 'EC2' missing x coordinate")]
    EC2MissingX,
    #[error("COSE_Key of kty 'EC2' missing y coordinate")]
    EC2MissingY,
    #[error("Expected to parse a CBOR bool or bstr for y-coordinate")]
    InvalidTypeY,
    #[error("Expected to parse a CBOR map")]
    NotAMap,
    #[error("This implementation of COSE_Key only supports P-256, P-384 and P-521 elliptic curves")]
    UnsupportedCurve,
    #[error("This implementation of COSE_Key only supports EC2 keys")]
    UnsupportedKeyType,
    #[error("Could not reconstruct coordinates from the provided COSE_Key")]
    InvalidCoseKey,
}

impl CoseKey {
    pub fn signature_algorithm(&self) -> Option<Algorithm> {
        match self {
            CoseKey::EC2 {
                crv: EC2Curve::P256,
                ..
            } => Some(Algorithm::ES256),
            CoseKey::EC2 {
                crv: EC2Curve::P384,
                ..
            } => Some(Algorithm::ES384),
            CoseKey::EC2 {
                crv: EC2Curve::P521,
                ..
            } => Some(Algorithm::ES512),
        }
    }

    pub fn curve(&self) -> EC2Curve {
        match self {
            CoseKey::EC2 { crv, .. } => *crv,
        }
    }
}

impl From<EC2Curve> for Value {
    fn from(crv: EC2Curve) -> Value {
        match crv {
            EC2Curve::P256 => Value::Integer(1.into()),
            EC2Curve::P384 => Value::Integer(2.into()),
            EC2Curve::P521 => Value::Integer(3.into()),
        }
    }
}

impl TryFrom<i128> for EC2Curve {
    type Error = Error;

    fn try_from(crv_id: i128) -> Result<Self, Error> {
        match crv_id {
            1 => Ok(EC2Curve::P256),
            2 => Ok(EC2Curve::P384),
            3 => Ok(EC2Curve::P521),
            _ => Err(Error::UnsupportedCurve),
        }
    }
}

impl From<CoseKey> for Value {
    fn from(key: CoseKey) -> Value {
        match key {
            // Emitted in ascending label order (1, -1, -2, -3) so encodings are stable.
            CoseKey::EC2 { crv, x, y } => Value::Map(vec![
                // kty: 1, EC2: 2
                (Value::Integer(1.into()), Value::Integer(2.into())),
                // crv: -1
                (Value::Integer((-1).into()), crv.into()),
                // x: -2
                (Value::Integer((-2).into()), Value::Bytes(x)),
                // y: -3
                (
                    Value::Integer((-3).into()),
                    match y {
                        EC2Y::Value(v) => Value::Bytes(v),
                        EC2Y::SignBit(b) => Value::Bool(b),
                    },
                ),
            ]),
        }
    }
}

impl TryFrom<Value> for CoseKey {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::NotAMap);
        };
        let mut kty = None;
        let mut crv = None;
        let mut x = None;
        let mut y = None;
        for (label, value) in entries {
            let label: i128 = match label {
                Value::Integer(i) => i.into(),
                _ => continue,
            };
            match label {
                1 => kty = Some(value),
                -1 => crv = Some(value),
                -2 => x = Some(value),
                -3 => y = Some(value),
                _ => {}
            }
        }
        match kty {
            Some(Value::Integer(i)) if i128::from(i) == 2 => {}
            _ => return Err(Error::UnsupportedKeyType),
        }
        let crv = match crv {
            Some(Value::Integer(i)) => EC2Curve::try_from(i128::from(i))?,
            _ => return Err(Error::UnsupportedCurve),
        };
        let x = match x {
            Some(Value::Bytes(x)) => x,
            _ => return Err(Error::EC2MissingX),
        };
        let y = match y {
            Some(Value::Bytes(y)) => EC2Y::Value(y),
            Some(Value::Bool(b)) => EC2Y::SignBit(b),
            Some(_) => return Err(Error::InvalidTypeY),
            None => return Err(Error::EC2MissingY),
        };
        Ok(CoseKey::EC2 { crv, x, y })
    }
}

impl CborSerializable for CoseKey {}
impl AsCborValue for CoseKey {
    fn from_cbor_value(value: Value) -> coset::Result<Self> {
        value.try_into().map_err(|e: Error| {
            CoseError::DecodeFailed(ciborium::de::Error::Semantic(None, e.to_string()))
        })
    }

    fn to_cbor_value(self) -> coset::Result<Value> {
        Ok(self.into())
    }
}

impl From<p256::PublicKey> for CoseKey {
    fn from(public_key: p256::PublicKey) -> CoseKey {
        let point = public_key.to_encoded_point(false);
        CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
            y: EC2Y::Value(point.y().map(|y| y.to_vec()).unwrap_or_default()),
        }
    }
}

impl TryFrom<&CoseKey> for p256::PublicKey {
    type Error = Error;

    fn try_from(key: &CoseKey) -> Result<p256::PublicKey, Error> {
        let CoseKey::EC2 { crv, x, y } = key;
        if *crv != EC2Curve::P256 || x.len() != 32 {
            return Err(Error::UnsupportedCurve);
        }
        let point = match y {
            EC2Y::Value(y) if y.len() == 32 => p256::EncodedPoint::from_affine_coordinates(
                p256::FieldBytes::from_slice(x),
                p256::FieldBytes::from_slice(y),
                false,
            ),
            EC2Y::Value(_) => return Err(Error::InvalidCoseKey),
            EC2Y::SignBit(sign) => {
                let mut bytes = Vec::with_capacity(33);
                bytes.push(if *sign { 3 } else { 2 });
                bytes.extend_from_slice(x);
                p256::EncodedPoint::from_bytes(bytes).map_err(|_| Error::InvalidCoseKey)?
            }
        };
        Option::from(p256::PublicKey::from_encoded_point(&point)).ok_or(Error::InvalidCoseKey)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn p256_public_key_roundtrip() {
        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        let key = CoseKey::from(secret.public_key());
        let bytes = key.clone().to_vec().unwrap();
        // map(4), kty: EC2, crv: P-256
        assert_eq!(&bytes[..5], &[0xa4, 0x01, 0x02, 0x20, 0x01]);
        let decoded = CoseKey::from_slice(&bytes).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(
            p256::PublicKey::try_from(&decoded).unwrap(),
            secret.public_key()
        );
    }

    #[test]
    fn okp_keys_are_rejected() {
        let okp = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(1.into())),
            (Value::Integer((-1).into()), Value::Integer(6.into())),
            (Value::Integer((-2).into()), Value::Bytes(vec![0; 32])),
        ]);
        assert_eq!(CoseKey::try_from(okp), Err(Error::UnsupportedKeyType));
    }
}
