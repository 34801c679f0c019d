//! This module contains the definition of the [IssuerSigned] struct and related types.
//!
//! The holder never re-signs issuer data: items are kept as the exact tagged bytes the issuer
//! digested, and [IssuerSigned::issuer_auth] is passed through untouched.
use std::collections::BTreeMap;

use ciborium::Value;
use coset::{AsCborValue, CoseSign1};

use crate::cbor::{self, cbor_serializable, CborError};
use crate::definitions::helpers::{ByteStr, Tag24};

pub type IssuerNamespaces = BTreeMap<String, Vec<IssuerSignedItemBytes>>;
pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;
pub type DigestId = u64;

/// Represents an issuer-signed object.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSigned {
    pub namespaces: Option<IssuerNamespaces>,
    pub issuer_auth: CoseSign1,
}

/// Represents an item signed by the issuer.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSignedItem {
    /// The ID of the digest used for signing.
    pub digest_id: DigestId,

    /// Random bytes associated with the signed item.
    pub random: ByteStr,

    /// The identifier of the element.
    pub element_identifier: String,

    /// The value of the element.
    pub element_value: Value,
}

impl From<IssuerSigned> for Value {
    fn from(s: IssuerSigned) -> Value {
        let mut map = vec![];
        if let Some(namespaces) = s.namespaces {
            let namespaces = namespaces
                .into_iter()
                .map(|(namespace, items)| {
                    (
                        Value::Text(namespace),
                        Value::Array(items.into_iter().map(Value::from).collect()),
                    )
                })
                .collect();
            map.push((Value::Text("nameSpaces".into()), Value::Map(namespaces)));
        }
        if let Ok(issuer_auth) = s.issuer_auth.to_cbor_value() {
            map.push((Value::Text("issuerAuth".into()), issuer_auth));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for IssuerSigned {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut namespaces = None;
        let mut issuer_auth = None;
        for (k, v) in cbor::text_map(v, "IssuerSigned")? {
            match k.as_str() {
                "nameSpaces" => {
                    let mut parsed = IssuerNamespaces::new();
                    for (namespace, items) in cbor::text_map(v, "IssuerNamespaces")? {
                        let items = items
                            .into_array()
                            .map_err(|_| CborError::DecodeFailed("items are not an array".into()))?
                            .into_iter()
                            .map(|item| {
                                Tag24::try_from(item)
                                    .map_err(|e| CborError::DecodeFailed(e.to_string()))
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        parsed.insert(namespace, items);
                    }
                    namespaces = Some(parsed);
                }
                "issuerAuth" => issuer_auth = Some(CoseSign1::from_cbor_value(v)?),
                _ => {}
            }
        }
        Ok(IssuerSigned {
            namespaces,
            issuer_auth: issuer_auth
                .ok_or_else(|| CborError::DecodeFailed("IssuerSigned missing issuerAuth".into()))?,
        })
    }
}

impl From<IssuerSignedItem> for Value {
    fn from(item: IssuerSignedItem) -> Value {
        Value::Map(vec![
            (
                Value::Text("digestID".into()),
                Value::Integer(item.digest_id.into()),
            ),
            (Value::Text("random".into()), item.random.into()),
            (
                Value::Text("elementIdentifier".into()),
                Value::Text(item.element_identifier),
            ),
            (Value::Text("elementValue".into()), item.element_value),
        ])
    }
}

impl TryFrom<Value> for IssuerSignedItem {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut digest_id = None;
        let mut random = None;
        let mut element_identifier = None;
        let mut element_value = None;
        for (k, v) in cbor::text_map(v, "IssuerSignedItem")? {
            match (k.as_str(), v) {
                ("digestID", Value::Integer(i)) => {
                    digest_id = Some(
                        u64::try_from(i)
                            .map_err(|_| CborError::DecodeFailed("negative digestID".into()))?,
                    )
                }
                ("random", v) => random = Some(ByteStr::try_from(v)?),
                ("elementIdentifier", Value::Text(id)) => element_identifier = Some(id),
                ("elementValue", v) => element_value = Some(v),
                ("digestID" | "elementIdentifier", _) => {
                    return Err(CborError::DecodeFailed(format!(
                        "IssuerSignedItem has an invalid {k}"
                    )))
                }
                _ => {}
            }
        }
        let missing = |field: &str| CborError::DecodeFailed(format!("IssuerSignedItem missing {field}"));
        Ok(IssuerSignedItem {
            digest_id: digest_id.ok_or_else(|| missing("digestID"))?,
            random: random.ok_or_else(|| missing("random"))?,
            element_identifier: element_identifier.ok_or_else(|| missing("elementIdentifier"))?,
            element_value: element_value.ok_or_else(|| missing("elementValue"))?,
        })
    }
}

cbor_serializable!(IssuerSigned);
cbor_serializable!(IssuerSignedItem);
