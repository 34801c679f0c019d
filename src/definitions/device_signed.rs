//! This module contains the definitions related to device signing.
//!
//! The [DeviceSigned] struct carries the device-signed namespaces and the [DeviceAuth] that binds
//! the response to the session transcript.
use std::collections::BTreeMap;

use ciborium::Value;
use coset::{AsCborValue, CoseMac0, CoseSign1};

use crate::cbor::{self, cbor_serializable, CborError};
use crate::definitions::helpers::Tag24;
use crate::definitions::session::SessionTranscript;

/// Represents a device-signed structure.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSigned {
    /// The device-signed namespaces.
    pub namespaces: DeviceNamespacesBytes,

    /// The device authentication.
    pub device_auth: DeviceAuth,
}

pub type DeviceNamespacesBytes = Tag24<DeviceNamespaces>;
pub type DeviceSignedItems = BTreeMap<String, Value>;

/// Device-signed data elements by namespace. This implementation never self-asserts elements, so
/// it is always empty when produced by the holder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceNamespaces(pub BTreeMap<String, DeviceSignedItems>);

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceAuth {
    DeviceSignature(CoseSign1),
    DeviceMac(CoseMac0),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAuthType {
    Sign1,
    Mac0,
}

pub type DeviceAuthenticationBytes = Tag24<DeviceAuthentication>;

/// `DeviceAuthentication = ["DeviceAuthentication", SessionTranscript, DocType, DeviceNameSpacesBytes]`
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceAuthentication(
    pub SessionTranscript,
    pub String,
    pub DeviceNamespacesBytes,
);

impl DeviceAuthentication {
    const CONTEXT: &'static str = "DeviceAuthentication";

    pub fn new(
        transcript: SessionTranscript,
        doc_type: String,
        namespaces_bytes: DeviceNamespacesBytes,
    ) -> Self {
        Self(transcript, doc_type, namespaces_bytes)
    }
}

impl DeviceAuth {
    pub fn auth_type(&self) -> DeviceAuthType {
        match self {
            DeviceAuth::DeviceSignature(_) => DeviceAuthType::Sign1,
            DeviceAuth::DeviceMac(_) => DeviceAuthType::Mac0,
        }
    }
}

impl From<DeviceNamespaces> for Value {
    fn from(DeviceNamespaces(namespaces): DeviceNamespaces) -> Value {
        Value::Map(
            namespaces
                .into_iter()
                .map(|(namespace, items)| {
                    (
                        Value::Text(namespace),
                        Value::Map(
                            items
                                .into_iter()
                                .map(|(k, v)| (Value::Text(k), v))
                                .collect(),
                        ),
                    )
                })
                .collect(),
        )
    }
}

impl TryFrom<Value> for DeviceNamespaces {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut namespaces = BTreeMap::new();
        for (namespace, items) in cbor::text_map(v, "DeviceNamespaces")? {
            let items = cbor::text_map(items, "DeviceSignedItems")?
                .into_iter()
                .collect();
            namespaces.insert(namespace, items);
        }
        Ok(DeviceNamespaces(namespaces))
    }
}

impl From<DeviceAuth> for Value {
    fn from(auth: DeviceAuth) -> Value {
        // COSE structures assembled through coset always encode.
        let (key, value) = match auth {
            DeviceAuth::DeviceSignature(sign1) => ("deviceSignature", sign1.to_cbor_value()),
            DeviceAuth::DeviceMac(mac0) => ("deviceMac", mac0.to_cbor_value()),
        };
        Value::Map(vec![(
            Value::Text(key.into()),
            value.unwrap_or(Value::Null),
        )])
    }
}

impl TryFrom<Value> for DeviceAuth {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut entries = cbor::text_map(v, "DeviceAuth")?;
        match (entries.pop(), entries.is_empty()) {
            (Some((k, v)), true) if k == "deviceSignature" => {
                Ok(DeviceAuth::DeviceSignature(CoseSign1::from_cbor_value(v)?))
            }
            (Some((k, v)), true) if k == "deviceMac" => {
                Ok(DeviceAuth::DeviceMac(CoseMac0::from_cbor_value(v)?))
            }
            _ => Err(CborError::DecodeFailed(
                "DeviceAuth must hold exactly one of deviceSignature or deviceMac".into(),
            )),
        }
    }
}

impl From<DeviceSigned> for Value {
    fn from(s: DeviceSigned) -> Value {
        Value::Map(vec![
            (Value::Text("nameSpaces".into()), s.namespaces.into()),
            (Value::Text("deviceAuth".into()), s.device_auth.into()),
        ])
    }
}

impl TryFrom<Value> for DeviceSigned {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut namespaces = None;
        let mut device_auth = None;
        for (k, v) in cbor::text_map(v, "DeviceSigned")? {
            match k.as_str() {
                "nameSpaces" => {
                    namespaces = Some(
                        Tag24::try_from(v).map_err(|e| CborError::DecodeFailed(e.to_string()))?,
                    )
                }
                "deviceAuth" => device_auth = Some(DeviceAuth::try_from(v)?),
                _ => {}
            }
        }
        Ok(DeviceSigned {
            namespaces: namespaces
                .ok_or_else(|| CborError::DecodeFailed("DeviceSigned missing nameSpaces".into()))?,
            device_auth: device_auth
                .ok_or_else(|| CborError::DecodeFailed("DeviceSigned missing deviceAuth".into()))?,
        })
    }
}

impl From<DeviceAuthentication> for Value {
    fn from(DeviceAuthentication(transcript, doc_type, namespaces): DeviceAuthentication) -> Value {
        Value::Array(vec![
            Value::Text(DeviceAuthentication::CONTEXT.into()),
            transcript.into(),
            Value::Text(doc_type),
            namespaces.into(),
        ])
    }
}

impl TryFrom<Value> for DeviceAuthentication {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let items = v
            .into_array()
            .map_err(|_| CborError::DecodeFailed("DeviceAuthentication is not an array".into()))?;
        match <[Value; 4]>::try_from(items) {
            Ok([Value::Text(context), transcript, Value::Text(doc_type), namespaces])
                if context == DeviceAuthentication::CONTEXT =>
            {
                Ok(DeviceAuthentication(
                    SessionTranscript::try_from(transcript)
                        .map_err(|e| CborError::DecodeFailed(e.to_string()))?,
                    doc_type,
                    Tag24::try_from(namespaces)
                        .map_err(|e| CborError::DecodeFailed(e.to_string()))?,
                ))
            }
            _ => Err(CborError::DecodeFailed(
                "unrecognised DeviceAuthentication".into(),
            )),
        }
    }
}

cbor_serializable!(DeviceNamespaces);
cbor_serializable!(DeviceAuth);
cbor_serializable!(DeviceSigned);
cbor_serializable!(DeviceAuthentication);
