use std::collections::BTreeMap;

use ciborium::Value;
use coset::{AsCborValue, CoseSign1};

use crate::cbor::{self, cbor_serializable, CborError};
use crate::definitions::helpers::{NonEmptyVec, Tag24};
use crate::definitions::session::SessionTranscript;

pub type ItemsRequestBytes = Tag24<ItemsRequest>;
pub type DocType = String;
pub type NameSpace = String;
pub type IntentToRetain = bool;
pub type DataElementIdentifier = String;
pub type DataElements = BTreeMap<DataElementIdentifier, IntentToRetain>;
pub type Namespaces = BTreeMap<NameSpace, DataElements>;
pub type ReaderAuth = CoseSign1;

/// COSE_Sign1 tag, tolerated around `readerAuth`.
const COSE_SIGN1_TAG: u64 = 18;

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceRequest {
    pub version: String,
    pub doc_requests: NonEmptyVec<DocRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DocRequest {
    pub items_request: ItemsRequestBytes,
    pub reader_auth: Option<ReaderAuth>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ItemsRequest {
    pub doc_type: DocType,
    pub namespaces: Namespaces,
    pub request_info: Option<Vec<(Value, Value)>>,
}

impl DeviceRequest {
    pub const VERSION: &'static str = "1.0";
}

impl ItemsRequest {
    /// Every `(namespace, element)` pair the verifier asked for.
    pub fn requested_claims(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces.iter().flat_map(|(namespace, elements)| {
            elements
                .keys()
                .map(move |element| (namespace.as_str(), element.as_str()))
        })
    }
}

impl From<DeviceRequest> for Value {
    fn from(r: DeviceRequest) -> Value {
        Value::Map(vec![
            (Value::Text("version".into()), Value::Text(r.version)),
            (
                Value::Text("docRequests".into()),
                Value::Array(
                    r.doc_requests
                        .into_inner()
                        .into_iter()
                        .map(Value::from)
                        .collect(),
                ),
            ),
        ])
    }
}

impl TryFrom<Value> for DeviceRequest {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut version = None;
        let mut doc_requests = None;
        for (k, v) in cbor::text_map(v, "DeviceRequest")? {
            match (k.as_str(), v) {
                ("version", Value::Text(v)) => version = Some(v),
                ("docRequests", Value::Array(requests)) => {
                    let requests = requests
                        .into_iter()
                        .map(DocRequest::try_from)
                        .collect::<Result<Vec<_>, _>>()?;
                    doc_requests = Some(NonEmptyVec::try_from(requests).map_err(|_| {
                        CborError::DecodeFailed("DeviceRequest has no docRequests".into())
                    })?);
                }
                ("version" | "docRequests", _) => {
                    return Err(CborError::DecodeFailed(format!(
                        "DeviceRequest has an invalid {k}"
                    )))
                }
                _ => {}
            }
        }
        Ok(DeviceRequest {
            version: version
                .ok_or_else(|| CborError::DecodeFailed("DeviceRequest missing version".into()))?,
            doc_requests: doc_requests.ok_or_else(|| {
                CborError::DecodeFailed("DeviceRequest missing docRequests".into())
            })?,
        })
    }
}

impl From<DocRequest> for Value {
    fn from(r: DocRequest) -> Value {
        let mut map = vec![(Value::Text("itemsRequest".into()), r.items_request.into())];
        if let Some(reader_auth) = r.reader_auth {
            // A COSE_Sign1 built through coset always encodes.
            if let Ok(reader_auth) = reader_auth.to_cbor_value() {
                map.push((Value::Text("readerAuth".into()), reader_auth));
            }
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for DocRequest {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut items_request = None;
        let mut reader_auth = None;
        for (k, v) in cbor::text_map(v, "DocRequest")? {
            match k.as_str() {
                "itemsRequest" => {
                    items_request = Some(
                        Tag24::try_from(v).map_err(|e| CborError::DecodeFailed(e.to_string()))?,
                    )
                }
                "readerAuth" => {
                    let v = match v {
                        Value::Tag(COSE_SIGN1_TAG, inner) => *inner,
                        other => other,
                    };
                    reader_auth = Some(CoseSign1::from_cbor_value(v)?);
                }
                _ => {}
            }
        }
        Ok(DocRequest {
            items_request: items_request
                .ok_or_else(|| CborError::DecodeFailed("DocRequest missing itemsRequest".into()))?,
            reader_auth,
        })
    }
}

impl From<ItemsRequest> for Value {
    fn from(r: ItemsRequest) -> Value {
        let namespaces = r
            .namespaces
            .into_iter()
            .map(|(namespace, elements)| {
                let elements = elements
                    .into_iter()
                    .map(|(element, retain)| (Value::Text(element), Value::Bool(retain)))
                    .collect();
                (Value::Text(namespace), Value::Map(elements))
            })
            .collect();
        let mut map = vec![
            (Value::Text("docType".into()), Value::Text(r.doc_type)),
            (Value::Text("nameSpaces".into()), Value::Map(namespaces)),
        ];
        if let Some(info) = r.request_info {
            map.push((Value::Text("requestInfo".into()), Value::Map(info)));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for ItemsRequest {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut doc_type = None;
        let mut namespaces = None;
        let mut request_info = None;
        for (k, v) in cbor::text_map(v, "ItemsRequest")? {
            match (k.as_str(), v) {
                ("docType", Value::Text(d)) => doc_type = Some(d),
                ("nameSpaces", v) => {
                    let mut parsed = Namespaces::new();
                    for (namespace, elements) in cbor::text_map(v, "nameSpaces")? {
                        let mut data_elements = DataElements::new();
                        for (element, retain) in cbor::text_map(elements, "DataElements")? {
                            let Value::Bool(retain) = retain else {
                                return Err(CborError::DecodeFailed(
                                    "IntentToRetain is not a bool".into(),
                                ));
                            };
                            data_elements.insert(element, retain);
                        }
                        if data_elements.is_empty() {
                            return Err(CborError::DecodeFailed(format!(
                                "no data elements requested in {namespace}"
                            )));
                        }
                        parsed.insert(namespace, data_elements);
                    }
                    namespaces = Some(parsed);
                }
                ("requestInfo", Value::Map(info)) => request_info = Some(info),
                ("docType" | "requestInfo", _) => {
                    return Err(CborError::DecodeFailed(format!(
                        "ItemsRequest has an invalid {k}"
                    )))
                }
                _ => {}
            }
        }
        let namespaces = namespaces
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CborError::DecodeFailed("ItemsRequest missing nameSpaces".into()))?;
        Ok(ItemsRequest {
            doc_type: doc_type
                .ok_or_else(|| CborError::DecodeFailed("ItemsRequest missing docType".into()))?,
            namespaces,
            request_info,
        })
    }
}

cbor_serializable!(DeviceRequest);
cbor_serializable!(DocRequest);
cbor_serializable!(ItemsRequest);

/// `ReaderAuthentication = ["ReaderAuthentication", SessionTranscript, ItemsRequestBytes]`
#[derive(Clone, Debug, PartialEq)]
pub struct ReaderAuthentication(pub SessionTranscript, pub ItemsRequestBytes);

pub type ReaderAuthenticationBytes = Tag24<ReaderAuthentication>;

impl ReaderAuthentication {
    const CONTEXT: &'static str = "ReaderAuthentication";
}

impl From<ReaderAuthentication> for Value {
    fn from(ReaderAuthentication(transcript, items_request): ReaderAuthentication) -> Value {
        Value::Array(vec![
            Value::Text(ReaderAuthentication::CONTEXT.into()),
            transcript.into(),
            items_request.into(),
        ])
    }
}

impl TryFrom<Value> for ReaderAuthentication {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let items = v
            .into_array()
            .map_err(|_| CborError::DecodeFailed("ReaderAuthentication is not an array".into()))?;
        match <[Value; 3]>::try_from(items) {
            Ok([Value::Text(context), transcript, items_request])
                if context == ReaderAuthentication::CONTEXT =>
            {
                Ok(ReaderAuthentication(
                    SessionTranscript::try_from(transcript)
                        .map_err(|e| CborError::DecodeFailed(e.to_string()))?,
                    Tag24::try_from(items_request)
                        .map_err(|e| CborError::DecodeFailed(e.to_string()))?,
                ))
            }
            _ => Err(CborError::DecodeFailed(
                "unrecognised ReaderAuthentication".into(),
            )),
        }
    }
}

cbor_serializable!(ReaderAuthentication);
