use std::collections::BTreeMap;

use ciborium::Value;
use thiserror::Error;

use crate::cbor::{self, cbor_serializable, CborError};
use crate::definitions::helpers::NonEmptyVec;
use crate::definitions::{DeviceSigned, IssuerSigned};

/// Represents a device response.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceResponse {
    /// The version of the response.
    pub version: String,

    /// The documents associated with the response, if any.
    pub documents: Option<Documents>,

    /// The errors associated with the documents, if any.
    pub document_errors: Option<DocumentErrors>,

    /// The status of the response.
    pub status: Status,
}

pub type Documents = NonEmptyVec<Document>;

/// Represents a document.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// A string representing the type of the document.
    pub doc_type: String,

    /// The issuer-signed data.
    pub issuer_signed: IssuerSigned,

    /// The device-signed data.
    pub device_signed: DeviceSigned,

    /// Requested elements that were not returned, by namespace.
    pub errors: Option<Errors>,
}

/// Errors mapped by namespace and element identifier.
pub type Errors = BTreeMap<String, BTreeMap<String, DocumentErrorCode>>;
/// A list of document errors.
pub type DocumentErrors = NonEmptyVec<DocumentError>;
/// A map of document type to document error for them.
pub type DocumentError = BTreeMap<String, DocumentErrorCode>;

/// Document specific errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentErrorCode {
    DataNotReturned,
    ApplicationSpecific(i128),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    OK,
    GeneralError,
    CborDecodingError,
    CborValidationError,
}

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("invalid status value: {0}")]
    InvalidValue(u64),
}

impl DeviceResponse {
    pub const VERSION: &'static str = "1.0";

    /// Every `(namespace, element)` disclosed across all documents.
    pub fn disclosed_claims(&self) -> Vec<(String, String)> {
        self.documents
            .iter()
            .flat_map(|documents| documents.iter())
            .flat_map(|document| document.issuer_signed.namespaces.iter().flatten())
            .flat_map(|(namespace, items)| {
                items.iter().map(move |item| {
                    (namespace.clone(), item.as_ref().element_identifier.clone())
                })
            })
            .collect()
    }
}

impl From<i128> for DocumentErrorCode {
    fn from(value: i128) -> Self {
        match value {
            0 => DocumentErrorCode::DataNotReturned,
            _ => DocumentErrorCode::ApplicationSpecific(value),
        }
    }
}

impl From<DocumentErrorCode> for i128 {
    fn from(c: DocumentErrorCode) -> i128 {
        match c {
            DocumentErrorCode::DataNotReturned => 0,
            DocumentErrorCode::ApplicationSpecific(i) => i,
        }
    }
}

impl From<Status> for u64 {
    fn from(s: Status) -> u64 {
        match s {
            Status::OK => 0,
            Status::GeneralError => 10,
            Status::CborDecodingError => 11,
            Status::CborValidationError => 12,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(n: u64) -> Result<Status, Error> {
        match n {
            0 => Ok(Status::OK),
            10 => Ok(Status::GeneralError),
            11 => Ok(Status::CborDecodingError),
            12 => Ok(Status::CborValidationError),
            _ => Err(Error::InvalidValue(n)),
        }
    }
}

fn error_codes_to_value(codes: BTreeMap<String, DocumentErrorCode>) -> Value {
    Value::Map(
        codes
            .into_iter()
            .map(|(k, v)| {
                let code = i64::try_from(i128::from(v)).unwrap_or(i64::MAX);
                (Value::Text(k), Value::Integer(code.into()))
            })
            .collect(),
    )
}

fn value_to_error_codes(
    value: Value,
    what: &str,
) -> Result<BTreeMap<String, DocumentErrorCode>, CborError> {
    cbor::text_map(value, what)?
        .into_iter()
        .map(|(k, v)| match v {
            Value::Integer(code) => Ok((k, DocumentErrorCode::from(i128::from(code)))),
            _ => Err(CborError::DecodeFailed(format!("{what} code is not an integer"))),
        })
        .collect()
}

impl From<Document> for Value {
    fn from(d: Document) -> Value {
        let mut map = vec![
            (Value::Text("docType".into()), Value::Text(d.doc_type)),
            (Value::Text("issuerSigned".into()), d.issuer_signed.into()),
            (Value::Text("deviceSigned".into()), d.device_signed.into()),
        ];
        if let Some(errors) = d.errors {
            let errors = errors
                .into_iter()
                .map(|(namespace, codes)| (Value::Text(namespace), error_codes_to_value(codes)))
                .collect();
            map.push((Value::Text("errors".into()), Value::Map(errors)));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut doc_type = None;
        let mut issuer_signed = None;
        let mut device_signed = None;
        let mut errors = None;
        for (k, v) in cbor::text_map(v, "Document")? {
            match (k.as_str(), v) {
                ("docType", Value::Text(d)) => doc_type = Some(d),
                ("issuerSigned", v) => issuer_signed = Some(IssuerSigned::try_from(v)?),
                ("deviceSigned", v) => device_signed = Some(DeviceSigned::try_from(v)?),
                ("errors", v) => {
                    let mut parsed = Errors::new();
                    for (namespace, codes) in cbor::text_map(v, "Errors")? {
                        parsed.insert(namespace, value_to_error_codes(codes, "ErrorItems")?);
                    }
                    errors = Some(parsed);
                }
                ("docType", _) => {
                    return Err(CborError::DecodeFailed("docType is not text".into()))
                }
                _ => {}
            }
        }
        let missing = |field: &str| CborError::DecodeFailed(format!("Document missing {field}"));
        Ok(Document {
            doc_type: doc_type.ok_or_else(|| missing("docType"))?,
            issuer_signed: issuer_signed.ok_or_else(|| missing("issuerSigned"))?,
            device_signed: device_signed.ok_or_else(|| missing("deviceSigned"))?,
            errors,
        })
    }
}

impl From<DeviceResponse> for Value {
    fn from(r: DeviceResponse) -> Value {
        let mut map = vec![(Value::Text("version".into()), Value::Text(r.version))];
        if let Some(documents) = r.documents {
            map.push((
                Value::Text("documents".into()),
                Value::Array(documents.into_inner().into_iter().map(Value::from).collect()),
            ));
        }
        if let Some(document_errors) = r.document_errors {
            map.push((
                Value::Text("documentErrors".into()),
                Value::Array(
                    document_errors
                        .into_inner()
                        .into_iter()
                        .map(error_codes_to_value)
                        .collect(),
                ),
            ));
        }
        map.push((
            Value::Text("status".into()),
            Value::Integer(u64::from(r.status).into()),
        ));
        Value::Map(map)
    }
}

impl TryFrom<Value> for DeviceResponse {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let mut version = None;
        let mut documents = None;
        let mut document_errors = None;
        let mut status = None;
        for (k, v) in cbor::text_map(v, "DeviceResponse")? {
            match (k.as_str(), v) {
                ("version", Value::Text(v)) => version = Some(v),
                ("documents", Value::Array(docs)) => {
                    let docs = docs
                        .into_iter()
                        .map(Document::try_from)
                        .collect::<Result<Vec<_>, _>>()?;
                    documents = NonEmptyVec::maybe_new(docs);
                }
                ("documentErrors", Value::Array(errs)) => {
                    let errs = errs
                        .into_iter()
                        .map(|e| value_to_error_codes(e, "DocumentError"))
                        .collect::<Result<Vec<_>, _>>()?;
                    document_errors = NonEmptyVec::maybe_new(errs);
                }
                ("status", Value::Integer(s)) => {
                    let s = u64::try_from(s)
                        .map_err(|_| CborError::DecodeFailed("negative status".into()))?;
                    status = Some(
                        Status::try_from(s).map_err(|e| CborError::DecodeFailed(e.to_string()))?,
                    );
                }
                ("version" | "documents" | "documentErrors" | "status", _) => {
                    return Err(CborError::DecodeFailed(format!(
                        "DeviceResponse has an invalid {k}"
                    )))
                }
                _ => {}
            }
        }
        Ok(DeviceResponse {
            version: version
                .ok_or_else(|| CborError::DecodeFailed("DeviceResponse missing version".into()))?,
            documents,
            document_errors,
            status: status
                .ok_or_else(|| CborError::DecodeFailed("DeviceResponse missing status".into()))?,
        })
    }
}

cbor_serializable!(Document);
cbor_serializable!(DeviceResponse);

#[cfg(test)]
mod test {
    use coset::{CborSerializable, CoseSign1Builder};

    use super::*;
    use crate::definitions::device_signed::{DeviceAuth, DeviceNamespaces};
    use crate::definitions::helpers::{ByteStr, Tag24};
    use crate::definitions::issuer_signed::{IssuerNamespaces, IssuerSignedItem};

    fn document() -> Document {
        let sign1 = CoseSign1Builder::new().signature(vec![1; 64]).build();
        let item = IssuerSignedItem {
            digest_id: 0,
            random: ByteStr::from(vec![0, 1, 2, 3]),
            element_identifier: "a".to_string(),
            element_value: Value::Text("b".to_string()),
        };
        let mut namespaces = IssuerNamespaces::new();
        namespaces.insert("ns".to_string(), vec![Tag24::new(item).unwrap()]);
        let mut errors = Errors::new();
        errors.insert(
            "ns".to_string(),
            BTreeMap::from([("c".to_string(), DocumentErrorCode::DataNotReturned)]),
        );
        Document {
            doc_type: "a".to_string(),
            issuer_signed: IssuerSigned {
                namespaces: Some(namespaces),
                issuer_auth: sign1.clone(),
            },
            device_signed: DeviceSigned {
                namespaces: Tag24::new(DeviceNamespaces::default()).unwrap(),
                device_auth: DeviceAuth::DeviceSignature(sign1),
            },
            errors: Some(errors),
        }
    }

    #[test]
    fn device_response_reports_disclosed_claims() {
        let response = DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: Some(NonEmptyVec::new(document())),
            document_errors: None,
            status: Status::OK,
        };
        let bytes = response.to_vec().unwrap();
        let decoded = DeviceResponse::from_slice(&bytes).unwrap();
        assert_eq!(decoded.clone().to_vec().unwrap(), bytes);
        assert_eq!(
            decoded.disclosed_claims(),
            vec![("ns".to_string(), "a".to_string())]
        );
        let errors = decoded.documents.unwrap().first().errors.clone().unwrap();
        assert_eq!(errors["ns"]["c"], DocumentErrorCode::DataNotReturned);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let value = Value::Map(vec![
            (Value::Text("version".into()), Value::Text("1.0".into())),
            (Value::Text("status".into()), Value::Integer(3.into())),
        ]);
        assert!(DeviceResponse::try_from(value).is_err());
    }
}
