use std::io::Read;

use anyhow::{anyhow, bail, Context, Error, Result};
use ciborium::Value as CborValue;
use coset::{CoseSign1, Label};
use x509_cert::der::Encode;
use x509_cert::{certificate::Certificate, der::Decode};

use super::util::{common_name_or_unknown, SupportedCurve};
use crate::definitions::helpers::NonEmptyVec;

/// See: <https://www.iana.org/assignments/cose/cose.xhtml#header-parameters>
pub const X5CHAIN_COSE_HEADER_LABEL: i64 = 0x21;

/// X.509 certificate with the DER representation held in memory for ease of serialization.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertificateWithDer {
    pub inner: Certificate,
    der: Vec<u8>,
}

impl CertificateWithDer {
    pub fn from_pem(bytes: &[u8]) -> Result<Self> {
        let bytes = pem_rfc7468::decode_vec(bytes)
            .map_err(|e| anyhow!("unable to parse certificate from PEM encoding: {e}"))?
            .1;
        CertificateWithDer::from_der(&bytes)
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let inner = Certificate::from_der(bytes)
            .context("unable to parse certificate from DER encoding")?;
        Ok(Self {
            inner,
            der: bytes.to_vec(),
        })
    }

    pub fn from_cert(certificate: Certificate) -> Result<Self> {
        let der = certificate.to_der()?;
        Ok(Self {
            inner: certificate,
            der,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER encoding of the subject name, the identity trust points are keyed by.
    pub fn subject_der(&self) -> Result<Vec<u8>> {
        Ok(self.inner.tbs_certificate.subject.to_der()?)
    }

    /// DER encoding of the issuer name.
    pub fn issuer_der(&self) -> Result<Vec<u8>> {
        Ok(self.inner.tbs_certificate.issuer.to_der()?)
    }

    pub fn common_name(&self) -> &str {
        common_name_or_unknown(&self.inner)
    }
}

#[derive(Debug, Clone)]
pub struct X5Chain(NonEmptyVec<CertificateWithDer>);

impl From<NonEmptyVec<CertificateWithDer>> for X5Chain {
    fn from(v: NonEmptyVec<CertificateWithDer>) -> Self {
        Self(v)
    }
}

impl X5Chain {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn into_cbor(&self) -> CborValue {
        match &self.0.as_ref() {
            &[cert] => CborValue::Bytes(cert.der.clone()),
            certs => CborValue::Array(
                certs
                    .iter()
                    .map(|x509| x509.der.clone())
                    .map(CborValue::Bytes)
                    .collect::<Vec<CborValue>>(),
            ),
        }
    }

    pub fn from_cbor(cbor: CborValue) -> Result<Self, Error> {
        match cbor {
            CborValue::Bytes(bytes) => Self::builder().with_der_certificate(&bytes)?.build(),
            CborValue::Array(x509s) => x509s
                .iter()
                .try_fold(Self::builder(), |builder, x509| match x509 {
                    CborValue::Bytes(bytes) => builder.with_der_certificate(bytes),
                    _ => bail!(
                        "expected x509 certificate in the x5chain to be a cbor encoded bytestring, but received: {x509:?}"
                    ),
                })?
                .build(),
            _ => bail!(
                "expected x5chain to be a cbor encoded bytestring or array, but received: {cbor:?}"
            ),
        }
    }

    /// Find the `x5chain` header of a COSE_Sign1, looking in the unprotected header first.
    pub fn from_cose_sign1(sign1: &CoseSign1) -> Result<Option<Self>, Error> {
        let label = Label::Int(X5CHAIN_COSE_HEADER_LABEL);
        let value = sign1
            .unprotected
            .rest
            .iter()
            .chain(sign1.protected.header.rest.iter())
            .find(|(l, _)| *l == label)
            .map(|(_, v)| v.clone());
        value.map(Self::from_cbor).transpose()
    }

    /// Retrieve the end-entity certificate.
    pub fn end_entity_certificate(&self) -> &Certificate {
        &self.0[0].inner
    }

    /// Retrieve the public key of the end-entity certificate.
    pub fn end_entity_public_key(&self) -> Result<SupportedCurve, Error> {
        SupportedCurve::from_certificate(self.end_entity_certificate())
    }

    /// Retrieve the common name of the end-entity certificate.
    pub fn end_entity_common_name(&self) -> &str {
        common_name_or_unknown(self.end_entity_certificate())
    }

    /// Retrieve the root-entity certificate.
    pub fn root_entity(&self) -> &CertificateWithDer {
        self.0.last()
    }

    /// Iterate over the certificates in the chain.
    pub fn iter(&self) -> impl Iterator<Item = &CertificateWithDer> {
        self.0.iter()
    }
}

#[derive(Default, Debug, Clone)]
pub struct Builder {
    certs: Vec<CertificateWithDer>,
}

impl Builder {
    pub fn with_certificate(mut self, cert: Certificate) -> Result<Builder> {
        let x509 = CertificateWithDer::from_cert(cert)?;
        self.certs.push(x509);
        Ok(self)
    }
    pub fn with_certificate_and_der(mut self, x509: CertificateWithDer) -> Builder {
        self.certs.push(x509);
        self
    }
    pub fn with_pem_certificate(mut self, data: &[u8]) -> Result<Builder> {
        let x509 = CertificateWithDer::from_pem(data)?;
        self.certs.push(x509);
        Ok(self)
    }
    pub fn with_der_certificate(mut self, data: &[u8]) -> Result<Builder> {
        let x509 = CertificateWithDer::from_der(data)?;
        self.certs.push(x509);
        Ok(self)
    }
    pub fn with_pem_certificate_from_io<R: Read>(self, mut io: R) -> Result<Builder> {
        let mut data: Vec<u8> = vec![];
        io.read_to_end(&mut data)?;
        self.with_pem_certificate(&data)
    }
    pub fn build(self) -> Result<X5Chain> {
        Ok(X5Chain(self.certs.try_into().context(
            "at least one certificate must be given to the builder",
        )?))
    }
}

#[cfg(test)]
pub mod test {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use der::EncodePem;

    use super::*;
    use crate::definitions::x509::test::{issue_chain, TestCurve};

    #[test]
    pub fn pem_and_cbor_roundtrip() {
        let chain = issue_chain(TestCurve::P256);
        let pem = chain.leaf.to_pem(Default::default()).unwrap();
        let x5chain = X5Chain::builder()
            .with_pem_certificate(pem.as_bytes())
            .expect("unable to add cert")
            .with_certificate(chain.root.clone())
            .expect("unable to add cert")
            .build()
            .expect("unable to build x5chain");
        assert_eq!(x5chain.end_entity_common_name(), "reader");

        let decoded = X5Chain::from_cbor(x5chain.into_cbor()).unwrap();
        assert_eq!(decoded.iter().count(), 2);
        assert_eq!(decoded.root_entity().inner, chain.root);
    }

    #[test]
    pub fn x5chain_is_found_in_unprotected_header() {
        let chain = issue_chain(TestCurve::P384);
        let sign1 = CoseSign1Builder::new()
            .unprotected(
                HeaderBuilder::new()
                    .value(X5CHAIN_COSE_HEADER_LABEL, chain.x5chain(false).into_cbor())
                    .build(),
            )
            .build();
        let found = X5Chain::from_cose_sign1(&sign1).unwrap().unwrap();
        assert_eq!(found.end_entity_certificate(), &chain.leaf);
        assert!(X5Chain::from_cose_sign1(&CoseSign1Builder::new().build())
            .unwrap()
            .is_none());
    }
}
