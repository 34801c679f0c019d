//! Documents held on the device and the keys that authenticate them.
use std::fmt;
use std::sync::Arc;

use coset::{iana, CoseSign1};
use p256::ecdh::SharedSecret;
use p256::ecdsa::signature::Signer;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::definitions::issuer_signed::{IssuerNamespaces, IssuerSignedItemBytes};
use crate::definitions::CoseKey;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("the key cannot be used for {0}")]
    Unsupported(&'static str),
    #[error("the peer key is not a valid P-256 public key")]
    InvalidPeerKey,
    #[error("signing failed: {0}")]
    Signing(String),
}

/// The device key bound to a credential. The secret may live in a secure area; the flow only
/// asks it to sign or to agree on a shared secret.
pub trait CredentialKey: Send + Sync + fmt::Debug {
    fn public_key(&self) -> CoseKey;

    /// The COSE algorithm of [CredentialKey::sign], if the key can sign at all.
    fn signature_algorithm(&self) -> Option<iana::Algorithm>;

    /// Sign `data`, returning the fixed-size `r || s` encoding COSE expects.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError>;

    fn supports_key_agreement(&self) -> bool;

    /// ECDH with the verifier's ephemeral key.
    fn key_agreement(&self, peer: &CoseKey) -> Result<SharedSecret, KeyError>;
}

/// A P-256 key held in process memory.
pub struct SoftwareCredentialKey {
    secret: p256::SecretKey,
    can_sign: bool,
    can_agree: bool,
}

impl SoftwareCredentialKey {
    pub fn new(secret: p256::SecretKey) -> Self {
        Self {
            secret,
            can_sign: true,
            can_agree: true,
        }
    }

    pub fn generate() -> Self {
        Self::new(p256::SecretKey::random(&mut rand::thread_rng()))
    }

    pub fn signing_only(mut self) -> Self {
        self.can_agree = false;
        self
    }

    pub fn key_agreement_only(mut self) -> Self {
        self.can_sign = false;
        self
    }
}

impl fmt::Debug for SoftwareCredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareCredentialKey")
            .field("public_key", &self.public_key())
            .field("can_sign", &self.can_sign)
            .field("can_agree", &self.can_agree)
            .finish_non_exhaustive()
    }
}

impl CredentialKey for SoftwareCredentialKey {
    fn public_key(&self) -> CoseKey {
        CoseKey::from(self.secret.public_key())
    }

    fn signature_algorithm(&self) -> Option<iana::Algorithm> {
        self.can_sign.then_some(iana::Algorithm::ES256)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        if !self.can_sign {
            return Err(KeyError::Unsupported("signing"));
        }
        let signing_key = p256::ecdsa::SigningKey::from(&self.secret);
        let signature: p256::ecdsa::Signature = signing_key
            .try_sign(data)
            .map_err(|e| KeyError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn supports_key_agreement(&self) -> bool {
        self.can_agree
    }

    fn key_agreement(&self, peer: &CoseKey) -> Result<SharedSecret, KeyError> {
        if !self.can_agree {
            return Err(KeyError::Unsupported("key agreement"));
        }
        let peer = p256::PublicKey::try_from(peer).map_err(|_| KeyError::InvalidPeerKey)?;
        Ok(p256::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer.as_affine(),
        ))
    }
}

/// One device key provisioned for a document, with its usage constraints.
#[derive(Clone, Debug)]
pub struct Credential {
    pub id: Uuid,
    /// The signing domain the credential was provisioned for, e.g. `mdoc`.
    pub domain: String,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub revoked: bool,
    pub key: Arc<dyn CredentialKey>,
}

impl Credential {
    pub fn new(
        domain: impl Into<String>,
        valid_from: OffsetDateTime,
        valid_until: OffsetDateTime,
        key: Arc<dyn CredentialKey>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            valid_from,
            valid_until,
            revoked: false,
            key,
        }
    }

    /// Provisioned for `domain`, not revoked, and inside its validity window at `at`.
    pub fn is_usable(&self, domain: &str, at: OffsetDateTime) -> bool {
        self.domain == domain && !self.revoked && self.valid_from <= at && at <= self.valid_until
    }
}

/// A document the holder owns.
#[derive(Clone, Debug)]
pub struct HeldDocument {
    pub id: Uuid,
    pub doc_type: String,
    pub display_name: String,
    /// Issuer-signed items by namespace, exactly as issued.
    pub namespaces: IssuerNamespaces,
    pub issuer_auth: CoseSign1,
    pub credentials: Vec<Credential>,
}

impl HeldDocument {
    pub fn item(&self, namespace: &str, element: &str) -> Option<&IssuerSignedItemBytes> {
        self.namespaces
            .get(namespace)?
            .iter()
            .find(|item| item.as_ref().element_identifier == element)
    }

    pub fn holds(&self, namespace: &str, element: &str) -> bool {
        self.item(namespace, element).is_some()
    }

    /// Every `(namespace, element)` the document carries.
    pub fn claims(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces.iter().flat_map(|(namespace, items)| {
            items
                .iter()
                .map(move |item| (namespace.as_str(), item.as_ref().element_identifier.as_str()))
        })
    }
}

/// Where the flow reads the holder's documents from.
pub trait DocumentStore: Send + Sync {
    fn documents(&self) -> Vec<HeldDocument>;

    fn document(&self, id: Uuid) -> Option<HeldDocument> {
        self.documents().into_iter().find(|d| d.id == id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Vec<HeldDocument>,
}

impl InMemoryDocumentStore {
    pub fn new(documents: Vec<HeldDocument>) -> Self {
        Self { documents }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn documents(&self) -> Vec<HeldDocument> {
        self.documents.clone()
    }
}
