//! Matching verifier requests against held documents, and building the disclosed response.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use coset::{iana, CoseMac0Builder, CoseSign1Builder, HeaderBuilder};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::definitions::device_request::ItemsRequest;
use crate::definitions::device_response::{DocumentErrorCode, Errors, Status};
use crate::definitions::device_signed::{DeviceAuth, DeviceAuthentication, DeviceNamespaces};
use crate::definitions::helpers::{NonEmptyVec, Tag24};
use crate::definitions::issuer_signed::IssuerNamespaces;
use crate::definitions::session::{derive_key, SessionTranscript};
use crate::definitions::x509::X5Chain;
use crate::definitions::{CoseKey, DeviceResponse, DeviceSigned, Document, IssuerSigned};

use super::credential::{Credential, HeldDocument};
use super::trust::TrustDecision;
use super::Error;

/// A single data element, addressed by namespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Claim {
    pub namespace: String,
    pub element: String,
}

impl Claim {
    pub fn new(namespace: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            element: element.into(),
        }
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.element)
    }
}

/// One decoded document request, with what is known about the verifier behind it.
#[derive(Clone, Debug)]
pub struct VerifierRequest {
    pub items_request: ItemsRequest,
    pub reader_chain: Option<X5Chain>,
    pub trust: TrustDecision,
}

impl VerifierRequest {
    pub fn doc_type(&self) -> &str {
        &self.items_request.doc_type
    }

    pub fn requested_claims(&self) -> BTreeSet<Claim> {
        self.items_request
            .requested_claims()
            .map(|(namespace, element)| Claim::new(namespace, element))
            .collect()
    }

    pub fn is_requested(&self, claim: &Claim) -> bool {
        self.items_request
            .namespaces
            .get(&claim.namespace)
            .is_some_and(|elements| elements.contains_key(&claim.element))
    }

    /// Whether the verifier declared it will keep `claim` after the session.
    pub fn intent_to_retain(&self, claim: &Claim) -> bool {
        self.items_request
            .namespaces
            .get(&claim.namespace)
            .and_then(|elements| elements.get(&claim.element))
            .copied()
            .unwrap_or(false)
    }
}

/// A held document that can answer a request.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub document: HeldDocument,
    pub request: VerifierRequest,
}

impl Candidate {
    /// The requested claims this document can actually provide; what the user is asked about.
    pub fn available_claims(&self) -> BTreeSet<Claim> {
        self.request
            .requested_claims()
            .into_iter()
            .filter(|claim| self.document.holds(&claim.namespace, &claim.element))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub enum MatchResult {
    None,
    Single(Candidate),
    Multiple(Vec<Candidate>),
}

/// Decides whether a held document can answer a request for its doc type.
pub trait DocumentMatcher: Send + Sync {
    fn matches(&self, request: &ItemsRequest, document: &HeldDocument) -> bool;
}

/// Same doc type, and at least one requested element held.
#[derive(Clone, Copy, Debug, Default)]
pub struct DocTypeMatcher;

impl DocumentMatcher for DocTypeMatcher {
    fn matches(&self, request: &ItemsRequest, document: &HeldDocument) -> bool {
        document.doc_type == request.doc_type
            && request
                .requested_claims()
                .any(|(namespace, element)| document.holds(namespace, element))
    }
}

/// Matchers by doc type. Doc types without a registered matcher use [DocTypeMatcher].
#[derive(Clone, Default)]
pub struct MatcherRegistry {
    matchers: HashMap<String, Arc<dyn DocumentMatcher>>,
    fallback: DocTypeMatcher,
}

impl MatcherRegistry {
    pub fn register(&mut self, doc_type: impl Into<String>, matcher: Arc<dyn DocumentMatcher>) {
        self.matchers.insert(doc_type.into(), matcher);
    }

    pub fn matcher_for(&self, doc_type: &str) -> &dyn DocumentMatcher {
        match self.matchers.get(doc_type) {
            Some(matcher) => matcher.as_ref(),
            None => &self.fallback,
        }
    }
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherRegistry")
            .field("doc_types", &self.matchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Everything needed to authenticate a response to the current session.
#[derive(Clone, Debug)]
pub struct SigningContext {
    pub session_transcript: SessionTranscript,
    pub e_reader_key: CoseKey,
    pub prefer_signature_to_key_agreement: bool,
    /// Credentials must have been provisioned for this domain.
    pub domain: String,
    pub at: OffsetDateTime,
}

enum AuthMode {
    Signature(iana::Algorithm),
    Mac,
}

#[derive(Clone, Debug, Default)]
pub struct PresentmentCoordinator {
    matchers: MatcherRegistry,
}

impl PresentmentCoordinator {
    pub fn new(matchers: MatcherRegistry) -> Self {
        Self { matchers }
    }

    /// Find the held documents that can answer `request`. Trust does not affect eligibility; it
    /// travels with each candidate to the consent stage.
    pub fn match_documents(
        &self,
        request: &VerifierRequest,
        documents: &[HeldDocument],
    ) -> MatchResult {
        self.match_requests(std::slice::from_ref(request), documents)
    }

    /// [PresentmentCoordinator::match_documents] over every document request of a device request.
    pub fn match_requests(
        &self,
        requests: &[VerifierRequest],
        documents: &[HeldDocument],
    ) -> MatchResult {
        let mut candidates: Vec<Candidate> = requests
            .iter()
            .flat_map(|request| {
                let matcher = self.matchers.matcher_for(request.doc_type());
                documents
                    .iter()
                    .filter(move |document| matcher.matches(&request.items_request, document))
                    .map(move |document| Candidate {
                        document: document.clone(),
                        request: request.clone(),
                    })
            })
            .collect();
        tracing::debug!("{} candidate documents", candidates.len());
        match candidates.len() {
            0 => MatchResult::None,
            1 => candidates
                .pop()
                .map_or(MatchResult::None, MatchResult::Single),
            _ => MatchResult::Multiple(candidates),
        }
    }

    /// Build the response for `candidate`, disclosing exactly the `approved` claims the document
    /// holds. Every other requested claim is reported as not returned.
    pub fn build_response(
        &self,
        candidate: &Candidate,
        approved: &[Claim],
        signing: &SigningContext,
    ) -> Result<DeviceResponse, Error> {
        if let Some(claim) = approved
            .iter()
            .find(|claim| !candidate.request.is_requested(claim))
        {
            return Err(Error::ClaimNotRequested(claim.clone()));
        }
        let approved: BTreeSet<&Claim> = approved.iter().collect();

        let document = &candidate.document;
        let (credential, mode) = select_credential(document, signing)?;
        tracing::debug!("authenticating {} with credential {}", document.doc_type, credential.id);

        let mut namespaces = IssuerNamespaces::new();
        let mut errors = Errors::new();
        for claim in candidate.request.requested_claims() {
            match document.item(&claim.namespace, &claim.element) {
                Some(item) if approved.contains(&claim) => namespaces
                    .entry(claim.namespace)
                    .or_default()
                    .push(item.clone()),
                _ => {
                    errors
                        .entry(claim.namespace)
                        .or_insert_with(BTreeMap::new)
                        .insert(claim.element, DocumentErrorCode::DataNotReturned);
                }
            }
        }

        let device_namespaces = Tag24::new(DeviceNamespaces::default())
            .map_err(|e| Error::Response(e.to_string()))?;
        let device_authentication = DeviceAuthentication::new(
            signing.session_transcript.clone(),
            document.doc_type.clone(),
            device_namespaces.clone(),
        );
        let payload = Tag24::new(device_authentication)
            .map_err(|e| Error::Response(e.to_string()))?
            .to_tagged_bytes()
            .map_err(|e| Error::Response(e.to_string()))?;
        let device_auth = authenticate(credential, mode, &payload, signing)?;

        let response_document = Document {
            doc_type: document.doc_type.clone(),
            issuer_signed: IssuerSigned {
                namespaces: (!namespaces.is_empty()).then_some(namespaces),
                issuer_auth: document.issuer_auth.clone(),
            },
            device_signed: DeviceSigned {
                namespaces: device_namespaces,
                device_auth,
            },
            errors: (!errors.is_empty()).then_some(errors),
        };
        Ok(DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: Some(NonEmptyVec::new(response_document)),
            document_errors: None,
            status: Status::OK,
        })
    }
}

/// The first usable credential that supports the preferred mode of device authentication, or
/// failing that the other mode.
fn select_credential<'a>(
    document: &'a HeldDocument,
    signing: &SigningContext,
) -> Result<(&'a Credential, AuthMode), Error> {
    let mut usable = document
        .credentials
        .iter()
        .filter(|credential| credential.is_usable(&signing.domain, signing.at))
        .peekable();
    if usable.peek().is_none() {
        tracing::warn!("document {} has no usable credential", document.id);
        return Err(Error::NoEligibleCredential(document.id));
    }
    usable
        .find_map(|credential| {
            let signature = credential.key.signature_algorithm().map(AuthMode::Signature);
            let mac = credential
                .key
                .supports_key_agreement()
                .then_some(AuthMode::Mac);
            let mode = if signing.prefer_signature_to_key_agreement {
                signature.or(mac)
            } else {
                mac.or(signature)
            };
            mode.map(|mode| (credential, mode))
        })
        .ok_or(Error::NoEligibleCredential(document.id))
}

fn authenticate(
    credential: &Credential,
    mode: AuthMode,
    payload: &[u8],
    signing: &SigningContext,
) -> Result<DeviceAuth, Error> {
    match mode {
        AuthMode::Signature(algorithm) => {
            let mut sign1 = CoseSign1Builder::new()
                .protected(HeaderBuilder::new().algorithm(algorithm).build())
                .build();
            let tbs = sign1.tbs_detached_data(payload, &[]);
            sign1.signature = credential
                .key
                .sign(&tbs)
                .map_err(|e| Error::Response(e.to_string()))?;
            Ok(DeviceAuth::DeviceSignature(sign1))
        }
        AuthMode::Mac => {
            let shared_secret = credential
                .key
                .key_agreement(&signing.e_reader_key)
                .map_err(|e| Error::Response(e.to_string()))?;
            let e_mac_key = derive_key(&shared_secret, &signing.session_transcript, "EMacKey")?;
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(e_mac_key.as_ref())
                .map_err(|e| Error::Response(e.to_string()))?;
            let mut mac0 = CoseMac0Builder::new()
                .protected(
                    HeaderBuilder::new()
                        .algorithm(iana::Algorithm::HMAC_256_256)
                        .build(),
                )
                .payload(payload.to_vec())
                .create_tag(&[], |data| {
                    mac.update(data);
                    mac.finalize().into_bytes().to_vec()
                })
                .build();
            // DeviceAuthenticationBytes are rebuilt by the verifier; only the tag is sent.
            mac0.payload = None;
            Ok(DeviceAuth::DeviceMac(mac0))
        }
    }
}
