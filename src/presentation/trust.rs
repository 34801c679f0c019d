//! Verifier trust: chain validation against the configured trust points, and reader
//! authentication of incoming requests.
use std::sync::Arc;

use coset::CoseSign1;

use crate::definitions::device_request::{DocRequest, ReaderAuthentication};
use crate::definitions::helpers::Tag24;
use crate::definitions::session::SessionTranscript;
use crate::definitions::x509::trust_anchor::AnchorMatch;
use crate::definitions::x509::validation::{validate_chain, ValidationOptions};
use crate::definitions::x509::{TrustManager, TrustPoint, X5Chain};

/// The outcome of evaluating a verifier. Exactly one applies to any presented chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustDecision {
    /// The chain is valid and ends at a configured trust point.
    Trusted(TrustPoint),
    /// Nothing was presented, or a valid chain that no trust point anchors.
    Untrusted,
    /// Bad signature, expired or not yet valid certificate, unsupported algorithm or malformed
    /// reader authentication.
    ChainInvalid(String),
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustDecision::Trusted(_))
    }

    pub fn trust_point(&self) -> Option<&TrustPoint> {
        match self {
            TrustDecision::Trusted(trust_point) => Some(trust_point),
            _ => None,
        }
    }
}

/// Stateless apart from the shared, read-only trust points, so one evaluator serves any number
/// of sessions.
#[derive(Clone, Debug, Default)]
pub struct TrustEvaluator {
    trust_manager: Arc<TrustManager>,
}

impl TrustEvaluator {
    pub fn new(trust_manager: Arc<TrustManager>) -> Self {
        Self { trust_manager }
    }

    pub fn trust_manager(&self) -> &TrustManager {
        &self.trust_manager
    }

    pub fn evaluate(&self, x5chain: &X5Chain) -> TrustDecision {
        self.evaluate_with(x5chain, &ValidationOptions::default())
    }

    pub fn evaluate_with(&self, x5chain: &X5Chain, options: &ValidationOptions) -> TrustDecision {
        let outcome = validate_chain(x5chain, options);
        if !outcome.success() {
            let reason = outcome.errors.join("; ");
            tracing::warn!(
                "verifier chain for {} is invalid: {reason}",
                x5chain.end_entity_common_name()
            );
            return TrustDecision::ChainInvalid(reason);
        }

        match self
            .trust_manager
            .find_anchor(x5chain, options.validation_time())
        {
            AnchorMatch::Anchored(trust_point) => {
                tracing::info!(
                    "verifier {} is trusted through {}",
                    x5chain.end_entity_common_name(),
                    trust_point.display_name
                );
                TrustDecision::Trusted(trust_point.clone())
            }
            AnchorMatch::BadSignature(trust_point) => {
                let reason = format!(
                    "chain names {} as issuer but its signature does not verify",
                    trust_point.display_name
                );
                tracing::warn!("{reason}");
                TrustDecision::ChainInvalid(reason)
            }
            AnchorMatch::NotFound => {
                tracing::info!(
                    "no trust point anchors verifier {}",
                    x5chain.end_entity_common_name()
                );
                TrustDecision::Untrusted
            }
        }
    }

    /// Evaluate the verifier behind one document request. Without `readerAuth` the verifier is
    /// [TrustDecision::Untrusted]; with it, the signature over `ReaderAuthenticationBytes` must
    /// verify with the leaf of the presented chain.
    pub fn evaluate_request(
        &self,
        doc_request: &DocRequest,
        session_transcript: &SessionTranscript,
        options: &ValidationOptions,
    ) -> TrustDecision {
        let Some(reader_auth) = &doc_request.reader_auth else {
            return TrustDecision::Untrusted;
        };
        let x5chain = match X5Chain::from_cose_sign1(reader_auth) {
            Ok(Some(x5chain)) => x5chain,
            Ok(None) => return TrustDecision::ChainInvalid("readerAuth carries no x5chain".into()),
            Err(e) => return TrustDecision::ChainInvalid(format!("unreadable x5chain: {e}")),
        };

        let decision = self.evaluate_with(&x5chain, options);
        if let TrustDecision::ChainInvalid(_) = decision {
            return decision;
        }

        let reader_authentication = ReaderAuthentication(
            session_transcript.clone(),
            doc_request.items_request.clone(),
        );
        let payload = Tag24::new(reader_authentication)
            .map_err(|e| e.to_string())
            .and_then(|bytes| bytes.to_tagged_bytes().map_err(|e| e.to_string()));
        let payload = match payload {
            Ok(payload) => payload,
            Err(reason) => return TrustDecision::ChainInvalid(reason),
        };
        match verify_reader_auth(reader_auth, &x5chain, &payload) {
            Ok(()) => decision,
            Err(reason) => {
                tracing::warn!("reader authentication failed: {reason}");
                TrustDecision::ChainInvalid(reason)
            }
        }
    }
}

fn verify_reader_auth(
    reader_auth: &CoseSign1,
    x5chain: &X5Chain,
    payload: &[u8],
) -> Result<(), String> {
    let key = x5chain
        .end_entity_public_key()
        .map_err(|e| e.to_string())?;
    let expected = coset::Algorithm::Assigned(key.cose_algorithm());
    if reader_auth.protected.header.alg.as_ref() != Some(&expected) {
        return Err(format!(
            "readerAuth algorithm {:?} does not match the reader key",
            reader_auth.protected.header.alg
        ));
    }
    let verify = |signature: &[u8], data: &[u8]| key.verify_fixed(data, signature);
    let verified = match &reader_auth.payload {
        None => reader_auth.verify_detached_signature(payload, &[], verify),
        Some(attached) if attached.as_slice() == payload => {
            reader_auth.verify_signature(&[], verify)
        }
        Some(_) => return Err("readerAuth payload is not the reader authentication".into()),
    };
    verified.map_err(|e| format!("readerAuth signature does not verify: {e}"))
}
