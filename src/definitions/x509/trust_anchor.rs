//! Configured trust points for verifier (reader) authentication.
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use time::OffsetDateTime;

use super::validation::signature::issuer_signed_subject;
use super::validation::validity::check_validity_period_at;
use super::x5chain::{CertificateWithDer, X5Chain};

/// A trusted verifier root together with how it is presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPoint {
    pub certificate: CertificateWithDer,
    pub display_name: String,
    pub display_icon: Option<Vec<u8>>,
    pub privacy_policy_url: Option<String>,
}

impl TrustPoint {
    pub fn new(certificate: CertificateWithDer, display_name: impl Into<String>) -> Self {
        Self {
            certificate,
            display_name: display_name.into(),
            display_icon: None,
            privacy_policy_url: None,
        }
    }

    pub fn with_display_icon(mut self, icon: Vec<u8>) -> Self {
        self.display_icon = Some(icon);
        self
    }

    pub fn with_privacy_policy_url(mut self, url: impl Into<String>) -> Self {
        self.privacy_policy_url = Some(url.into());
        self
    }

    fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        let errors = check_validity_period_at(&self.certificate.inner, at);
        if !errors.is_empty() {
            tracing::warn!(
                "ignoring trust point {}: {errors:?}",
                self.certificate.common_name()
            );
        }
        errors.is_empty()
    }
}

/// Where a chain meets a trust point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorMatch<'a> {
    /// The chain contains the trust point certificate, or its last certificate was issued by it.
    Anchored(&'a TrustPoint),
    /// The last certificate names a trust point as issuer, but the trust point key does not verify
    /// its signature.
    BadSignature(&'a TrustPoint),
    NotFound,
}

/// Trust points keyed by the DER encoding of their subject name. Populated at configuration time
/// and only read during sessions.
#[derive(Debug, Clone, Default)]
pub struct TrustManager {
    trust_points: BTreeMap<Vec<u8>, TrustPoint>,
}

impl TrustManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trust point, replacing any existing one with the same subject.
    pub fn add_trust_point(&mut self, trust_point: TrustPoint) -> Result<()> {
        let subject = trust_point
            .certificate
            .subject_der()
            .context("unable to encode trust point subject")?;
        if let Some(previous) = self.trust_points.insert(subject, trust_point) {
            tracing::warn!("replaced trust point {}", previous.display_name);
        }
        Ok(())
    }

    pub fn trust_points(&self) -> impl Iterator<Item = &TrustPoint> {
        self.trust_points.values()
    }

    pub fn len(&self) -> usize {
        self.trust_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trust_points.is_empty()
    }

    /// Look for a trust point anchoring `x5chain` at time `at`. Trust points outside their own
    /// validity period are ignored.
    pub fn find_anchor(&self, x5chain: &X5Chain, at: OffsetDateTime) -> AnchorMatch<'_> {
        for certificate in x5chain.iter() {
            let Ok(subject) = certificate.subject_der() else {
                continue;
            };
            if let Some(trust_point) = self.trust_points.get(&subject) {
                if trust_point.certificate.der() == certificate.der() && trust_point.is_valid_at(at)
                {
                    return AnchorMatch::Anchored(trust_point);
                }
            }
        }

        let root = x5chain.root_entity();
        let Ok(issuer) = root.issuer_der() else {
            return AnchorMatch::NotFound;
        };
        match self.trust_points.get(&issuer) {
            Some(trust_point) if trust_point.is_valid_at(at) => {
                if issuer_signed_subject(&root.inner, &trust_point.certificate.inner) {
                    AnchorMatch::Anchored(trust_point)
                } else {
                    AnchorMatch::BadSignature(trust_point)
                }
            }
            _ => AnchorMatch::NotFound,
        }
    }
}
