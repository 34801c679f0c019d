//! Holder configuration: engagement parameters, device authentication preferences and the
//! verifier trust points, read from JSON.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::definitions::device_engagement::ENGAGEMENT_VERSION;
use crate::definitions::x509::{CertificateWithDer, TrustManager, TrustPoint};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported engagement version {0}")]
    EngagementVersion(String),
    #[error("trust point {name}: {reason}")]
    TrustPoint { name: String, reason: String },
}

/// What to do when a verifier's certificate chain is valid but anchored by no trust point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UntrustedVerifierPolicy {
    /// Carry on to consent; the prompt shows the verifier as untrusted.
    #[default]
    Warn,
    /// End the session before anything is shown to the user.
    Block,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPointConfig {
    pub certificate_pem: String,
    pub display_name: String,
    /// Base64-encoded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_policy_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentmentConfig {
    pub engagement_version: String,
    /// Authenticate with an ECDSA signature when the credential can do both.
    pub prefer_signature_to_key_agreement: bool,
    /// The credential domain used for device authentication.
    pub domain_mdoc_signature: String,
    pub untrusted_verifier: UntrustedVerifierPolicy,
    /// Offer an L2CAP channel when advertising in peripheral server mode.
    pub ble_use_l2cap: bool,
    /// How long to wait for a verifier to connect. Unset waits until reset.
    pub connection_timeout_secs: Option<u64>,
    pub trust_points: Vec<TrustPointConfig>,
}

impl Default for PresentmentConfig {
    fn default() -> Self {
        Self {
            engagement_version: ENGAGEMENT_VERSION.to_string(),
            prefer_signature_to_key_agreement: true,
            domain_mdoc_signature: "mdoc".to_string(),
            untrusted_verifier: UntrustedVerifierPolicy::default(),
            ble_use_l2cap: true,
            connection_timeout_secs: None,
            trust_points: Vec::new(),
        }
    }
}

impl PresentmentConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!("loading configuration from {}", path.as_ref().display());
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.engagement_version != ENGAGEMENT_VERSION {
            return Err(Error::EngagementVersion(self.engagement_version.clone()));
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_secs.map(Duration::from_secs)
    }

    /// Parse the configured trust points. Any unreadable entry fails the whole set, so a typo
    /// never silently drops an anchor.
    pub fn trust_manager(&self) -> Result<TrustManager, Error> {
        let mut trust_manager = TrustManager::new();
        for entry in &self.trust_points {
            let trust_point = entry.to_trust_point()?;
            trust_manager
                .add_trust_point(trust_point)
                .map_err(|e| entry.error(e))?;
        }
        tracing::info!("{} trust points configured", trust_manager.len());
        Ok(trust_manager)
    }
}

impl TrustPointConfig {
    fn error(&self, reason: impl ToString) -> Error {
        Error::TrustPoint {
            name: self.display_name.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn to_trust_point(&self) -> Result<TrustPoint, Error> {
        let certificate = CertificateWithDer::from_pem(self.certificate_pem.as_bytes())
            .map_err(|e| self.error(e))?;
        let mut trust_point = TrustPoint::new(certificate, self.display_name.clone());
        if let Some(icon) = &self.display_icon {
            let icon = base64::decode(icon).map_err(|e| self.error(e))?;
            trust_point = trust_point.with_display_icon(icon);
        }
        if let Some(url) = &self.privacy_policy_url {
            trust_point = trust_point.with_privacy_policy_url(url.clone());
        }
        Ok(trust_point)
    }
}
