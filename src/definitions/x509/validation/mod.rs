use serde::Serialize;
use time::OffsetDateTime;

use self::signature::issuer_signed_subject;
use self::validity::check_validity_period_at;

use super::{
    util::{common_name_or_unknown, SupportedCurve},
    X5Chain,
};

pub(super) mod signature;
pub(super) mod validity;

pub use validity::Error as ValidityError;

/// Options for certificate chain validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// The time to use for validity period checks.
    /// If `None`, the current system time is used.
    pub validation_time: Option<OffsetDateTime>,
}

impl ValidationOptions {
    pub fn at(validation_time: OffsetDateTime) -> Self {
        Self {
            validation_time: Some(validation_time),
        }
    }

    /// Get the validation time, defaulting to current time if not set.
    pub fn validation_time(&self) -> OffsetDateTime {
        self.validation_time.unwrap_or_else(OffsetDateTime::now_utc)
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate the internal consistency of a chain ordered leaf first: every certificate is inside
/// its validity period, uses a supported key, and is signed by the certificate after it.
///
/// The last certificate's own issuer is not checked here; that is the trust anchor lookup.
pub fn validate_chain(x5chain: &X5Chain, options: &ValidationOptions) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    let validation_time = options.validation_time();
    let certificates: Vec<_> = x5chain.iter().map(|c| &c.inner).collect();

    for (position, certificate) in certificates.iter().enumerate() {
        let name = common_name_or_unknown(certificate);
        outcome.errors.extend(
            check_validity_period_at(certificate, validation_time)
                .into_iter()
                .map(|e| format!("certificate {position} ({name}): {e}")),
        );
        if let Err(e) = SupportedCurve::from_certificate(certificate) {
            outcome
                .errors
                .push(format!("certificate {position} ({name}): {e}"));
        }
    }

    for (position, pair) in certificates.windows(2).enumerate() {
        let (subject, issuer) = (pair[0], pair[1]);
        if subject.tbs_certificate.issuer != issuer.tbs_certificate.subject {
            outcome.errors.push(format!(
                "certificate {position} ({}) was not issued by the next certificate in the chain",
                common_name_or_unknown(subject)
            ));
        } else if !issuer_signed_subject(subject, issuer) {
            outcome.errors.push(format!(
                "certificate {position} ({}) has an invalid signature",
                common_name_or_unknown(subject)
            ));
        }
    }

    outcome
}
