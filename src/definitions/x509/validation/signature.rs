use der::Encode;
use x509_cert::Certificate;

use crate::definitions::x509::util::SupportedCurve;

/// Check that the issuer certificate signed the subject certificate.
pub fn issuer_signed_subject(subject: &Certificate, issuer: &Certificate) -> bool {
    let issuer_public_key = match SupportedCurve::from_certificate(issuer) {
        Ok(pk) => pk,
        Err(e) => {
            tracing::error!("failed to decode issuer public key: {e:?}");
            return false;
        }
    };

    let tbs = match subject.tbs_certificate.to_der() {
        Ok(tbs) => tbs,
        Err(e) => {
            tracing::error!("failed to encode subject tbs: {e:?}");
            return false;
        }
    };

    match issuer_public_key.verify_der(
        &tbs,
        subject.signature.raw_bytes(),
        &subject.signature_algorithm.oid,
    ) {
        Ok(()) => true,
        Err(e) => {
            tracing::info!("subject certificate signature could not be validated: {e:?}");
            false
        }
    }
}
