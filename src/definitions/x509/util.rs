use anyhow::{bail, Context, Error};
use const_oid::{
    db::{
        rfc4519::COMMON_NAME,
        rfc5912::{ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384},
    },
    AssociatedOid, ObjectIdentifier,
};
use der::{
    asn1::{Ia5StringRef, PrintableStringRef, TeletexStringRef, Utf8StringRef},
    referenced::OwnedToRef,
    Tag, Tagged,
};
use ecdsa::{signature::Verifier, PrimeCurve, Signature, VerifyingKey};
use elliptic_curve::{
    sec1::{FromEncodedPoint, ToEncodedPoint},
    AffinePoint, CurveArithmetic, FieldBytesSize, PublicKey,
};
use p256::NistP256;
use p384::NistP384;
use sec1::point::ModulusSize;
use x509_cert::{attr::AttributeValue, Certificate};

/// Get the public key from a certificate for verification.
pub fn public_key<C>(certificate: &Certificate) -> Result<VerifyingKey<C>, Error>
where
    C: AssociatedOid + CurveArithmetic + PrimeCurve,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    certificate
        .tbs_certificate
        .subject_public_key_info
        .owned_to_ref()
        .try_into()
        .map(|key: PublicKey<C>| key.into())
        .context("could not parse public key from PKCS8 SPKI")
}

/// The certificate keys accepted for chain and reader authentication: ECDSA over P-256 with
/// SHA-256 or over P-384 with SHA-384.
#[derive(Debug, Clone)]
pub enum SupportedCurve {
    P256(VerifyingKey<NistP256>),
    P384(VerifyingKey<NistP384>),
}

impl SupportedCurve {
    pub fn from_certificate(certificate: &Certificate) -> Result<Self, Error> {
        if let Ok(key) = public_key::<NistP256>(certificate) {
            return Ok(Self::P256(key));
        }
        public_key::<NistP384>(certificate)
            .map(Self::P384)
            .context("unsupported public key algorithm, expected P-256 or P-384")
    }

    /// Verify a DER-encoded signature made with `algorithm`, as found in certificates.
    pub fn verify_der(
        &self,
        message: &[u8],
        signature: &[u8],
        algorithm: &ObjectIdentifier,
    ) -> Result<(), Error> {
        match self {
            Self::P256(key) => {
                if *algorithm != ECDSA_WITH_SHA_256 {
                    bail!("unsupported signature algorithm {algorithm} for a P-256 key");
                }
                let signature = Signature::<NistP256>::from_der(signature)?;
                key.verify(message, &signature)?;
            }
            Self::P384(key) => {
                if *algorithm != ECDSA_WITH_SHA_384 {
                    bail!("unsupported signature algorithm {algorithm} for a P-384 key");
                }
                let signature = Signature::<NistP384>::from_der(signature)?;
                key.verify(message, &signature)?;
            }
        }
        Ok(())
    }

    /// Verify a fixed-size `r || s` signature, as found in COSE structures.
    pub fn verify_fixed(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self {
            Self::P256(key) => key.verify(message, &Signature::<NistP256>::from_slice(signature)?)?,
            Self::P384(key) => key.verify(message, &Signature::<NistP384>::from_slice(signature)?)?,
        }
        Ok(())
    }

    pub fn cose_algorithm(&self) -> coset::iana::Algorithm {
        match self {
            Self::P256(_) => coset::iana::Algorithm::ES256,
            Self::P384(_) => coset::iana::Algorithm::ES384,
        }
    }
}

/// Get the first CommonName of the X.509 certificate, or return "Unknown".
pub fn common_name_or_unknown(certificate: &Certificate) -> &str {
    common_name(certificate).unwrap_or("Unknown")
}

fn common_name(certificate: &Certificate) -> Option<&str> {
    certificate
        .tbs_certificate
        .subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter_map(|attribute| {
            if attribute.oid == COMMON_NAME {
                attribute_value_to_str(&attribute.value)
            } else {
                None
            }
        })
        .next()
}

pub fn attribute_value_to_str(av: &AttributeValue) -> Option<&str> {
    match av.tag() {
        Tag::PrintableString => PrintableStringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::Utf8String => Utf8StringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::Ia5String => Ia5StringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::TeletexString => TeletexStringRef::try_from(av).ok().map(|s| s.as_str()),
        _ => None,
    }
}
