pub mod trust_anchor;
mod util;
pub mod validation;
pub mod x5chain;

pub use trust_anchor::{AnchorMatch, TrustManager, TrustPoint};
pub use util::SupportedCurve;
pub use x5chain::{Builder, CertificateWithDer, X5Chain};

#[cfg(test)]
pub(crate) mod test {
    use std::time::Duration;

    use der::asn1::OctetString;
    use rand::random;
    use sec1::pkcs8::EncodePublicKey;
    use sha1::{Digest, Sha1};
    use signature::{Keypair, KeypairRef, Signer};
    use x509_cert::{
        builder::{Builder as _, CertificateBuilder},
        ext::pkix::{
            AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier,
        },
        name::Name,
        spki::{
            DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding, SubjectPublicKeyInfoOwned,
        },
        time::Validity,
        Certificate,
    };

    use super::X5Chain;

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum TestCurve {
        P256,
        P384,
    }

    /// A reader root and a reader certificate it issued.
    pub(crate) struct TestChain {
        pub root: Certificate,
        pub leaf: Certificate,
        pub leaf_key: LeafKey,
    }

    pub(crate) enum LeafKey {
        P256(p256::ecdsa::SigningKey),
        P384(p384::ecdsa::SigningKey),
    }

    impl LeafKey {
        /// Sign with the fixed-size `r || s` encoding COSE uses.
        pub fn sign_fixed(&self, data: &[u8]) -> Vec<u8> {
            match self {
                LeafKey::P256(key) => {
                    let signature: p256::ecdsa::Signature = key.sign(data);
                    signature.to_bytes().to_vec()
                }
                LeafKey::P384(key) => {
                    let signature: p384::ecdsa::Signature = key.sign(data);
                    signature.to_bytes().to_vec()
                }
            }
        }

        pub fn algorithm(&self) -> coset::iana::Algorithm {
            match self {
                LeafKey::P256(_) => coset::iana::Algorithm::ES256,
                LeafKey::P384(_) => coset::iana::Algorithm::ES384,
            }
        }
    }

    impl TestChain {
        pub fn x5chain(&self, include_root: bool) -> X5Chain {
            let mut builder = X5Chain::builder().with_certificate(self.leaf.clone()).unwrap();
            if include_root {
                builder = builder.with_certificate(self.root.clone()).unwrap();
            }
            builder.build().unwrap()
        }
    }

    fn ski<K: EncodePublicKey>(key: K) -> OctetString {
        let spki = SubjectPublicKeyInfoOwned::from_key(key).unwrap();
        OctetString::new(Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec()).unwrap()
    }

    pub(crate) fn prepare_root_certificate<S>(root_key: &S, issuer: Name) -> CertificateBuilder<'_, S>
    where
        S: KeypairRef + DynSignatureAlgorithmIdentifier,
        S::VerifyingKey: EncodePublicKey,
    {
        let spki = SubjectPublicKeyInfoOwned::from_key(root_key.verifying_key()).unwrap();
        let mut builder = CertificateBuilder::new(
            x509_cert::builder::Profile::Manual { issuer: None },
            random::<u64>().into(),
            Validity::from_now(Duration::from_secs(600)).unwrap(),
            issuer,
            spki,
            root_key,
        )
        .unwrap();

        builder
            .add_extension(&SubjectKeyIdentifier(ski(root_key.verifying_key())))
            .unwrap();
        builder
            .add_extension(&KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign))
            .unwrap();
        builder
            .add_extension(&BasicConstraints {
                ca: true,
                path_len_constraint: Some(0),
            })
            .unwrap();
        builder
    }

    pub(crate) fn prepare_signer_certificate<'s, S, L>(
        signer_key: &'s L,
        root_key: &'s S,
        issuer: Name,
    ) -> CertificateBuilder<'s, S>
    where
        S: KeypairRef + DynSignatureAlgorithmIdentifier,
        S::VerifyingKey: EncodePublicKey,
        L: Keypair,
        L::VerifyingKey: EncodePublicKey,
    {
        let spki = SubjectPublicKeyInfoOwned::from_key(signer_key.verifying_key()).unwrap();
        let mut builder = CertificateBuilder::new(
            x509_cert::builder::Profile::Manual {
                issuer: Some(issuer),
            },
            random::<u64>().into(),
            Validity::from_now(Duration::from_secs(600)).unwrap(),
            "CN=reader,C=US".parse().unwrap(),
            spki,
            root_key,
        )
        .unwrap();

        builder
            .add_extension(&SubjectKeyIdentifier(ski(signer_key.verifying_key())))
            .unwrap();
        builder
            .add_extension(&AuthorityKeyIdentifier {
                key_identifier: Some(ski(root_key.verifying_key())),
                ..Default::default()
            })
            .unwrap();
        builder
            .add_extension(&KeyUsage(KeyUsages::DigitalSignature.into()))
            .unwrap();
        builder
    }

    fn sign<S, Sig>(builder: CertificateBuilder<'_, S>) -> Certificate
    where
        S: KeypairRef + DynSignatureAlgorithmIdentifier + Signer<Sig>,
        S::VerifyingKey: EncodePublicKey,
        Sig: SignatureBitStringEncoding,
    {
        builder.build::<Sig>().unwrap()
    }

    pub(crate) fn issue_chain(curve: TestCurve) -> TestChain {
        let issuer: Name = "CN=reader-root,C=US".parse().unwrap();
        match curve {
            TestCurve::P256 => {
                let root_key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
                let leaf_key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
                let root = sign::<_, p256::ecdsa::DerSignature>(prepare_root_certificate(
                    &root_key,
                    issuer.clone(),
                ));
                let leaf = sign::<_, p256::ecdsa::DerSignature>(prepare_signer_certificate(
                    &leaf_key, &root_key, issuer,
                ));
                TestChain {
                    root,
                    leaf,
                    leaf_key: LeafKey::P256(leaf_key),
                }
            }
            TestCurve::P384 => {
                let root_key = p384::ecdsa::SigningKey::random(&mut rand::thread_rng());
                let leaf_key = p384::ecdsa::SigningKey::random(&mut rand::thread_rng());
                let root = sign::<_, p384::ecdsa::DerSignature>(prepare_root_certificate(
                    &root_key,
                    issuer.clone(),
                ));
                let leaf = sign::<_, p384::ecdsa::DerSignature>(prepare_signer_certificate(
                    &leaf_key, &root_key, issuer,
                ));
                TestChain {
                    root,
                    leaf,
                    leaf_key: LeafKey::P384(leaf_key),
                }
            }
        }
    }
}
