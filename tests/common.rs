use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use coset::{iana, CborSerializable, CoseSign1Builder, HeaderBuilder};
use signature::Signer;
use time::OffsetDateTime;
use uuid::Uuid;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use mdoc_presentment::definitions::device_engagement::PeripheralServerMode;
use mdoc_presentment::definitions::device_request::ReaderAuthentication;
use mdoc_presentment::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};
use mdoc_presentment::definitions::issuer_signed::IssuerSignedItem;
use mdoc_presentment::definitions::session::{self, EphemeralKeyPair, Role, SessionCipher};
use mdoc_presentment::definitions::x509::x5chain::X5CHAIN_COSE_HEADER_LABEL;
use mdoc_presentment::definitions::x509::{CertificateWithDer, TrustPoint, X5Chain};
use mdoc_presentment::definitions::{
    BleOptions, ConnectionMethod, CoseKey, DeviceRequest, DeviceResponse, DocRequest,
    ItemsRequest, SessionData, SessionEstablishment, SessionTranscript,
};
use mdoc_presentment::presentation::credential::{
    Credential, HeldDocument, InMemoryDocumentStore, SoftwareCredentialKey,
};
use mdoc_presentment::presentation::{PresentmentSession, SessionState};
use mdoc_presentment::transport::loopback::{LoopbackMedium, LoopbackTransport};
use mdoc_presentment::transport::Transport;
use mdoc_presentment::{AppContext, PresentmentConfig};

#[allow(dead_code)]
pub const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
#[allow(dead_code)]
pub const NAMESPACE: &str = "org.iso.18013.5.1";

#[allow(dead_code)]
fn main() {}

/// A peripheral server mode BLE method advertising `uuid`.
#[allow(dead_code)]
pub fn ble(uuid: Uuid) -> ConnectionMethod {
    ConnectionMethod::Ble(BleOptions {
        peripheral_server_mode: Some(PeripheralServerMode {
            uuid,
            ble_device_address: None,
        }),
        central_client_mode: None,
        l2cap_psm: None,
    })
}

/// A held document carrying `elements` in the mDL namespace, with one usable credential.
#[allow(dead_code)]
pub fn held_document(doc_type: &str, display_name: &str, elements: &[&str]) -> HeldDocument {
    let items = elements
        .iter()
        .enumerate()
        .map(|(i, element)| {
            Tag24::new(IssuerSignedItem {
                digest_id: i as u64,
                random: ByteStr::from(rand::random::<[u8; 16]>().to_vec()),
                element_identifier: element.to_string(),
                element_value: ciborium::Value::Text(format!("{display_name} {element}")),
            })
            .unwrap()
        })
        .collect();
    let now = OffsetDateTime::now_utc();
    HeldDocument {
        id: Uuid::new_v4(),
        doc_type: doc_type.to_string(),
        display_name: display_name.to_string(),
        namespaces: BTreeMap::from([(NAMESPACE.to_string(), items)]),
        issuer_auth: CoseSign1Builder::new().signature(vec![0; 64]).build(),
        credentials: vec![Credential::new(
            "mdoc",
            now - time::Duration::days(1),
            now + time::Duration::days(30),
            Arc::new(SoftwareCredentialKey::generate()),
        )],
    }
}

/// Build a session over `medium` holding `documents` and trusting `trust_points`.
#[allow(dead_code)]
pub fn presentment_session(
    medium: &LoopbackMedium,
    config: PresentmentConfig,
    documents: Vec<HeldDocument>,
    trust_points: Vec<TrustPoint>,
) -> Result<PresentmentSession> {
    let mut builder = AppContext::builder(config)
        .transports(Arc::new(medium.clone()))
        .documents(Arc::new(InMemoryDocumentStore::new(documents)));
    for trust_point in trust_points {
        builder = builder.trust_point(trust_point);
    }
    let context = builder.build().context("could not build the context")?;
    Ok(PresentmentSession::new(context))
}

/// Wait, with a deadline, until the session reaches `state`.
#[allow(dead_code)]
pub async fn wait_for_state(session: &PresentmentSession, state: SessionState) -> Result<()> {
    let mut states = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == state))
        .await
        .map_err(|_| anyhow!("session never reached {state}, stuck in {}", session.state()))?
        .context("session is gone")?;
    Ok(())
}

/// A reader certificate issued by a reader root, and the reader's signing key.
pub struct ReaderIdentity {
    pub root: Certificate,
    pub leaf: Certificate,
    key: p256::ecdsa::SigningKey,
}

fn issue_certificate(
    subject: &str,
    issuer: Option<&str>,
    subject_key: p256::PublicKey,
    signer: &p256::ecdsa::SigningKey,
) -> Result<Certificate> {
    let spki = SubjectPublicKeyInfoOwned::from_key(subject_key)
        .map_err(|e| anyhow!("could not encode the subject key: {e}"))?;
    let issuer: Option<Name> = issuer.map(str::parse).transpose()?;
    let subject: Name = subject.parse()?;
    let builder = CertificateBuilder::new(
        Profile::Manual { issuer },
        rand::random::<u64>().into(),
        Validity::from_now(Duration::from_secs(600))?,
        subject,
        spki,
        signer,
    )
    .map_err(|e| anyhow!("could not prepare the certificate: {e}"))?;
    builder
        .build::<p256::ecdsa::DerSignature>()
        .map_err(|e| anyhow!("could not sign the certificate: {e}"))
}

impl ReaderIdentity {
    #[allow(dead_code)]
    pub fn issue() -> Result<Self> {
        let root_key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let root_name = "CN=Test Reader Root,C=US";
        let root = issue_certificate(
            root_name,
            None,
            p256::PublicKey::from(root_key.verifying_key()),
            &root_key,
        )?;
        let leaf = issue_certificate(
            "CN=Test Reader,C=US",
            Some(root_name),
            p256::PublicKey::from(key.verifying_key()),
            &root_key,
        )?;
        Ok(Self { root, leaf, key })
    }

    #[allow(dead_code)]
    pub fn trust_point(&self) -> Result<TrustPoint> {
        let certificate = CertificateWithDer::from_cert(self.root.clone())?;
        Ok(TrustPoint::new(certificate, "Test Reader Root"))
    }

    fn x5chain(&self) -> Result<X5Chain> {
        X5Chain::builder().with_certificate(self.leaf.clone())?.build()
    }

    fn reader_auth(
        &self,
        session_transcript: &SessionTranscript,
        items_request: &Tag24<ItemsRequest>,
    ) -> Result<coset::CoseSign1> {
        let payload = Tag24::new(ReaderAuthentication(
            session_transcript.clone(),
            items_request.clone(),
        ))?
        .to_tagged_bytes()?;
        let x5chain = self.x5chain()?;
        Ok(CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(iana::Algorithm::ES256)
                    .build(),
            )
            .unprotected(
                HeaderBuilder::new()
                    .value(X5CHAIN_COSE_HEADER_LABEL, x5chain.into_cbor())
                    .build(),
            )
            .create_detached_signature(&payload, &[], |tbs| {
                let signature: p256::ecdsa::Signature = self.key.sign(tbs);
                signature.to_bytes().to_vec()
            })
            .build())
    }
}

/// The verifier end of a proximity exchange.
#[allow(dead_code)]
pub struct SimulatedVerifier {
    transport: LoopbackTransport,
    e_reader_key: Tag24<CoseKey>,
    session_transcript: SessionTranscript,
    cipher: SessionCipher,
}

#[allow(dead_code)]
impl SimulatedVerifier {
    /// Scan the engagement and connect over its first BLE method, deriving the session keys.
    pub async fn connect(medium: &LoopbackMedium, qr_code_uri: &str) -> Result<Self> {
        let device_engagement = mdoc_presentment::presentation::engagement::decode_qr_code_uri(
            qr_code_uri,
        )
        .context("could not decode the engagement")?;
        let uuid = device_engagement
            .as_ref()
            .connection_methods
            .iter()
            .find_map(|method| match method {
                ConnectionMethod::Ble(BleOptions {
                    peripheral_server_mode: Some(peripheral),
                    ..
                }) => Some(peripheral.uuid),
                _ => None,
            })
            .ok_or_else(|| anyhow!("no BLE peripheral server mode in the engagement"))?;
        let ident = session::ble_ident(&device_engagement.as_ref().security.1)?;
        let transport = medium.connect(uuid, ident).await?;

        let key = EphemeralKeyPair::generate();
        let shared_secret = key.diffie_hellman(device_engagement.as_ref().e_device_key())?;
        let e_reader_key = Tag24::new(key.public_key())?;
        let session_transcript = SessionTranscript::new(device_engagement, e_reader_key.clone());
        let cipher = SessionCipher::new(Role::Reader, &shared_secret, &session_transcript)?;
        Ok(Self {
            transport,
            e_reader_key,
            session_transcript,
            cipher,
        })
    }

    /// Send the session establishment carrying a request for `elements` of `doc_type`, signed
    /// by `reader` when given.
    pub async fn request(
        &mut self,
        doc_type: &str,
        elements: &[&str],
        reader: Option<&ReaderIdentity>,
    ) -> Result<()> {
        let items_request = Tag24::new(ItemsRequest {
            doc_type: doc_type.to_string(),
            namespaces: BTreeMap::from([(
                NAMESPACE.to_string(),
                elements
                    .iter()
                    .map(|element| (element.to_string(), false))
                    .collect(),
            )]),
            request_info: None,
        })?;
        let reader_auth = reader
            .map(|reader| reader.reader_auth(&self.session_transcript, &items_request))
            .transpose()?;
        let device_request = DeviceRequest {
            version: DeviceRequest::VERSION.to_string(),
            doc_requests: NonEmptyVec::new(DocRequest {
                items_request,
                reader_auth,
            }),
        };
        let plaintext = device_request
            .to_vec()
            .map_err(|e| anyhow!("could not encode the request: {e}"))?;
        let establishment = SessionEstablishment {
            e_reader_key: self.e_reader_key.clone(),
            data: ByteStr::from(self.cipher.encrypt(&plaintext)?),
        };
        let message = establishment
            .to_vec()
            .map_err(|e| anyhow!("could not encode the establishment: {e}"))?;
        self.transport.send(&message).await?;
        Ok(())
    }

    pub async fn receive_response(&mut self) -> Result<DeviceResponse> {
        let message = self.transport.receive().await?;
        let session_data = SessionData::from_slice(&message)
            .map_err(|e| anyhow!("could not decode session data: {e}"))?;
        let Some(data) = session_data.data else {
            bail!("session data without a response: {:?}", session_data.status);
        };
        let plaintext = self.cipher.decrypt(data.as_ref())?;
        DeviceResponse::from_slice(&plaintext).map_err(|e| anyhow!("could not decode response: {e}"))
    }

    /// Whether the holder hung up without sending anything more.
    pub async fn is_hung_up(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.transport.receive()).await,
            Ok(Err(mdoc_presentment::transport::Error::Closed))
        )
    }

    pub async fn terminate(&mut self) -> Result<()> {
        let message = SessionData {
            data: None,
            status: Some(session::Status::SessionTermination),
        }
        .to_vec()
        .map_err(|e| anyhow!("could not encode the termination: {e}"))?;
        self.transport.send(&message).await?;
        Ok(())
    }
}
