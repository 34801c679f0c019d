//! Session establishment and session encryption, ISO/IEC 18013-5 §9.1.1.
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ciborium::Value;
use hkdf::Hkdf;
use p256::ecdh::SharedSecret;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cbor::{self, cbor_serializable, CborError};
use crate::definitions::device_engagement::{DeviceEngagement, EReaderKeyBytes};
use crate::definitions::helpers::{ByteStr, Tag24};
use crate::definitions::CoseKey;

pub type DeviceEngagementBytes = Tag24<DeviceEngagement>;
pub type SessionTranscriptBytes = Tag24<SessionTranscript>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("the peer key is not a valid P-256 public key")]
    InvalidPeerKey,
    #[error("unable to derive session key: {0}")]
    KeyDerivation(String),
    #[error("session encryption failed")]
    Encryption,
    #[error("session decryption failed")]
    Decryption,
    #[error("session message counter exhausted")]
    CounterExhausted,
    #[error("malformed session message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Cbor(#[from] CborError),
}

impl From<crate::definitions::helpers::tag24::Error> for Error {
    fn from(e: crate::definitions::helpers::tag24::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}

/// A single-use P-256 key pair, generated per session and never persisted.
///
/// The secret scalar is zeroized when the pair is dropped.
pub struct EphemeralKeyPair {
    secret: p256::SecretKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: p256::SecretKey::random(&mut rand::thread_rng()),
        }
    }

    pub fn public_key(&self) -> CoseKey {
        CoseKey::from(self.secret.public_key())
    }

    pub fn diffie_hellman(&self, peer: &CoseKey) -> Result<SharedSecret, Error> {
        let peer = p256::PublicKey::try_from(peer).map_err(|_| Error::InvalidPeerKey)?;
        Ok(p256::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer.as_affine(),
        ))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Handover structure for the engagement channel. QR engagement has none.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handover {
    Qr,
}

/// `SessionTranscript = [DeviceEngagementBytes, EReaderKeyBytes, Handover]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionTranscript(
    pub DeviceEngagementBytes,
    pub EReaderKeyBytes,
    pub Handover,
);

impl SessionTranscript {
    pub fn new(
        device_engagement_bytes: DeviceEngagementBytes,
        e_reader_key_bytes: EReaderKeyBytes,
    ) -> Self {
        SessionTranscript(device_engagement_bytes, e_reader_key_bytes, Handover::Qr)
    }

    /// The complete `#6.24(bstr .cbor SessionTranscript)` encoding.
    pub fn to_tagged_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(Tag24::new(self.clone())?.to_tagged_bytes()?)
    }
}

impl From<SessionTranscript> for Value {
    fn from(SessionTranscript(de, e_reader_key, handover): SessionTranscript) -> Value {
        let handover = match handover {
            Handover::Qr => Value::Null,
        };
        Value::Array(vec![de.into(), e_reader_key.into(), handover])
    }
}

impl TryFrom<Value> for SessionTranscript {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Array(items) = v else {
            return Err(Error::Malformed("session transcript is not an array".into()));
        };
        match <[Value; 3]>::try_from(items) {
            Ok([de, e_reader_key, Value::Null]) => Ok(SessionTranscript(
                Tag24::try_from(de)?,
                Tag24::try_from(e_reader_key)?,
                Handover::Qr,
            )),
            _ => Err(Error::Malformed("unsupported session transcript".into())),
        }
    }
}

cbor_serializable!(SessionTranscript);

/// HKDF-SHA256 with `SHA-256(SessionTranscriptBytes)` as salt.
pub fn derive_key(
    shared_secret: &SharedSecret,
    session_transcript: &SessionTranscript,
    info: &str,
) -> Result<Zeroizing<[u8; 32]>, Error> {
    let salt = Sha256::digest(session_transcript.to_tagged_bytes()?);
    let mut okm = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(Some(salt.as_ref()), shared_secret.raw_secret_bytes())
        .expand(info.as_bytes(), okm.as_mut())
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// `HKDF-SHA256(EDeviceKeyBytes, info = "BLEIdent")`, truncated to 16 bytes.
pub fn ble_ident(e_device_key_bytes: &Tag24<CoseKey>) -> Result<[u8; 16], Error> {
    let ikm = e_device_key_bytes.to_tagged_bytes()?;
    let mut ident = [0u8; 16];
    Hkdf::<Sha256>::new(None, &ikm)
        .expand(b"BLEIdent", &mut ident)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(ident)
}

/// Which end of the session this cipher belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Device,
    Reader,
}

impl Role {
    fn identifier(self) -> [u8; 8] {
        match self {
            Role::Reader => [0, 0, 0, 0, 0, 0, 0, 0],
            Role::Device => [0, 0, 0, 0, 0, 0, 0, 1],
        }
    }

    fn key_info(self) -> &'static str {
        match self {
            Role::Reader => "SKReader",
            Role::Device => "SKDevice",
        }
    }

    fn peer(self) -> Role {
        match self {
            Role::Reader => Role::Device,
            Role::Device => Role::Reader,
        }
    }
}

/// AES-256-GCM session encryption in both directions for one end of the session.
pub struct SessionCipher {
    role: Role,
    own_key: Zeroizing<[u8; 32]>,
    peer_key: Zeroizing<[u8; 32]>,
    own_counter: u32,
    peer_counter: u32,
}

impl SessionCipher {
    pub fn new(
        role: Role,
        shared_secret: &SharedSecret,
        session_transcript: &SessionTranscript,
    ) -> Result<Self, Error> {
        Ok(Self {
            role,
            own_key: derive_key(shared_secret, session_transcript, role.key_info())?,
            peer_key: derive_key(shared_secret, session_transcript, role.peer().key_info())?,
            own_counter: 1,
            peer_counter: 1,
        })
    }

    fn nonce(role: Role, counter: u32) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&role.identifier());
        nonce[8..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = Self::nonce(self.role, self.own_counter);
        let cipher = Aes256Gcm::new_from_slice(self.own_key.as_ref())
            .map_err(|_| Error::Encryption)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encryption)?;
        self.own_counter = self
            .own_counter
            .checked_add(1)
            .ok_or(Error::CounterExhausted)?;
        Ok(ciphertext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = Self::nonce(self.role.peer(), self.peer_counter);
        let cipher = Aes256Gcm::new_from_slice(self.peer_key.as_ref())
            .map_err(|_| Error::Decryption)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| Error::Decryption)?;
        self.peer_counter = self
            .peer_counter
            .checked_add(1)
            .ok_or(Error::CounterExhausted)?;
        Ok(plaintext)
    }
}

/// The first message sent by the verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEstablishment {
    pub e_reader_key: EReaderKeyBytes,
    pub data: ByteStr,
}

/// Status codes carried by [SessionData].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    SessionEncryptionError,
    CborDecodingError,
    SessionTermination,
}

/// Every message after [SessionEstablishment], in both directions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionData {
    pub data: Option<ByteStr>,
    pub status: Option<Status>,
}

impl Status {
    pub fn code(self) -> u64 {
        match self {
            Status::SessionEncryptionError => 10,
            Status::CborDecodingError => 11,
            Status::SessionTermination => 20,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(code: u64) -> Result<Self, Error> {
        match code {
            10 => Ok(Status::SessionEncryptionError),
            11 => Ok(Status::CborDecodingError),
            20 => Ok(Status::SessionTermination),
            other => Err(Error::Malformed(format!("unknown session status {other}"))),
        }
    }
}

impl From<SessionEstablishment> for Value {
    fn from(s: SessionEstablishment) -> Value {
        Value::Map(vec![
            (Value::Text("eReaderKey".into()), s.e_reader_key.into()),
            (Value::Text("data".into()), s.data.into()),
        ])
    }
}

impl TryFrom<Value> for SessionEstablishment {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut e_reader_key = None;
        let mut data = None;
        for (k, v) in cbor::text_map(v, "SessionEstablishment")? {
            match k.as_str() {
                "eReaderKey" => e_reader_key = Some(Tag24::try_from(v)?),
                "data" => {
                    data = Some(ByteStr::try_from(v).map_err(|e| Error::Malformed(e.to_string()))?)
                }
                _ => {}
            }
        }
        Ok(SessionEstablishment {
            e_reader_key: e_reader_key
                .ok_or_else(|| Error::Malformed("missing eReaderKey".into()))?,
            data: data.ok_or_else(|| Error::Malformed("missing data".into()))?,
        })
    }
}

impl From<SessionData> for Value {
    fn from(s: SessionData) -> Value {
        let mut map = vec![];
        if let Some(data) = s.data {
            map.push((Value::Text("data".into()), data.into()));
        }
        if let Some(status) = s.status {
            map.push((
                Value::Text("status".into()),
                Value::Integer(status.code().into()),
            ));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for SessionData {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut session_data = SessionData::default();
        for (k, v) in cbor::text_map(v, "SessionData")? {
            match (k.as_str(), v) {
                ("data", v) => {
                    session_data.data =
                        Some(ByteStr::try_from(v).map_err(|e| Error::Malformed(e.to_string()))?)
                }
                ("status", Value::Integer(code)) => {
                    let code = u64::try_from(code)
                        .map_err(|_| Error::Malformed("negative status".into()))?;
                    session_data.status = Some(Status::try_from(code)?);
                }
                ("status", _) => return Err(Error::Malformed("status is not an integer".into())),
                _ => {}
            }
        }
        if session_data.data.is_none() && session_data.status.is_none() {
            return Err(Error::Malformed("SessionData carries neither data nor status".into()));
        }
        Ok(session_data)
    }
}

cbor_serializable!(SessionEstablishment);
cbor_serializable!(SessionData);
