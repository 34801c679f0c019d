//! Encoding and decoding of the device engagement the holder shows to the verifier.
use crate::definitions::device_engagement::{self, DeviceEngagement};
use crate::definitions::helpers::Tag24;
use crate::definitions::{ConnectionMethod, CoseKey};

use super::Error;

/// An engagement ready to be shown: the exact bytes the session transcript is bound to, and the
/// `mdoc:` URI to render as a QR code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Engagement {
    pub device_engagement: Tag24<DeviceEngagement>,
    pub qr_code_uri: String,
}

impl Engagement {
    pub fn bytes(&self) -> &[u8] {
        &self.device_engagement.inner_bytes
    }
}

/// Encode a device engagement. The output depends only on the inputs, so identical key material
/// and connection methods always give identical bytes.
pub fn encode(
    sender_key: CoseKey,
    connection_methods: Vec<ConnectionMethod>,
    version: &str,
) -> Result<Engagement, Error> {
    let device_engagement = DeviceEngagement::new(sender_key, connection_methods, version)?;
    let device_engagement = Tag24::new(device_engagement)
        .map_err(|e| Error::MalformedEngagement(e.to_string()))?;
    let qr_code_uri = device_engagement.to_qr_code_uri();
    Ok(Engagement {
        device_engagement,
        qr_code_uri,
    })
}

pub fn decode(bytes: &[u8]) -> Result<DeviceEngagement, Error> {
    Ok(DeviceEngagement::from_bytes(bytes)?)
}

/// Decode the payload of a scanned `mdoc:` URI.
pub fn decode_qr_code_uri(qr_code_uri: &str) -> Result<Tag24<DeviceEngagement>, Error> {
    Ok(DeviceEngagement::from_qr_code_uri(qr_code_uri)?)
}

impl From<device_engagement::Error> for Error {
    fn from(e: device_engagement::Error) -> Self {
        Error::MalformedEngagement(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::*;
    use crate::definitions::device_engagement::{PeripheralServerMode, ENGAGEMENT_VERSION};
    use crate::definitions::BleOptions;

    fn fixed_key() -> CoseKey {
        let secret = p256::SecretKey::from_slice(&[0x42; 32]).unwrap();
        CoseKey::from(secret.public_key())
    }

    fn ble() -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid: Uuid::from_u128(0x45efef74_2b2c_4837_a31a_21e9a6c35e4e),
                ble_device_address: None,
            }),
            central_client_mode: None,
            l2cap_psm: Some(0x80),
        })
    }

    #[test]
    fn encoding_is_deterministic_and_round_trips() {
        let first = encode(fixed_key(), vec![ble()], ENGAGEMENT_VERSION).unwrap();
        let second = encode(fixed_key(), vec![ble()], ENGAGEMENT_VERSION).unwrap();
        assert_eq!(first.bytes(), second.bytes());
        assert_eq!(first.qr_code_uri, second.qr_code_uri);

        let decoded = decode(first.bytes()).unwrap();
        assert_eq!(decoded.version, ENGAGEMENT_VERSION);
        assert_eq!(decoded.e_device_key(), &fixed_key());
        assert_eq!(decoded.connection_methods.into_inner(), vec![ble()]);

        let scanned = decode_qr_code_uri(&first.qr_code_uri).unwrap();
        assert_eq!(scanned, first.device_engagement);
    }

    #[test]
    fn empty_methods_and_unknown_versions_are_malformed() {
        assert!(matches!(
            encode(fixed_key(), vec![], ENGAGEMENT_VERSION),
            Err(Error::MalformedEngagement(_))
        ));
        assert!(matches!(
            encode(fixed_key(), vec![ble()], "2.0"),
            Err(Error::MalformedEngagement(_))
        ));
        let bytes = encode(fixed_key(), vec![ble()], ENGAGEMENT_VERSION)
            .unwrap()
            .bytes()
            .to_vec();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 3]),
            Err(Error::MalformedEngagement(_))
        ));
    }
}
