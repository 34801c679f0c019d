//! This module contains the definitions for the [DeviceEngagement] struct and related types.
//!
//! The [DeviceEngagement] is the message a holder shows to a verifier (usually as a QR code) to
//! tell it which ephemeral key to use and how the holder can be reached.
//!
//! The module also provides conversions between [DeviceEngagement] and [ciborium::Value], and
//! the `mdoc:` URI helpers.
use std::collections::BTreeMap;

use ciborium::Value;
use coset::{AsCborValue, CborSerializable, CoseError};
use uuid::Uuid;

pub use error::Error;
pub use nfc_options::NfcOptions;

use crate::cbor;
use crate::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};
use crate::definitions::CoseKey;

pub mod error;
pub mod nfc_options;

pub type EDeviceKeyBytes = Tag24<CoseKey>;
pub type EReaderKeyBytes = Tag24<CoseKey>;

pub type ConnectionMethods = NonEmptyVec<ConnectionMethod>;

/// The only engagement version this implementation speaks.
pub const ENGAGEMENT_VERSION: &str = "1.0";

/// Cipher suite 1: ECDH P-256 / HKDF-SHA256 / AES-256-GCM.
pub const CIPHER_SUITE_1: u64 = 1;

const QR_CODE_URI_PREFIX: &str = "mdoc:";

/// Represents a device engagement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceEngagement {
    /// The version of the device engagement.
    pub version: String,

    /// The cipher suite and ephemeral device key.
    pub security: Security,

    /// The ways a verifier can reach the holder, in order of preference.
    pub connection_methods: ConnectionMethods,
}

/// Cipher suite identifier and the tagged ephemeral device key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Security(pub u64, pub EDeviceKeyBytes);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionMethod {
    /// Represents the options for NFC engagement.
    Nfc(NfcOptions),

    /// Represents the options for a Bluetooth Low Energy connection.
    Ble(BleOptions),

    /// Represents the options for a Wi-Fi Aware connection.
    WifiAware(WifiOptions),
}

/// Represents the options for `Bluetooth Low Energy` (BLE) device retrieval.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BleOptions {
    /// The peripheral server mode for `BLE` device retrieval.
    pub peripheral_server_mode: Option<PeripheralServerMode>,

    /// The central client mode for `BLE` device retrieval.
    pub central_client_mode: Option<CentralClientMode>,

    /// The L2CAP protocol/service multiplexer, once one has been assigned by advertising.
    pub l2cap_psm: Option<u32>,
}

/// Represents a peripheral server mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralServerMode {
    /// The 'UUID' of the peripheral server.
    pub uuid: Uuid,

    /// The 'BLE' device address of the peripheral server, if available.
    pub ble_device_address: Option<ByteStr>,
}

/// Represents the central client mode for device retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralClientMode {
    pub uuid: Uuid,
}

/// Represents the options for a `Wi-Fi Aware` device retrieval.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct WifiOptions {
    /// The passphrase for the `Wi-Fi` connection. If [None], no passphrase is required.
    pub pass_phrase: Option<String>,

    /// The operating class of the `Wi-Fi` channel.
    pub channel_info_operating_class: Option<u64>,

    /// The channel number of the `Wi-Fi` channel.
    pub channel_info_channel_number: Option<u64>,

    /// The band information of the `Wi-Fi` channel.
    pub band_info: Option<ByteStr>,
}

impl DeviceEngagement {
    pub fn new(
        e_device_key: CoseKey,
        connection_methods: Vec<ConnectionMethod>,
        version: impl Into<String>,
    ) -> Result<Self, Error> {
        let version = version.into();
        if version != ENGAGEMENT_VERSION {
            return Err(Error::UnsupportedVersion);
        }
        let connection_methods =
            NonEmptyVec::try_from(connection_methods).map_err(|_| Error::NoConnectionMethods)?;
        let e_device_key_bytes = Tag24::new(e_device_key)?;
        Ok(DeviceEngagement {
            version,
            security: Security(CIPHER_SUITE_1, e_device_key_bytes),
            connection_methods,
        })
    }

    pub fn e_device_key(&self) -> &CoseKey {
        self.security.1.as_ref()
    }

    /// Decode exactly one engagement from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let value = cbor::value_from_slice(bytes).map_err(|_| Error::Malformed)?;
        DeviceEngagement::try_from(value)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(cbor::value_to_vec(&Value::from(self.clone()))?)
    }

    pub fn from_qr_code_uri(qr_code_uri: &str) -> Result<Tag24<Self>, Error> {
        let encoded = qr_code_uri
            .strip_prefix(QR_CODE_URI_PREFIX)
            .ok_or(Error::InvalidQrPrefix)?;
        let bytes = base64::decode_config(encoded, base64::URL_SAFE_NO_PAD)
            .map_err(|_| Error::InvalidQrEncoding)?;
        // Decode through the typed path first so callers see the precise failure.
        DeviceEngagement::from_bytes(&bytes)?;
        Ok(Tag24::from_bytes(bytes)?)
    }
}

impl Tag24<DeviceEngagement> {
    pub fn to_qr_code_uri(&self) -> String {
        qr_code_uri(&self.inner_bytes)
    }
}

/// `mdoc:` followed by the unpadded base64url encoding of the engagement bytes.
pub fn qr_code_uri(device_engagement_bytes: &[u8]) -> String {
    let mut uri = String::from(QR_CODE_URI_PREFIX);
    base64::encode_config_buf(device_engagement_bytes, base64::URL_SAFE_NO_PAD, &mut uri);
    uri
}

fn integer_keyed(entries: Vec<(Value, Value)>) -> Result<BTreeMap<i128, Value>, Error> {
    entries
        .into_iter()
        .map(|(k, v)| Ok((k.into_integer().map_err(|_| Error::Malformed)?.into(), v)))
        .collect()
}

fn sorted_map(map: BTreeMap<i64, Value>) -> Value {
    Value::Map(
        map.into_iter()
            .map(|(k, v)| (Value::Integer(k.into()), v))
            .collect(),
    )
}

impl From<DeviceEngagement> for Value {
    fn from(device_engagement: DeviceEngagement) -> Value {
        let Security(cipher_suite, e_device_key_bytes) = device_engagement.security;
        let methods = device_engagement
            .connection_methods
            .into_inner()
            .into_iter()
            .map(Value::from)
            .collect();
        Value::Map(vec![
            (
                Value::Integer(0.into()),
                Value::Text(device_engagement.version),
            ),
            (
                Value::Integer(1.into()),
                Value::Array(vec![
                    Value::Integer(cipher_suite.into()),
                    e_device_key_bytes.into(),
                ]),
            ),
            (Value::Integer(2.into()), Value::Array(methods)),
        ])
    }
}

impl TryFrom<Value> for DeviceEngagement {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::InvalidDeviceEngagement);
        };
        let mut map = integer_keyed(entries)?;

        match map.remove(&0) {
            Some(Value::Text(v)) if v == ENGAGEMENT_VERSION => {}
            Some(Value::Text(_)) => return Err(Error::UnsupportedVersion),
            _ => return Err(Error::Malformed),
        }

        let security = match map.remove(&1) {
            Some(Value::Array(items)) => match <[Value; 2]>::try_from(items) {
                Ok([Value::Integer(suite), key]) => {
                    let suite = u64::try_from(suite).map_err(|_| Error::Malformed)?;
                    if suite != CIPHER_SUITE_1 {
                        return Err(Error::UnsupportedCipherSuite(suite));
                    }
                    Security(suite, Tag24::try_from(key)?)
                }
                _ => return Err(Error::Malformed),
            },
            _ => return Err(Error::Malformed),
        };

        let connection_methods = match map.remove(&2) {
            Some(Value::Array(methods)) => methods
                .into_iter()
                .map(ConnectionMethod::try_from)
                .collect::<Result<Vec<_>, Error>>()?,
            Some(_) => return Err(Error::Malformed),
            None => Vec::new(),
        };
        let connection_methods =
            NonEmptyVec::try_from(connection_methods).map_err(|_| Error::NoConnectionMethods)?;

        if map.remove(&3).is_some() {
            tracing::debug!("ignoring server retrieval methods in device engagement");
        }

        Ok(DeviceEngagement {
            version: ENGAGEMENT_VERSION.into(),
            security,
            connection_methods,
        })
    }
}

impl CborSerializable for DeviceEngagement {}
impl AsCborValue for DeviceEngagement {
    fn from_cbor_value(value: Value) -> coset::Result<Self> {
        value.try_into().map_err(|e: Error| {
            CoseError::DecodeFailed(ciborium::de::Error::Semantic(None, e.to_string()))
        })
    }

    fn to_cbor_value(self) -> coset::Result<Value> {
        Ok(self.into())
    }
}

impl ConnectionMethod {
    pub fn version(&self) -> u64 {
        1
    }

    pub fn transport_type(&self) -> u64 {
        match self {
            Self::Nfc(_) => 1,
            Self::Ble(_) => 2,
            Self::WifiAware(_) => 3,
        }
    }
}

impl TryFrom<Value> for ConnectionMethod {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Array(list) = value else {
            return Err(Error::Malformed);
        };
        let [Value::Integer(transport_type), Value::Integer(version), options] =
            <[Value; 3]>::try_from(list).map_err(|_| Error::Malformed)?
        else {
            return Err(Error::Malformed);
        };
        if i128::from(version) != 1 {
            return Err(Error::UnsupportedDRM);
        }
        match i128::from(transport_type) {
            1 => Ok(ConnectionMethod::Nfc(NfcOptions::try_from(options)?)),
            2 => Ok(ConnectionMethod::Ble(BleOptions::try_from(options)?)),
            3 => Ok(ConnectionMethod::WifiAware(WifiOptions::try_from(options)?)),
            _ => Err(Error::UnsupportedDRM),
        }
    }
}

impl From<ConnectionMethod> for Value {
    fn from(method: ConnectionMethod) -> Self {
        let transport_type = Value::Integer(method.transport_type().into());
        let version = Value::Integer(method.version().into());
        let options = match method {
            ConnectionMethod::Nfc(opts) => opts.into(),
            ConnectionMethod::Ble(opts) => opts.into(),
            ConnectionMethod::WifiAware(opts) => opts.into(),
        };
        Value::Array(vec![transport_type, version, options])
    }
}

impl TryFrom<Value> for BleOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::InvalidBleOptions);
        };
        let mut map = integer_keyed(entries)?;

        let uuid = |value: Option<Value>| -> Result<Uuid, Error> {
            match value {
                Some(Value::Bytes(bytes)) => {
                    let bytes: [u8; 16] =
                        bytes.try_into().map_err(|_| Error::InvalidBleOptions)?;
                    Ok(Uuid::from_bytes(bytes))
                }
                _ => Err(Error::InvalidBleOptions),
            }
        };

        let peripheral_server_mode = match map.remove(&0) {
            Some(Value::Bool(true)) => Some(PeripheralServerMode {
                uuid: uuid(map.remove(&10))?,
                ble_device_address: map
                    .remove(&20)
                    .map(ByteStr::try_from)
                    .transpose()
                    .map_err(|_| Error::InvalidBleOptions)?,
            }),
            Some(Value::Bool(false)) | None => None,
            Some(_) => return Err(Error::InvalidBleOptions),
        };

        let central_client_mode = match map.remove(&1) {
            Some(Value::Bool(true)) => Some(CentralClientMode {
                uuid: uuid(map.remove(&11))?,
            }),
            Some(Value::Bool(false)) | None => None,
            Some(_) => return Err(Error::InvalidBleOptions),
        };

        if peripheral_server_mode.is_none() && central_client_mode.is_none() {
            return Err(Error::InvalidBleOptions);
        }

        let l2cap_psm = match map.remove(&2) {
            Some(Value::Integer(psm)) => {
                Some(u32::try_from(psm).map_err(|_| Error::InvalidBleOptions)?)
            }
            Some(_) => return Err(Error::InvalidBleOptions),
            None => None,
        };

        Ok(BleOptions {
            peripheral_server_mode,
            central_client_mode,
            l2cap_psm,
        })
    }
}

impl From<BleOptions> for Value {
    fn from(o: BleOptions) -> Value {
        // Keys are emitted in ascending order so the encoding is deterministic.
        let mut map = BTreeMap::new();
        map.insert(0, Value::Bool(o.peripheral_server_mode.is_some()));
        map.insert(1, Value::Bool(o.central_client_mode.is_some()));
        if let Some(psm) = o.l2cap_psm {
            map.insert(2, Value::Integer(psm.into()));
        }
        if let Some(PeripheralServerMode {
            uuid,
            ble_device_address,
        }) = o.peripheral_server_mode
        {
            map.insert(10, Value::Bytes(uuid.as_bytes().to_vec()));
            if let Some(address) = ble_device_address {
                map.insert(20, address.into());
            }
        }
        if let Some(CentralClientMode { uuid }) = o.central_client_mode {
            map.insert(11, Value::Bytes(uuid.as_bytes().to_vec()));
        }
        sorted_map(map)
    }
}

impl TryFrom<Value> for WifiOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let Value::Map(entries) = v else {
            return Err(Error::InvalidWifiOptions);
        };
        let mut map = integer_keyed(entries)?;

        let pass_phrase = match map.remove(&0) {
            None => None,
            Some(Value::Text(text)) => Some(text),
            Some(_) => return Err(Error::InvalidWifiOptions),
        };
        let mut lookup_u64 = |idx: i128| -> Result<Option<u64>, Error> {
            match map.remove(&idx) {
                None => Ok(None),
                Some(Value::Integer(i)) => u64::try_from(i)
                    .map(Some)
                    .map_err(|_| Error::InvalidWifiOptions),
                Some(_) => Err(Error::InvalidWifiOptions),
            }
        };
        let channel_info_operating_class = lookup_u64(1)?;
        let channel_info_channel_number = lookup_u64(2)?;
        let band_info = map
            .remove(&3)
            .map(ByteStr::try_from)
            .transpose()
            .map_err(|_| Error::InvalidWifiOptions)?;

        Ok(WifiOptions {
            pass_phrase,
            channel_info_operating_class,
            channel_info_channel_number,
            band_info,
        })
    }
}

impl From<WifiOptions> for Value {
    fn from(o: WifiOptions) -> Value {
        let mut map = BTreeMap::new();
        if let Some(v) = o.pass_phrase {
            map.insert(0, Value::Text(v));
        }
        if let Some(v) = o.channel_info_operating_class {
            map.insert(1, Value::Integer(v.into()));
        }
        if let Some(v) = o.channel_info_channel_number {
            map.insert(2, Value::Integer(v.into()));
        }
        if let Some(v) = o.band_info {
            map.insert(3, v.into());
        }
        sorted_map(map)
    }
}
