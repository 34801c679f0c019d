use crate::definitions::device_key::cose_key::Error as CoseKeyError;
use crate::definitions::helpers::tag24::Error as Tag24Error;

/// Errors that can occur when deserialising a DeviceEngagement.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unsupported engagement version, expected 1.0")]
    UnsupportedVersion,
    #[error("unsupported cipher suite {0}")]
    UnsupportedCipherSuite(u64),
    #[error("Unsupported device retrieval method")]
    UnsupportedDRM,
    #[error("Invalid DeviceEngagment found")]
    InvalidDeviceEngagement,
    #[error("DeviceEngagement advertises no connection methods")]
    NoConnectionMethods,
    #[error("Invalid BleOptions found")]
    InvalidBleOptions,
    #[error("Invalid WifiOptions found")]
    InvalidWifiOptions,
    #[error("Invalid NfcOptions found")]
    InvalidNfcOptions,
    #[error("Malformed object not recognised")]
    Malformed,
    #[error("Something went wrong parsing a cose key")]
    CoseKeyError,
    #[error("Something went wrong parsing a tag24")]
    Tag24Error,
    #[error("Could not deserialize from cbor")]
    CborError,
    #[error("qr code has invalid prefix")]
    InvalidQrPrefix,
    #[error("qr code payload is not valid base64url")]
    InvalidQrEncoding,
    #[error("NFC Command Data Length must be between 255 and 65535")]
    InvalidNfcCommandDataLengthError,
    #[error("NFC Response Data Length must be between 256 and 65536")]
    InvalidNfcResponseDataLengthError,
}

impl From<CoseKeyError> for Error {
    fn from(_: CoseKeyError) -> Self {
        Error::CoseKeyError
    }
}

impl From<Tag24Error> for Error {
    fn from(_: Tag24Error) -> Self {
        Error::Tag24Error
    }
}

impl From<crate::cbor::CborError> for Error {
    fn from(_: crate::cbor::CborError) -> Self {
        Error::CborError
    }
}
