pub mod device_engagement;
pub mod device_key;
pub mod device_request;
pub mod device_response;
pub mod device_signed;
pub mod helpers;
pub mod issuer_signed;
pub mod session;
pub mod x509;

pub use device_engagement::{
    BleOptions, CentralClientMode, ConnectionMethod, DeviceEngagement, NfcOptions,
    PeripheralServerMode, Security, WifiOptions,
};
pub use device_key::cose_key::{EC2Curve, Error, EC2Y};
pub use device_key::CoseKey;
pub use device_request::{DeviceRequest, DocRequest, ItemsRequest};
pub use device_response::{DeviceResponse, Document};
pub use device_signed::{DeviceAuth, DeviceSigned};
pub use issuer_signed::{IssuerSigned, IssuerSignedItem};
pub use session::{SessionData, SessionEstablishment, SessionTranscript};
