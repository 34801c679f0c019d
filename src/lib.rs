//! Holder-side proximity presentment of ISO/IEC 18013-5 mobile documents.
//!
//! The holder shows a device engagement, waits for a verifier to connect over one of the
//! advertised transports, decrypts and evaluates its request, asks the user for consent and sends
//! back a response disclosing exactly the approved data elements.
//!
//! - [presentation::device::PresentmentSession] drives one exchange and publishes its state.
//! - [presentation::engagement] encodes the engagement shown as a QR code.
//! - [presentation::trust] evaluates the verifier against configured trust points.
//! - [presentation::presentment] matches requests to held documents and builds the response.
//! - [transport] is the seam to a concrete proximity medium, with an in-process loopback.
mod cbor;

pub mod config;
pub mod context;
pub mod definitions;
pub mod presentation;
pub mod transport;

pub use config::PresentmentConfig;
pub use context::AppContext;
