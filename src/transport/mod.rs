//! The seams between the presentment flow and a concrete proximity medium.
//!
//! A [TransportFactory] starts advertising a list of connection methods and hands back one
//! [AdvertisedTransport] per method it could bring up. Each advertised transport yields at most
//! one accepted [Transport], a reliable message channel to the verifier.
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::select_all;

use crate::definitions::ConnectionMethod;

pub mod framing;
pub mod loopback;

pub use framing::Framing;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("the channel is closed")]
    Closed,
    #[error("no connection was accepted before the deadline")]
    ConnectionTimeout,
    #[error("no connection method could be advertised")]
    NothingAdvertised,
    #[error("unable to advertise: {0}")]
    Advertise(String),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("transport I/O failure: {0}")]
    Io(String),
}

/// Lifecycle of a transport handle. Closing is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Advertising,
    Connected,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvertiseOptions {
    /// Ident derived from the engagement key that a connecting verifier has to present.
    pub ble_ident: [u8; 16],
    /// Prefer an L2CAP channel over GATT when the medium offers one.
    pub use_l2cap: bool,
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Start advertising. Returns immediately with one handle per method brought up, in the order
    /// given. Methods the medium does not support are skipped.
    async fn advertise(
        &self,
        connection_methods: &[ConnectionMethod],
        options: &AdvertiseOptions,
    ) -> Result<Vec<Box<dyn AdvertisedTransport>>, Error>;
}

#[async_trait]
pub trait AdvertisedTransport: Send {
    /// The connection method as advertised, including anything assigned while bringing it up.
    fn connection_method(&self) -> &ConnectionMethod;

    fn state(&self) -> TransportState;

    /// Wait for a verifier to connect. Connections presenting another ident are refused and the
    /// wait goes on.
    async fn accept(&mut self) -> Result<Box<dyn Transport>, Error>;

    /// Stop advertising. Idempotent.
    async fn close(&mut self);
}

#[async_trait]
pub trait Transport: Send {
    fn connection_method(&self) -> &ConnectionMethod;

    fn state(&self) -> TransportState;

    async fn send(&mut self, message: &[u8]) -> Result<(), Error>;

    /// Wait for the next complete message. Fails with [Error::Closed] once the peer hangs up.
    async fn receive(&mut self) -> Result<Vec<u8>, Error>;

    /// Idempotent.
    async fn close(&mut self);
}

/// Wait until one of `advertised` accepts a connection, first one wins.
///
/// A transport whose accept fails drops out of the race; the wait fails when all of them have. The
/// advertised transports are left open for the caller to close.
pub async fn wait_for_connection(
    advertised: &mut [Box<dyn AdvertisedTransport>],
    timeout: Option<Duration>,
) -> Result<Box<dyn Transport>, Error> {
    if advertised.is_empty() {
        return Err(Error::NothingAdvertised);
    }

    let race = async {
        let mut pending: Vec<_> = advertised
            .iter_mut()
            .map(|transport| transport.accept())
            .collect();
        loop {
            let (result, index, rest) = select_all(pending).await;
            match result {
                Ok(transport) => {
                    tracing::info!(
                        "verifier connected over {:?}",
                        transport.connection_method()
                    );
                    return Ok(transport);
                }
                Err(e) if rest.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!("advertised transport {index} stopped accepting: {e}");
                    pending = rest;
                }
            }
        }
    };

    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, race)
            .await
            .map_err(|_| Error::ConnectionTimeout)?,
        None => race.await,
    }
}

/// Close every advertised transport.
pub async fn close_all(advertised: &mut [Box<dyn AdvertisedTransport>]) {
    for transport in advertised.iter_mut() {
        transport.close().await;
    }
}
