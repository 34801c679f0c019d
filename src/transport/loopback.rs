//! An in-process medium for simulations and tests.
//!
//! The holder advertises through [LoopbackMedium] as a [TransportFactory]; a simulated verifier
//! reaches it with [LoopbackMedium::connect], using the service UUID and ident it read from the
//! engagement. Both ends get a [LoopbackTransport] that frames messages the way the advertised
//! BLE mode would.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use super::framing::{Decoder, Framing, DEFAULT_GATT_MTU};
use super::{AdvertiseOptions, AdvertisedTransport, Error, Transport, TransportFactory, TransportState};
use crate::definitions::{BleOptions, ConnectionMethod};

/// First PSM of the dynamically allocated LE range.
const FIRST_DYNAMIC_PSM: u32 = 0x0080;

type Listeners = Arc<Mutex<HashMap<Uuid, mpsc::Sender<ConnectRequest>>>>;

struct ConnectRequest {
    ident: [u8; 16],
    reply: oneshot::Sender<Result<LoopbackTransport, Error>>,
}

#[derive(Clone, Debug)]
pub struct LoopbackMedium {
    listeners: Listeners,
    next_psm: Arc<AtomicU32>,
    mtu: usize,
}

impl Default for LoopbackMedium {
    fn default() -> Self {
        Self::with_mtu(DEFAULT_GATT_MTU)
    }
}

impl LoopbackMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mtu(mtu: usize) -> Self {
        Self {
            listeners: Default::default(),
            next_psm: Arc::new(AtomicU32::new(FIRST_DYNAMIC_PSM)),
            mtu,
        }
    }

    /// Connect to the holder advertising `uuid`, presenting `ident`.
    pub async fn connect(&self, uuid: Uuid, ident: [u8; 16]) -> Result<LoopbackTransport, Error> {
        let listener = self
            .listeners
            .lock()
            .await
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::Io(format!("nothing is advertised under {uuid}")))?;
        let (reply, response) = oneshot::channel();
        listener
            .send(ConnectRequest { ident, reply })
            .await
            .map_err(|_| Error::Io(format!("{uuid} is no longer advertised")))?;
        response.await.map_err(|_| Error::Closed)?
    }

    pub async fn is_advertising(&self, uuid: Uuid) -> bool {
        self.listeners
            .lock()
            .await
            .get(&uuid)
            .is_some_and(|listener| !listener.is_closed())
    }

    /// Pick the service UUID and framing for a BLE method, assigning a PSM when L2CAP is used.
    fn bring_up(&self, options: &BleOptions, use_l2cap: bool) -> Option<(Uuid, BleOptions, Framing)> {
        let mut advertised = options.clone();
        if let Some(peripheral) = &options.peripheral_server_mode {
            if use_l2cap {
                let psm = self.next_psm.fetch_add(1, Ordering::Relaxed);
                advertised.l2cap_psm = Some(psm);
                return Some((peripheral.uuid, advertised, Framing::L2cap));
            }
            advertised.l2cap_psm = None;
            return Some((peripheral.uuid, advertised, Framing::Gatt { mtu: self.mtu }));
        }
        let central = options.central_client_mode.as_ref()?;
        advertised.l2cap_psm = None;
        Some((central.uuid, advertised, Framing::Gatt { mtu: self.mtu }))
    }
}

#[async_trait]
impl TransportFactory for LoopbackMedium {
    async fn advertise(
        &self,
        connection_methods: &[ConnectionMethod],
        options: &AdvertiseOptions,
    ) -> Result<Vec<Box<dyn AdvertisedTransport>>, Error> {
        let mut listeners = self.listeners.lock().await;
        listeners.retain(|_, listener| !listener.is_closed());

        let mut advertised: Vec<Box<dyn AdvertisedTransport>> = Vec::new();
        for method in connection_methods {
            let ConnectionMethod::Ble(ble) = method else {
                tracing::warn!("loopback medium cannot advertise {method:?}");
                continue;
            };
            let Some((uuid, ble, framing)) = self.bring_up(ble, options.use_l2cap) else {
                tracing::warn!("BLE method supports neither peripheral nor central mode");
                continue;
            };
            if listeners.contains_key(&uuid) {
                return Err(Error::Advertise(format!("{uuid} is already advertised")));
            }
            let (sender, requests) = mpsc::channel(4);
            listeners.insert(uuid, sender);
            tracing::debug!("advertising {uuid} with {framing:?}");
            advertised.push(Box::new(LoopbackAdvertised {
                connection_method: ConnectionMethod::Ble(ble),
                uuid,
                ident: options.ble_ident,
                framing,
                requests,
                listeners: self.listeners.clone(),
                closed: false,
            }));
        }

        if advertised.is_empty() {
            return Err(Error::NothingAdvertised);
        }
        Ok(advertised)
    }
}

struct LoopbackAdvertised {
    connection_method: ConnectionMethod,
    uuid: Uuid,
    ident: [u8; 16],
    framing: Framing,
    requests: mpsc::Receiver<ConnectRequest>,
    listeners: Listeners,
    closed: bool,
}

#[async_trait]
impl AdvertisedTransport for LoopbackAdvertised {
    fn connection_method(&self) -> &ConnectionMethod {
        &self.connection_method
    }

    fn state(&self) -> TransportState {
        if self.closed {
            TransportState::Closed
        } else {
            TransportState::Advertising
        }
    }

    async fn accept(&mut self) -> Result<Box<dyn Transport>, Error> {
        loop {
            let request = self.requests.recv().await.ok_or(Error::Closed)?;
            if request.ident != self.ident {
                tracing::warn!("refusing connection to {} with a foreign ident", self.uuid);
                let _ = request
                    .reply
                    .send(Err(Error::Io("ident does not match the engagement".into())));
                continue;
            }
            let (holder, verifier) =
                LoopbackTransport::pair(self.connection_method.clone(), self.framing);
            if request.reply.send(Ok(verifier)).is_err() {
                tracing::debug!("verifier went away while connecting");
                continue;
            }
            return Ok(Box::new(holder));
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.requests.close();
        self.listeners
            .lock()
            .await
            .retain(|_, listener| !listener.is_closed());
        tracing::debug!("stopped advertising {}", self.uuid);
    }
}

/// One end of an in-process connection.
#[derive(Debug)]
pub struct LoopbackTransport {
    connection_method: ConnectionMethod,
    framing: Framing,
    decoder: Decoder,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

impl LoopbackTransport {
    fn pair(connection_method: ConnectionMethod, framing: Framing) -> (Self, Self) {
        let (to_verifier, from_holder) = mpsc::unbounded_channel();
        let (to_holder, from_verifier) = mpsc::unbounded_channel();
        let end = |outgoing, incoming| LoopbackTransport {
            connection_method: connection_method.clone(),
            framing,
            decoder: framing.decoder(),
            outgoing: Some(outgoing),
            incoming,
            closed: false,
        };
        (end(to_verifier, from_verifier), end(to_holder, from_holder))
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn connection_method(&self) -> &ConnectionMethod {
        &self.connection_method
    }

    fn state(&self) -> TransportState {
        match &self.outgoing {
            Some(outgoing) if !self.closed && !outgoing.is_closed() => TransportState::Connected,
            _ => TransportState::Closed,
        }
    }

    async fn send(&mut self, message: &[u8]) -> Result<(), Error> {
        let outgoing = match &self.outgoing {
            Some(outgoing) if !self.closed => outgoing,
            _ => return Err(Error::Closed),
        };
        for frame in self.framing.encode(message)? {
            outgoing.send(frame).map_err(|_| Error::Closed)?;
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Error> {
        loop {
            if let Some(message) = self.decoder.next_message() {
                return Ok(message);
            }
            if self.closed {
                return Err(Error::Closed);
            }
            match self.incoming.recv().await {
                Some(frame) => self.decoder.push(&frame)?,
                None => {
                    if self.decoder.is_partial() {
                        tracing::warn!("peer closed in the middle of a message");
                    }
                    return Err(Error::Closed);
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.outgoing = None;
        self.incoming.close();
    }
}
