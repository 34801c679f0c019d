//! Message framing for the BLE data retrieval modes.
//!
//! In GATT mode a message is split into chunks that fit the negotiated MTU. Each chunk starts with
//! a single byte: `0x01` if more chunks follow, `0x00` for the last chunk of the message.
//!
//! In L2CAP mode the channel is a byte stream and every message is prefixed with its length as a
//! 4-byte big-endian integer.
use std::collections::VecDeque;

use super::Error;

/// ATT protocol overhead in every characteristic write/notification.
const ATT_HEADER_LEN: usize = 3;
const MORE_CHUNKS: u8 = 0x01;
const LAST_CHUNK: u8 = 0x00;
const LENGTH_PREFIX_LEN: usize = 4;

/// A commonly negotiated ATT MTU.
pub const DEFAULT_GATT_MTU: usize = 185;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    Gatt { mtu: usize },
    L2cap,
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Gatt {
            mtu: DEFAULT_GATT_MTU,
        }
    }
}

impl Framing {
    /// Split `message` into the frames to write to the medium.
    pub fn encode(&self, message: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        match *self {
            Framing::Gatt { mtu } => {
                let payload_len = mtu
                    .checked_sub(ATT_HEADER_LEN + 1)
                    .filter(|len| *len > 0)
                    .ok_or_else(|| Error::Framing(format!("MTU {mtu} is too small")))?;
                if message.is_empty() {
                    return Ok(vec![vec![LAST_CHUNK]]);
                }
                let chunks = message.chunks(payload_len);
                let count = chunks.len();
                Ok(chunks
                    .enumerate()
                    .map(|(i, chunk)| {
                        let mut frame = Vec::with_capacity(chunk.len() + 1);
                        frame.push(if i + 1 == count { LAST_CHUNK } else { MORE_CHUNKS });
                        frame.extend_from_slice(chunk);
                        frame
                    })
                    .collect())
            }
            Framing::L2cap => {
                let len = u32::try_from(message.len())
                    .map_err(|_| Error::Framing("message too long for L2CAP".into()))?;
                let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + message.len());
                frame.extend_from_slice(&len.to_be_bytes());
                frame.extend_from_slice(message);
                Ok(vec![frame])
            }
        }
    }

    pub fn decoder(&self) -> Decoder {
        Decoder {
            framing: *self,
            buffer: Vec::new(),
            complete: VecDeque::new(),
        }
    }
}

/// Reassembles messages from frames read off the medium.
#[derive(Debug)]
pub struct Decoder {
    framing: Framing,
    buffer: Vec<u8>,
    complete: VecDeque<Vec<u8>>,
}

impl Decoder {
    /// Feed one frame. Any messages it completes become available through [Decoder::next_message].
    pub fn push(&mut self, frame: &[u8]) -> Result<(), Error> {
        match self.framing {
            Framing::Gatt { .. } => {
                let Some((&flag, chunk)) = frame.split_first() else {
                    return Err(Error::Framing("empty GATT chunk".into()));
                };
                self.buffer.extend_from_slice(chunk);
                match flag {
                    LAST_CHUNK => self.complete.push_back(std::mem::take(&mut self.buffer)),
                    MORE_CHUNKS => {}
                    other => {
                        return Err(Error::Framing(format!(
                            "unknown GATT chunk flag {other:#04x}"
                        )))
                    }
                }
            }
            Framing::L2cap => {
                self.buffer.extend_from_slice(frame);
                while self.buffer.len() >= LENGTH_PREFIX_LEN {
                    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
                    prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_LEN]);
                    let len = u32::from_be_bytes(prefix) as usize;
                    if self.buffer.len() < LENGTH_PREFIX_LEN + len {
                        break;
                    }
                    let rest = self.buffer.split_off(LENGTH_PREFIX_LEN + len);
                    let message = std::mem::replace(&mut self.buffer, rest);
                    self.complete
                        .push_back(message[LENGTH_PREFIX_LEN..].to_vec());
                }
            }
        }
        Ok(())
    }

    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        self.complete.pop_front()
    }

    /// Whether part of a message has been received but not yet completed.
    pub fn is_partial(&self) -> bool {
        !self.buffer.is_empty()
    }
}
