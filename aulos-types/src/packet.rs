//! `Message` and `Bundle` packets: the two concrete shapes an OSC datagram
//! can take, plus the `Packet` enum that parses either from raw bytes.

use crate::address::Address;
use crate::argument::Argument;
use crate::error::{OscError, Result};
use crate::primitives::{pad4, pad4_with_stop, padded_len, TimeTag};
use std::net::SocketAddr;

const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// A single OSC message: an address plus zero or more typed arguments.
///
/// `remote_peer` carries no wire representation — it is `None` after
/// `Message::parse` and is filled in by the transport layer (see
/// [`Packet::with_remote_peer`]) once it knows which socket address the
/// containing datagram arrived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: Address,
    pub args: Vec<Argument>,
    pub remote_peer: Option<SocketAddr>,
}

impl Message {
    pub fn new(address: Address, args: Vec<Argument>) -> Self {
        Self { address, args, remote_peer: None }
    }

    /// Encodes this message: address string, type-tag string, then each
    /// argument's payload in order.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.address.to_string().as_bytes());
        pad4_with_stop(&mut buf);

        let mut tags = String::from(",");
        for arg in &self.args {
            tags.push(arg.tag());
        }
        buf.extend_from_slice(tags.as_bytes());
        pad4_with_stop(&mut buf);

        for arg in &self.args {
            arg.pack(&mut buf);
        }
        buf
    }

    /// Parses a message body (the bytes after the packet's leading `/` has
    /// been confirmed present, i.e. `data` still starts with the address).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.first() != Some(&b'/') {
            return Err(OscError::MessageStart);
        }
        let mut pos = 0;
        let address_str = read_padded_str(data, &mut pos)?;
        let address = Address::parse(&address_str)?;

        // A type-tag string is conventionally always present, but a
        // tolerant parser accepts a message with zero arguments and no
        // tag string at all, treating it as `,`.
        let args = if pos >= data.len() {
            Vec::new()
        } else if data[pos] != b',' {
            return Err(OscError::Truncated { detail: "expected ',' to start type-tag string".into() });
        } else {
            let tags = read_padded_str(data, &mut pos)?;
            let mut args = Vec::with_capacity(tags.len().saturating_sub(1));
            for tag in tags.chars().skip(1) {
                args.push(Argument::parse(tag, data, &mut pos)?);
            }
            args
        };

        Ok(Self { address, args, remote_peer: None })
    }
}

/// An OSC bundle: a time-tag and an ordered list of nested packets
/// (messages or further bundles). Like [`Message::remote_peer`],
/// `remote_peer` has no wire representation and is `None` until the
/// transport layer attaches it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub time_tag: TimeTag,
    pub packets: Vec<Packet>,
    pub remote_peer: Option<SocketAddr>,
}

impl Bundle {
    pub fn new(time_tag: TimeTag, packets: Vec<Packet>) -> Self {
        Self { time_tag, packets, remote_peer: None }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(BUNDLE_TAG);
        buf.extend_from_slice(&self.time_tag.to_bytes());
        for packet in &self.packets {
            let elem = packet.build();
            buf.extend_from_slice(&(elem.len() as i32).to_be_bytes());
            buf.extend_from_slice(&elem);
        }
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BUNDLE_TAG.len() || &data[..BUNDLE_TAG.len()] != BUNDLE_TAG {
            return Err(OscError::BundleStart);
        }
        let mut pos = BUNDLE_TAG.len();
        if data.len() < pos + 8 {
            return Err(OscError::Truncated { detail: "bundle missing time-tag".into() });
        }
        let time_tag = TimeTag::from_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;

        let mut packets = Vec::new();
        while pos < data.len() {
            if data.len() < pos + 4 {
                return Err(OscError::Truncated { detail: "bundle element missing size prefix".into() });
            }
            let size = i32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
            if size < 0 {
                return Err(OscError::OutOfRange { detail: format!("negative bundle element size {size}") });
            }
            let size = size as usize;
            pos += 4;
            if data.len() < pos + size {
                return Err(OscError::Truncated { detail: "bundle element runs past buffer end".into() });
            }
            packets.push(Packet::parse(&data[pos..pos + size])?);
            pos += size;
        }
        Ok(Self { time_tag, packets, remote_peer: None })
    }
}

/// Either shape a top-level (or nested) OSC packet can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    pub fn build(&self) -> Vec<u8> {
        match self {
            Self::Message(m) => m.build(),
            Self::Bundle(b) => b.build(),
        }
    }

    /// Dispatches on the first byte: `/` is a message, `#` must begin
    /// `#bundle\0`, anything else is a malformed packet.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() % 4 != 0 {
            return Err(OscError::Alignment { detail: format!("packet length {} is not 4-byte aligned", data.len()) });
        }
        match data.first() {
            Some(b'/') => Ok(Self::Message(Message::parse(data)?)),
            Some(b'#') => Ok(Self::Bundle(Bundle::parse(data)?)),
            _ => Err(OscError::PacketStart),
        }
    }

    pub fn is_bundle(&self) -> bool {
        matches!(self, Self::Bundle(_))
    }

    /// Stamps `peer` onto this packet, and recursively onto every message
    /// and nested bundle it contains, since they all arrived in the same
    /// datagram from the same sender. Called by the transport layer right
    /// after [`Packet::parse`]; never set by the codec itself.
    pub fn with_remote_peer(mut self, peer: SocketAddr) -> Self {
        match &mut self {
            Self::Message(m) => m.remote_peer = Some(peer),
            Self::Bundle(b) => {
                b.remote_peer = Some(peer);
                b.packets = std::mem::take(&mut b.packets)
                    .into_iter()
                    .map(|p| p.with_remote_peer(peer))
                    .collect();
            }
        }
        self
    }
}

fn read_padded_str(data: &[u8], pos: &mut usize) -> Result<String> {
    let start = *pos;
    let end = data[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| start + i)
        .ok_or_else(|| OscError::Truncated { detail: "unterminated string".into() })?;
    let s = String::from_utf8_lossy(&data[start..end]).into_owned();
    let consumed = padded_len(end - start + 1);
    if data.len() < start + consumed {
        return Err(OscError::Truncated { detail: "string padding runs past buffer end".into() });
    }
    *pos = start + consumed;
    Ok(s)
}
