//! Wire types for Open Sound Control 1.1: arguments, addresses and their
//! glob patterns, and the `Message`/`Bundle` packet shapes.
//!
//! This crate has no knowledge of sockets, threads, or an address-space
//! tree — it only encodes and decodes bytes. [`aulos_core`](../aulos_core)
//! builds the dispatch engine on top of it.

pub mod address;
pub mod argument;
pub mod error;
pub mod packet;
pub mod primitives;

pub use address::{Address, AddressPart};
pub use argument::{Argument, NativeValue};
pub use error::{OscError, Result};
pub use packet::{Bundle, Message, Packet};
pub use primitives::{pad4, pad4_with_stop, padded_len, ColorRgba, MidiMessage, TimeTag, NTP_UNIX_OFFSET};
