//! # aulos-core
//!
//! The OSC dispatch engine: an address-space tree of subscribable nodes,
//! and a message handler that runs on one dedicated dispatch thread,
//! draining an inbound packet queue and honoring bundle time-tags for
//! scheduled delivery.
//!
//! Built on top of [`aulos_types`], which owns the wire codec. This crate
//! adds no socket I/O of its own; [`aulos_net`](../aulos_net) supplies the
//! UDP transport that feeds a [`dispatch::MessageHandler`].
//!
//! ## Module Overview
//!
//! - [`space`] — `AddressNode`/`AddressSpace`, the subscribable node tree
//! - [`dispatch`] — `MessageHandler`, the time-ordered dispatch loop
//! - [`config`] — `ServerConfig`, embedded-plus-user-override TOML config

pub mod config;
pub mod dispatch;
pub mod space;

pub use config::ServerConfig;
pub use dispatch::{HandlerCommand, MessageHandler};
pub use space::{AddressNode, AddressSpace, Callback, MessageEvent};
