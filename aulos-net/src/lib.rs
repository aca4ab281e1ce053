//! # aulos-net
//!
//! The UDP transport harness: binds a datagram socket, feeds received
//! packets to an [`aulos_core::dispatch::MessageHandler`], and drains an
//! outbound send queue from a dedicated writer thread.
//!
//! Grounded in the same thread-per-direction shape used elsewhere in this
//! codebase for socket I/O: a blocking receive loop with a short read
//! timeout so shutdown is noticed promptly, and a writer thread that owns
//! the only handle allowed to call `send_to`.
//!
//! ## Module Overview
//!
//! - [`server`] — `DatagramServer`, the bind/open/close lifecycle

pub mod server;

pub use server::DatagramServer;
