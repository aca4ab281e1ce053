//! `DatagramServer`: binds a UDP socket, hands received packets to a
//! [`MessageHandler`], and owns a writer thread for outbound sends.
//!
//! The receive side mirrors the blocking-recv-with-read-timeout pattern
//! used for cancellable socket loops elsewhere in this codebase: a short
//! `set_read_timeout` lets the loop notice a shutdown request without
//! needing to interrupt a blocked syscall. The send side mirrors the
//! dedicated-sender-thread pattern: one thread owns the socket clone used
//! for writes and drains an unbounded work queue, so callers on any thread
//! can queue a datagram without touching the socket directly.

use aulos_core::{AddressSpace, HandlerCommand, MessageEvent, MessageHandler, ServerConfig};
use aulos_types::{Packet, TimeTag};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A packet queued for the writer thread, already encoded.
struct OutgoingDatagram {
    bytes: Vec<u8>,
    peer: SocketAddr,
}

enum TxCommand {
    Send(OutgoingDatagram),
    Close,
}

/// Why [`DatagramServer::send_packet`] could not queue a datagram.
#[derive(Debug)]
pub enum SendError {
    /// The server has not been [`open`](DatagramServer::open)ed yet.
    NotOpen,
    /// The writer thread has already shut down.
    Closed,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpen => write!(f, "server is not open"),
            Self::Closed => write!(f, "send queue is closed"),
        }
    }
}

impl std::error::Error for SendError {}

/// Owns the UDP socket, the dispatch thread, and the writer thread for one
/// OSC server endpoint.
///
/// Build the [`AddressSpace`] (register nodes, attach callbacks, and call
/// [`DatagramServer::subscribe`] if you want a broadcast feed) before
/// calling [`open`](Self::open) — ownership of the space moves to the
/// dispatch thread at that point.
pub struct DatagramServer {
    config: ServerConfig,
    address_space: Option<AddressSpace>,
    cmd_tx: Option<Sender<HandlerCommand>>,
    tx_tx: Option<Sender<TxCommand>>,
    dispatch_handle: Option<JoinHandle<()>>,
    rx_handle: Option<JoinHandle<()>>,
    tx_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
}

impl DatagramServer {
    pub fn new(address_space: AddressSpace, config: ServerConfig) -> Self {
        Self {
            config,
            address_space: Some(address_space),
            cmd_tx: None,
            tx_tx: None,
            dispatch_handle: None,
            rx_handle: None,
            tx_handle: None,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
        }
    }

    /// The address the socket actually bound to, once [`open`](Self::open)
    /// has succeeded (useful when the config asks for an ephemeral port).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Subscribes to every message this server's address space dispatches.
    /// Only available before [`open`](Self::open) — the space moves to the
    /// dispatch thread after that.
    pub fn subscribe(&self) -> Option<Receiver<MessageEvent>> {
        self.address_space.as_ref().map(|space| space.subscribe())
    }

    /// Access to the address space for registering nodes and callbacks
    /// before opening the server.
    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.address_space.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds the configured address, then spawns the dispatch thread, the
    /// rx loop, and the tx loop.
    pub fn open(&mut self) -> io::Result<()> {
        let socket = UdpSocket::bind(self.config.bind_addr())?;
        socket.set_read_timeout(Some(self.config.recv_timeout()))?;
        self.local_addr = Some(socket.local_addr()?);

        let space = self
            .address_space
            .take()
            .expect("DatagramServer::open called twice");
        let handler = MessageHandler::new(space);
        let (cmd_tx, dispatch_handle) = handler.spawn();

        let (tx_tx, tx_rx) = crossbeam_channel::unbounded::<TxCommand>();
        let tx_socket = socket.try_clone()?;
        let tx_handle = thread::Builder::new()
            .name("aulos-net-tx".into())
            .spawn(move || tx_loop(tx_socket, tx_rx))
            .expect("failed to spawn aulos-net-tx thread");

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let max_packet_size = self.config.max_packet_size();
        let rx_cmd_tx = cmd_tx.clone();
        let rx_handle = thread::Builder::new()
            .name("aulos-net-rx".into())
            .spawn(move || rx_loop(socket, max_packet_size, rx_cmd_tx, running))
            .expect("failed to spawn aulos-net-rx thread");

        self.cmd_tx = Some(cmd_tx);
        self.tx_tx = Some(tx_tx);
        self.dispatch_handle = Some(dispatch_handle);
        self.rx_handle = Some(rx_handle);
        self.tx_handle = Some(tx_handle);
        log::info!(target: "aulos_net::server", "server open on {}", self.local_addr.unwrap());
        Ok(())
    }

    /// Queues `packet` for delivery to `peer`, encoding it on the calling
    /// thread and handing the bytes to the writer thread.
    pub fn send_packet(&self, packet: &Packet, peer: SocketAddr) -> Result<(), SendError> {
        let tx_tx = self.tx_tx.as_ref().ok_or(SendError::NotOpen)?;
        let bytes = packet.build();
        tx_tx
            .send(TxCommand::Send(OutgoingDatagram { bytes, peer }))
            .map_err(|_| SendError::Closed)
    }

    /// Signals the rx loop to stop, closes the writer thread, then closes
    /// the dispatch thread, joining each in turn. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.rx_handle.take() {
            let _ = h.join();
        }
        if let Some(tx_tx) = self.tx_tx.take() {
            let _ = tx_tx.send(TxCommand::Close);
        }
        if let Some(h) = self.tx_handle.take() {
            let _ = h.join();
        }
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(HandlerCommand::Close);
        }
        if let Some(h) = self.dispatch_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for DatagramServer {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

fn rx_loop(socket: UdpSocket, max_packet_size: usize, cmd_tx: Sender<HandlerCommand>, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; max_packet_size];
    log::info!(target: "aulos_net::server", "rx loop started");
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                let rx_timetag = TimeTag::now();
                match Packet::parse(&buf[..n]) {
                    Ok(packet) => {
                        let packet = packet.with_remote_peer(peer);
                        if cmd_tx.send(HandlerCommand::Packet(packet, rx_timetag)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!(target: "aulos_net::server", "dropping malformed datagram from {peer}: {e}");
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                log::warn!(target: "aulos_net::server", "rx socket error: {e}");
                break;
            }
        }
    }
    log::info!(target: "aulos_net::server", "rx loop stopped");
}

fn tx_loop(socket: UdpSocket, rx: Receiver<TxCommand>) {
    log::info!(target: "aulos_net::server", "tx loop started");
    while let Ok(cmd) = rx.recv() {
        match cmd {
            TxCommand::Send(datagram) => {
                if let Err(e) = socket.send_to(&datagram.bytes, datagram.peer) {
                    log::warn!(target: "aulos_net::server", "send to {} failed: {e}", datagram.peer);
                }
            }
            TxCommand::Close => break,
        }
    }
    log::info!(target: "aulos_net::server", "tx loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use aulos_types::{Address, Bundle, Message};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// The embedded config binds `0.0.0.0:9000`; tests rebind to an
    /// ephemeral loopback port so parallel test runs don't collide.
    fn loopback_config() -> ServerConfig {
        ServerConfig::load().with_bind_addr("127.0.0.1:0")
    }

    #[test]
    fn server_receives_a_datagram_and_dispatches_it() {
        let space = AddressSpace::new();
        let node = space.create_from_address(&Address::parse("/ping").unwrap()).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);
        node.on_message(move |_node, _msg, _rx| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        let mut server = DatagramServer::new(space, loopback_config());
        server.open().expect("server should bind");
        let addr = server.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let msg = Message::new(Address::parse("/ping").unwrap(), vec![]);
        client.send_to(&msg.build(), addr).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        server.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_packet_before_open_is_an_error() {
        let space = AddressSpace::new();
        let server = DatagramServer::new(space, loopback_config());
        let packet = Packet::Message(Message::new(Address::parse("/ping").unwrap(), vec![]));
        let err = server.send_packet(&packet, "127.0.0.1:9".parse().unwrap()).unwrap_err();
        assert!(matches!(err, SendError::NotOpen));
    }

    #[test]
    fn deferred_bundle_delivered_over_the_wire_keeps_one_rx_timetag() {
        let space = AddressSpace::new();
        let node = space.create_from_address(&Address::parse("/a").unwrap()).unwrap();
        let seen: Arc<std::sync::Mutex<Vec<TimeTag>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        node.on_message(move |_node, _msg, rx| seen2.lock().unwrap().push(rx));

        let mut server = DatagramServer::new(space, loopback_config());
        server.open().expect("server should bind");
        let addr = server.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let due = TimeTag::from_unix_duration(
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap() + Duration::from_millis(100),
        );
        let bundle = Bundle::new(
            due,
            vec![
                Packet::Message(Message::new(Address::parse("/a").unwrap(), vec![])),
                Packet::Message(Message::new(Address::parse("/a").unwrap(), vec![])),
            ],
        );
        client.send_to(&bundle.build(), addr).unwrap();

        thread::sleep(Duration::from_millis(400));
        server.close();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }
}
