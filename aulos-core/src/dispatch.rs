//! The message handler: a single dispatch thread that owns an
//! [`AddressSpace`] and drains an inbound packet queue, holding
//! future-dated bundles in a time-ordered queue until their time-tag is
//! due.
//!
//! [`MessageHandler::spawn`] moves the whole handler — `AddressSpace`
//! included — onto one dedicated thread; `AddressSpace` is `Arc`/`Mutex`-based
//! precisely so that move compiles, but once the thread is running nothing
//! else ever touches it directly. Producers reach the handler only through
//! the `Sender<HandlerCommand>` `spawn` hands back, which is `Send` and safe
//! to clone across producer threads (the UDP rx loop, a local caller, etc).

use crate::space::AddressSpace;
use aulos_types::{Bundle, Message, Packet, Result, TimeTag};
use crossbeam_channel::{self, Receiver, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the dispatch loop waits for new work when no bundle is
/// scheduled, so it can still notice a closed channel promptly.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A unit of work handed to the dispatch thread.
pub enum HandlerCommand {
    /// A freshly received packet, to be dispatched or queued for later,
    /// tagged with the time it arrived — every message a bundle ultimately
    /// yields shares this one `rx_timetag`, even if dispatch is deferred.
    Packet(Packet, TimeTag),
    /// Shuts the dispatch loop down after draining nothing further.
    Close,
}

/// A bundle waiting in the time-ordered queue, ordered by time-tag with a
/// monotonic sequence number breaking ties in arrival order.
struct QueuedBundle {
    time_tag: TimeTag,
    seq: u64,
    bundle: Bundle,
    rx_timetag: TimeTag,
}

impl PartialEq for QueuedBundle {
    fn eq(&self, other: &Self) -> bool {
        self.time_tag == other.time_tag && self.seq == other.seq
    }
}
impl Eq for QueuedBundle {}

impl PartialOrd for QueuedBundle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedBundle {
    /// Reversed so a `BinaryHeap` (a max-heap) pops the *earliest*
    /// due bundle first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time_tag
            .cmp(&self.time_tag)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Owns the address space and the scheduled-bundle queue for one dispatch
/// thread.
pub struct MessageHandler {
    space: AddressSpace,
    queue: BinaryHeap<QueuedBundle>,
    next_seq: u64,
}

impl MessageHandler {
    pub fn new(space: AddressSpace) -> Self {
        Self { space, queue: BinaryHeap::new(), next_seq: 0 }
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    /// Spawns the dispatch thread, consuming `self`. Returns the command
    /// channel producers push into and the thread's `JoinHandle`.
    pub fn spawn(self) -> (Sender<HandlerCommand>, JoinHandle<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::spawn(move || self.run(rx));
        (tx, handle)
    }

    fn run(mut self, cmd_rx: Receiver<HandlerCommand>) {
        log::info!(target: "aulos_core::dispatch", "dispatch loop started");
        loop {
            let timeout = self.next_wake_timeout();
            crossbeam_channel::select! {
                recv(cmd_rx) -> msg => match msg {
                    Ok(HandlerCommand::Packet(packet, rx_timetag)) => {
                        if let Err(e) = self.handle_packet(packet, rx_timetag) {
                            log::warn!(target: "aulos_core::dispatch", "dropping malformed packet: {e}");
                        }
                    }
                    Ok(HandlerCommand::Close) | Err(_) => {
                        log::info!(target: "aulos_core::dispatch", "dispatch loop closing");
                        return;
                    }
                },
                default(timeout) => {}
            }
            self.drain_due();
        }
    }

    /// Duration until the earliest queued bundle is due, or the idle poll
    /// interval if the queue is empty.
    fn next_wake_timeout(&self) -> Duration {
        match self.queue.peek() {
            Some(next) => duration_until(next.time_tag).unwrap_or(Duration::ZERO),
            None => IDLE_POLL_INTERVAL,
        }
    }

    fn handle_packet(&mut self, packet: Packet, rx_timetag: TimeTag) -> Result<()> {
        match packet {
            Packet::Message(m) => {
                self.dispatch_message(&m, rx_timetag);
                Ok(())
            }
            Packet::Bundle(b) => {
                self.schedule_or_dispatch(b, rx_timetag);
                Ok(())
            }
        }
    }

    fn schedule_or_dispatch(&mut self, bundle: Bundle, rx_timetag: TimeTag) {
        if bundle.time_tag.is_immediate() || duration_until(bundle.time_tag).is_none() {
            self.dispatch_bundle(&bundle, rx_timetag);
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedBundle { time_tag: bundle.time_tag, seq, bundle, rx_timetag });
    }

    /// Pops and dispatches every queued bundle whose time-tag is now due.
    fn drain_due(&mut self) {
        while let Some(next) = self.queue.peek() {
            if duration_until(next.time_tag).is_some() {
                break;
            }
            let due = self.queue.pop().expect("just peeked");
            self.dispatch_bundle(&due.bundle, due.rx_timetag);
        }
    }

    fn dispatch_bundle(&mut self, bundle: &Bundle, rx_timetag: TimeTag) {
        for packet in &bundle.packets {
            match packet {
                Packet::Message(m) => self.dispatch_message(m, rx_timetag),
                Packet::Bundle(nested) => self.schedule_or_dispatch(nested.clone(), rx_timetag),
            }
        }
    }

    fn dispatch_message(&self, msg: &Message, rx_timetag: TimeTag) {
        match self.space.dispatch(msg, rx_timetag) {
            Ok(0) => log::debug!(target: "aulos_core::dispatch", "no node matched \"{}\"", msg.address),
            Ok(n) => log::debug!(target: "aulos_core::dispatch", "dispatched \"{}\" to {n} node(s)", msg.address),
            Err(e) => log::warn!(target: "aulos_core::dispatch", "address match error for \"{}\": {e}", msg.address),
        }
    }
}

/// `None` once `tag`'s deadline has passed (i.e. it is due now); `Some`
/// with the remaining wait otherwise.
fn duration_until(tag: TimeTag) -> Option<Duration> {
    if tag.is_immediate() {
        return None;
    }
    let target = tag.to_unix_duration()?;
    let now = TimeTag::now().to_unix_duration()?;
    if target <= now {
        None
    } else {
        Some(target - now)
    }
}
