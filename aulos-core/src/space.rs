//! The address-space tree: a hierarchy of named nodes that OSC messages are
//! dispatched against. Each node caches its own computed address and
//! invalidates the cache (recursively, for its whole subtree) when it is
//! re-parented.

use aulos_types::{Address, Message, TimeTag};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

/// A callback registered on a node, invoked with every message that
/// dispatches to it, alongside the node and the time the containing
/// packet was received (not when a deferred bundle's time-tag came due).
///
/// `Send + Sync` because the whole address space is handed off to the
/// dispatch thread once [`crate::dispatch::MessageHandler::spawn`] is
/// called; a callback registered before that point still has to be safe to
/// invoke from wherever it ends up running.
pub type Callback = Arc<dyn Fn(&Arc<AddressNode>, &Message, TimeTag) + Send + Sync>;

/// A message delivered to the space-level `on_message` broadcast: the
/// address it matched against, the message itself, and its receipt time.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub address: Address,
    pub message: Message,
    pub rx_timetag: TimeTag,
}

/// One node of the address-space tree.
///
/// Nodes are always held behind `Arc` so children can hold a strong
/// reference to their contents while the parent link stays weak, avoiding
/// a reference cycle. `Mutex` rather than a plain cell gives the node
/// `Sync` as well as `Send`, which is what lets `AddressSpace` move into
/// the dispatch thread as a single unit.
pub struct AddressNode {
    name: String,
    parent: Mutex<Weak<AddressNode>>,
    children: Mutex<HashMap<String, Arc<AddressNode>>>,
    cached_address: Mutex<Option<Address>>,
    callbacks: Mutex<Vec<Callback>>,
}

impl AddressNode {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(HashMap::new()),
            cached_address: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<AddressNode>> {
        self.parent.lock().unwrap().upgrade()
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    pub fn children(&self) -> Vec<Arc<AddressNode>> {
        self.children.lock().unwrap().values().cloned().collect()
    }

    pub fn child(&self, name: &str) -> Option<Arc<AddressNode>> {
        self.children.lock().unwrap().get(name).cloned()
    }

    /// This node's full address, walking up to the root and caching the
    /// result until the next re-parent invalidates it.
    pub fn address(self: &Arc<Self>) -> Address {
        if let Some(cached) = self.cached_address.lock().unwrap().as_ref() {
            return cached.clone();
        }
        let addr = match self.parent() {
            None => Address::root(),
            Some(parent) => parent
                .address()
                .join(&self.name)
                .expect("node name was validated when inserted"),
        };
        *self.cached_address.lock().unwrap() = Some(addr.clone());
        addr
    }

    /// Registers `callback` to run on every message dispatched to this
    /// node, returning its index for later removal.
    pub fn on_message(&self, callback: impl Fn(&Arc<AddressNode>, &Message, TimeTag) + Send + Sync + 'static) -> usize {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.push(Arc::new(callback));
        callbacks.len() - 1
    }

    pub fn remove_callback(&self, index: usize) {
        let mut callbacks = self.callbacks.lock().unwrap();
        if index < callbacks.len() {
            callbacks.remove(index);
        }
    }

    /// Invokes every registered callback with `msg`, trapping panics so one
    /// misbehaving subscriber cannot take down the dispatch thread. Iterates
    /// a snapshot of the callback list so a callback that removes itself
    /// mid-dispatch does not disturb the ongoing iteration.
    fn invoke(self: &Arc<Self>, msg: &Message, rx_timetag: TimeTag) {
        let callbacks = self.callbacks.lock().unwrap().clone();
        for cb in callbacks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| cb(self, msg, rx_timetag)));
            if let Err(payload) = result {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                log::error!(target: "aulos_core::space", "callback on node \"{}\" panicked: {detail}", self.name);
            }
        }
    }

    fn invalidate(&self) {
        *self.cached_address.lock().unwrap() = None;
        for child in self.children() {
            child.invalidate();
        }
    }
}

/// The owning tree of [`AddressNode`]s rooted at `/`.
///
/// Built with `Arc`/`Mutex` rather than `Rc`/`RefCell` so the whole space
/// is `Send + Sync` and can be moved into the dispatch thread wholesale by
/// [`crate::dispatch::MessageHandler::spawn`]; only that one thread ever
/// touches it once the handler is running.
pub struct AddressSpace {
    root: Arc<AddressNode>,
    subscribers: Mutex<Vec<Sender<MessageEvent>>>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    pub fn new() -> Self {
        Self { root: AddressNode::new(""), subscribers: Mutex::new(Vec::new()) }
    }

    /// Registers a new subscriber to the space-level `on_message` broadcast.
    /// Every subsequent [`Self::dispatch`] fans the matched message out to
    /// every live subscriber; an unbounded channel means a slow subscriber
    /// never back-pressures dispatch, only grows its own backlog.
    pub fn subscribe(&self) -> Receiver<MessageEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn broadcast(&self, event: &MessageEvent) {
        self.subscribers.lock().unwrap().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn root(&self) -> Arc<AddressNode> {
        Arc::clone(&self.root)
    }

    /// Finds or creates every node along `address`, returning the leaf.
    /// Fails if `address` contains a glob pattern segment, since a node's
    /// own name must be concrete.
    pub fn create_from_address(&self, address: &Address) -> aulos_types::Result<Arc<AddressNode>> {
        if !address.is_concrete() {
            return Err(aulos_types::OscError::ValueError {
                detail: "cannot create a node from a pattern address".into(),
            });
        }
        let mut node = Arc::clone(&self.root);
        for part in address.parts() {
            let name = part.raw();
            let next = match node.child(name) {
                Some(existing) => existing,
                None => {
                    let child = AddressNode::new(name);
                    *child.parent.lock().unwrap() = Arc::downgrade(&node);
                    node.children.lock().unwrap().insert(name.to_string(), Arc::clone(&child));
                    child
                }
            };
            node = next;
        }
        Ok(node)
    }

    /// Looks up a node by its exact concrete address, without creating it.
    pub fn find(&self, address: &Address) -> Option<Arc<AddressNode>> {
        let mut node = Arc::clone(&self.root);
        for part in address.parts() {
            node = node.child(part.raw())?;
        }
        Some(node)
    }

    /// Moves `node` to become a child of `new_parent`, invalidating the
    /// cached address of its entire subtree.
    pub fn reparent(&self, node: &Arc<AddressNode>, new_parent: &Arc<AddressNode>) -> aulos_types::Result<()> {
        if new_parent.child(&node.name).is_some() {
            return Err(aulos_types::OscError::Duplicate { name: node.name.clone() });
        }
        if let Some(old_parent) = node.parent() {
            old_parent.children.lock().unwrap().remove(&node.name);
        }
        new_parent.children.lock().unwrap().insert(node.name.clone(), Arc::clone(node));
        *node.parent.lock().unwrap() = Arc::downgrade(new_parent);
        node.invalidate();
        Ok(())
    }

    /// Depth-first walk of every node in the tree, root first.
    pub fn walk(&self) -> Vec<Arc<AddressNode>> {
        let mut out = Vec::new();
        walk_into(&self.root, &mut out);
        out
    }

    /// All nodes whose address matches `pattern` (in either direction, to
    /// tolerate a pattern on either side per [`Address::matches`]).
    pub fn matching(&self, pattern: &Address) -> aulos_types::Result<Vec<Arc<AddressNode>>> {
        let mut out = Vec::new();
        for node in self.walk() {
            if node.address().matches(pattern)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Dispatches `msg` to every node whose address matches
    /// `msg.address`, returning how many nodes received it. Every dispatch
    /// also emits a [`MessageEvent`] to the space-level broadcast, once per
    /// matched node, mirroring the per-node callback fan-out.
    pub fn dispatch(&self, msg: &Message, rx_timetag: TimeTag) -> aulos_types::Result<usize> {
        let nodes = self.matching(&msg.address)?;
        for node in &nodes {
            node.invoke(msg, rx_timetag);
            self.broadcast(&MessageEvent {
                address: node.address(),
                message: msg.clone(),
                rx_timetag,
            });
        }
        Ok(nodes.len())
    }
}

fn walk_into(node: &Arc<AddressNode>, out: &mut Vec<Arc<AddressNode>>) {
    out.push(Arc::clone(node));
    for child in node.children() {
        walk_into(&child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aulos_types::Argument;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn create_from_address_builds_intermediate_nodes() {
        let space = AddressSpace::new();
        let addr = Address::parse("/synth/1/freq").unwrap();
        let leaf = space.create_from_address(&addr).unwrap();
        assert_eq!(leaf.name(), "freq");
        assert_eq!(leaf.address().to_string(), "/synth/1/freq");
        assert!(space.find(&addr).is_some());
    }

    #[test]
    fn reparent_invalidates_cached_address_for_whole_subtree() {
        let space = AddressSpace::new();
        let leaf = space.create_from_address(&Address::parse("/a/b/c").unwrap()).unwrap();
        let _ = leaf.address();
        let new_root_child = space.create_from_address(&Address::parse("/x").unwrap()).unwrap();
        let b = leaf.parent().unwrap();
        space.reparent(&b, &new_root_child).unwrap();
        assert_eq!(leaf.address().to_string(), "/x/b/c");
    }

    #[test]
    fn dispatch_invokes_matching_nodes_and_reports_count() {
        let space = AddressSpace::new();
        let node = space.create_from_address(&Address::parse("/synth/1/freq").unwrap()).unwrap();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        node.on_message(move |_node, _msg, _rx| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        let msg = Message::new(Address::parse("/synth/1/freq").unwrap(), vec![Argument::Float32(1.0)]);
        let count = space.dispatch(&msg, TimeTag::now()).unwrap();
        assert_eq!(count, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_fans_out_through_wildcard_patterns() {
        let space = AddressSpace::new();
        space.create_from_address(&Address::parse("/synth/1/freq").unwrap()).unwrap();
        space.create_from_address(&Address::parse("/synth/2/freq").unwrap()).unwrap();

        let msg = Message::new(Address::parse("/synth/*/freq").unwrap(), vec![]);
        let count = space.dispatch(&msg, TimeTag::now()).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn panicking_callback_does_not_stop_other_callbacks() {
        let space = AddressSpace::new();
        let node = space.create_from_address(&Address::parse("/x").unwrap()).unwrap();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        node.on_message(|_, _, _| panic!("boom"));
        node.on_message(move |_, _, _| {
            seen2.store(1, Ordering::SeqCst);
        });

        let msg = Message::new(Address::parse("/x").unwrap(), vec![]);
        let count = space.dispatch(&msg, TimeTag::now()).unwrap();
        assert_eq!(count, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_receives_every_dispatched_message() {
        let space = AddressSpace::new();
        space.create_from_address(&Address::parse("/synth/1/freq").unwrap()).unwrap();
        let rx = space.subscribe();

        let msg = Message::new(Address::parse("/synth/1/freq").unwrap(), vec![Argument::Int32(1)]);
        let rx_timetag = TimeTag::now();
        space.dispatch(&msg, rx_timetag).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.address.to_string(), "/synth/1/freq");
        assert_eq!(event.message, msg);
        assert_eq!(event.rx_timetag, rx_timetag);
    }
}
