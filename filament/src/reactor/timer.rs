//! Timer store.
//!
//! Pending sleeps and timeouts of one event loop live in a pairing heap
//! ordered by absolute expiry. Insertion and delete-min are the hot paths
//! (every arm, every loop iteration); arbitrary deletion is needed because
//! timeouts are usually canceled before they fire, which an array heap can
//! only do with a linear scan.
//!
//! Nodes live in a generational [`Slab`] and refer to each other by key, so
//! a [`TimerKey`] kept after its timer fired or was canceled is rejected
//! instead of touching whatever reuses the slot.

use crate::utils::{Key, Slab};

use std::cmp::Ordering;
use std::time::Instant;

/// Handle to a timer inside a [`TimerStore`].
pub(crate) type TimerKey = Key;

/// Category of a timer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Always runs to expiry. Full precision.
    Timer,
    /// Usually canceled before expiry. Some slack is acceptable.
    Timeout,
}

struct Node<T> {
    expiry: Instant,
    seq: u64,
    kind: TimerKind,
    value: T,
    child: Option<Key>,
    sibling: Option<Key>,
    /// Parent when this is the first child, left sibling otherwise.
    prev: Option<Key>,
}

/// A min pairing heap of timers keyed by `(expiry, insertion order)`.
pub(crate) struct TimerStore<T> {
    nodes: Slab<Node<T>>,
    root: Option<Key>,
    seq: u64,
}

impl<T> TimerStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Slab::with_capacity(64),
            root: None,
            seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Expiry of the earliest pending timer.
    pub(crate) fn next_expiry(&self) -> Option<Instant> {
        self.root.map(|r| self.node(r).expiry)
    }

    /// Category of the earliest pending timer.
    pub(crate) fn next_kind(&self) -> Option<TimerKind> {
        self.root.map(|r| self.node(r).kind)
    }

    /// Inserts a timer. Returns its key and whether it became the new minimum.
    pub(crate) fn insert(&mut self, expiry: Instant, kind: TimerKind, value: T) -> (TimerKey, bool) {
        let seq = self.seq;
        self.seq += 1;

        let key = self.nodes.insert(Node {
            expiry,
            seq,
            kind,
            value,
            child: None,
            sibling: None,
            prev: None,
        });

        let root = match self.root {
            Some(root) => self.meld(root, key),
            None => key,
        };
        self.root = Some(root);

        (key, root == key)
    }

    /// Removes a timer before it fires.
    ///
    /// Returns `(was_found, was_minimum)`. A key whose timer already fired or
    /// was already canceled reports `(false, false)`.
    pub(crate) fn cancel(&mut self, key: TimerKey) -> (bool, bool) {
        if !self.nodes.contains(key) {
            return (false, false);
        }

        if self.root == Some(key) {
            self.pop_min();
            return (true, true);
        }

        self.detach(key);

        let children = self.node_mut(key).child.take();
        self.nodes.remove(key);

        if let Some(subtree) = self.merge_pairs(children) {
            let root = self.root.expect("non-root node without a root");
            self.root = Some(self.meld(root, subtree));
        }

        (true, false)
    }

    /// Removes every timer with `expiry <= now`, calling `visit` once per
    /// timer in non-decreasing expiry order.
    pub(crate) fn drain_expired(&mut self, now: Instant, mut visit: impl FnMut(TimerKind, T)) {
        while let Some(root) = self.root {
            if self.node(root).expiry > now {
                break;
            }

            if let Some((kind, value)) = self.pop_min() {
                visit(kind, value);
            }
        }
    }

    fn pop_min(&mut self) -> Option<(TimerKind, T)> {
        let root = self.root?;
        let children = self.node_mut(root).child.take();
        self.root = self.merge_pairs(children);

        self.nodes.remove(root).map(|node| (node.kind, node.value))
    }

    fn node(&self, key: Key) -> &Node<T> {
        self.nodes.get(key).expect("dangling timer link")
    }

    fn node_mut(&mut self, key: Key) -> &mut Node<T> {
        self.nodes.get_mut(key).expect("dangling timer link")
    }

    fn less(&self, a: Key, b: Key) -> bool {
        let a = self.node(a);
        let b = self.node(b);
        match a.expiry.cmp(&b.expiry) {
            Ordering::Equal => a.seq < b.seq,
            ord => ord == Ordering::Less,
        }
    }

    /// Links two detached trees; the larger root becomes the first child of
    /// the smaller one.
    fn meld(&mut self, a: Key, b: Key) -> Key {
        let (parent, child) = if self.less(b, a) { (b, a) } else { (a, b) };

        let first = self.node(parent).child;
        if let Some(first) = first {
            self.node_mut(first).prev = Some(child);
        }

        let node = self.node_mut(child);
        node.sibling = first;
        node.prev = Some(parent);

        self.node_mut(parent).child = Some(child);
        parent
    }

    /// Unlinks a non-root node from its parent or left sibling.
    fn detach(&mut self, key: Key) {
        let node = self.node_mut(key);
        let prev = node.prev.take().expect("non-root node without prev link");
        let sibling = node.sibling.take();

        let prev_node = self.node_mut(prev);
        if prev_node.child == Some(key) {
            prev_node.child = sibling;
        } else {
            prev_node.sibling = sibling;
        }

        if let Some(sibling) = sibling {
            self.node_mut(sibling).prev = Some(prev);
        }
    }

    /// Standard two-pass pairing of a sibling list into one tree.
    fn merge_pairs(&mut self, first: Option<Key>) -> Option<Key> {
        let mut trees = Vec::new();
        let mut cursor = first;

        while let Some(key) = cursor {
            let node = self.node_mut(key);
            cursor = node.sibling.take();
            node.prev = None;
            trees.push(key);
        }

        let mut paired = Vec::with_capacity(trees.len().div_ceil(2));
        let mut iter = trees.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => paired.push(self.meld(a, b)),
                None => paired.push(a),
            }
        }

        let mut root = paired.pop()?;
        while let Some(tree) = paired.pop() {
            root = self.meld(tree, root);
        }
        Some(root)
    }
}
