//! Kademlia routing table: a binary tree of k-buckets.
//!
//! The tree is keyed by the XOR relation between the owner's key and a
//! peer's key. Each leaf holds a k-bucket ordered by access recency
//! (most-recently-seen at the tail); each internal node splits on one bit,
//! with the owner-matching side on the LEFT.
//!
//! ## Split policy
//!
//! A full leaf splits only while it lies on the owner's own prefix path
//! (the root trivially does). The split bit of a leaf at depth d is d, so a
//! split creates two children at depth d+1 and re-attempts the insertion,
//! recursing under the same rule. Everywhere else a full bucket refuses the
//! insertion.
//!
//! Key collisions (same key, different address) are always refused; an
//! entry is never overwritten.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use oxbow_types::{Distance, Key, PeerInfo, KEY_BITS};

/// Result of attempting to add a peer to the routing table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// The peer was newly inserted into a bucket.
    Added,
    /// The peer was already present at the same address; its entry moved to
    /// the most-recently-seen position.
    Refreshed,
    /// The insertion was refused: unknown key, key collision, or a full
    /// non-splittable bucket.
    Rejected,
}

impl AddOutcome {
    /// Whether the peer is present in the table after the call.
    pub fn was_added(&self) -> bool {
        matches!(self, AddOutcome::Added | AddOutcome::Refreshed)
    }

    /// Whether the call inserted a peer that was not previously present.
    pub fn is_new(&self) -> bool {
        matches!(self, AddOutcome::Added)
    }
}

/// One routed contact and the bookkeeping that goes with it.
#[derive(Clone, Debug)]
struct Contact {
    key: Key,
    peer: PeerInfo,
    last_seen: Instant,
}

/// A leaf bucket: up to k contacts, most-recently-seen at the tail.
#[derive(Debug, Default)]
struct Bucket {
    entries: VecDeque<Contact>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    fn position(&self, key: &Key) -> Option<usize> {
        self.entries.iter().position(|c| c.key == *key)
    }

    fn push(&mut self, key: Key, peer: PeerInfo) {
        self.entries.push_back(Contact {
            key,
            peer,
            last_seen: Instant::now(),
        });
    }

    /// Move an entry to the tail and stamp it as just seen.
    fn refresh(&mut self, pos: usize) {
        if let Some(mut contact) = self.entries.remove(pos) {
            contact.last_seen = Instant::now();
            self.entries.push_back(contact);
        }
    }
}

/// A node of the routing tree.
#[derive(Debug)]
enum TreeNode {
    Leaf(Bucket),
    Branch(Branch),
}

/// An internal node holding the split bit and two children. The LEFT child
/// is the owner-matching-bit side.
#[derive(Debug)]
struct Branch {
    bit: usize,
    left: Box<TreeNode>,
    right: Box<TreeNode>,
}

/// The routing table of one node.
pub struct RoutingTable {
    owner: Key,
    k: usize,
    root: TreeNode,
}

impl RoutingTable {
    /// Create an empty table for the given owner key and bucket size.
    pub fn new(owner: Key, k: usize) -> Self {
        Self {
            owner,
            k: k.max(1),
            root: TreeNode::Leaf(Bucket::new()),
        }
    }

    /// The owner's key.
    pub fn owner(&self) -> &Key {
        &self.owner
    }

    /// Add a peer to the table.
    ///
    /// A peer already present at the same address is refreshed (moved to
    /// the bucket tail). The same key at a different address is refused:
    /// an entry is never overwritten. A peer with no key is refused.
    pub fn add(&mut self, peer: PeerInfo) -> AddOutcome {
        let Some(key) = peer.key else {
            return AddOutcome::Rejected;
        };
        if key == self.owner {
            return AddOutcome::Rejected;
        }
        let owner = self.owner;
        let k = self.k;
        insert_node(&mut self.root, owner, k, peer, key, 0, true)
    }

    /// Remove a peer by key. Returns whether it was present.
    pub fn remove(&mut self, key: &Key) -> bool {
        let owner = self.owner;
        remove_node(&mut self.root, owner, key)
    }

    /// Up to `n` peers closest to `target` by XOR distance.
    ///
    /// With `only_closest_bucket` the search is restricted to the single
    /// leaf bucket nearest the target; otherwise all buckets contribute.
    pub fn nearest(&self, target: &Key, n: usize, only_closest_bucket: bool) -> Vec<PeerInfo> {
        let mut found = if only_closest_bucket {
            closest_bucket(&self.root, target)
        } else {
            let mut out = Vec::new();
            collect_all(&self.root, target, &mut out);
            out
        };
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.truncate(n);
        found.into_iter().map(|(_, peer)| peer).collect()
    }

    /// Total number of peers across all buckets.
    pub fn count(&self) -> usize {
        count_node(&self.root)
    }

    /// Sizes of every leaf bucket, in tree order.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::new();
        bucket_sizes_node(&self.root, &mut sizes);
        sizes
    }

    /// Time since the given peer was last seen, if it is in the table.
    pub fn contact_age(&self, key: &Key) -> Option<Duration> {
        let owner = self.owner;
        find_contact(&self.root, owner, key).map(|c| c.last_seen.elapsed())
    }
}

fn insert_node(
    node: &mut TreeNode,
    owner: Key,
    k: usize,
    peer: PeerInfo,
    key: Key,
    depth: usize,
    owner_path: bool,
) -> AddOutcome {
    if let TreeNode::Branch(branch) = node {
        let same_side = key.bit(branch.bit) == owner.bit(branch.bit);
        return if same_side {
            insert_node(&mut branch.left, owner, k, peer, key, depth + 1, owner_path)
        } else {
            insert_node(&mut branch.right, owner, k, peer, key, depth + 1, false)
        };
    }

    let can_split;
    {
        let TreeNode::Leaf(bucket) = node else {
            return AddOutcome::Rejected;
        };
        if let Some(pos) = bucket.position(&key) {
            return if bucket.entries[pos].peer.addr == peer.addr {
                bucket.refresh(pos);
                AddOutcome::Refreshed
            } else {
                AddOutcome::Rejected
            };
        }
        if bucket.entries.len() < k {
            bucket.push(key, peer);
            return AddOutcome::Added;
        }
        // The owner path is the only place a full leaf may split; the root
        // leaf is trivially on it.
        can_split = owner_path && depth < KEY_BITS;
    }
    if !can_split {
        return AddOutcome::Rejected;
    }
    split_leaf(node, owner, depth);
    insert_node(node, owner, k, peer, key, depth, owner_path)
}

/// Replace a leaf with a branch splitting on `depth`, partitioning its
/// contacts by whether their `depth`-th bit matches the owner's.
fn split_leaf(node: &mut TreeNode, owner: Key, depth: usize) {
    let TreeNode::Leaf(bucket) = std::mem::replace(node, TreeNode::Leaf(Bucket::new())) else {
        return;
    };
    let mut left = Bucket::new();
    let mut right = Bucket::new();
    for contact in bucket.entries {
        if contact.key.bit(depth) == owner.bit(depth) {
            left.entries.push_back(contact);
        } else {
            right.entries.push_back(contact);
        }
    }
    debug!(bit = depth, "splitting bucket");
    *node = TreeNode::Branch(Branch {
        bit: depth,
        left: Box::new(TreeNode::Leaf(left)),
        right: Box::new(TreeNode::Leaf(right)),
    });
}

fn remove_node(node: &mut TreeNode, owner: Key, key: &Key) -> bool {
    match node {
        TreeNode::Branch(branch) => {
            let same_side = key.bit(branch.bit) == owner.bit(branch.bit);
            if same_side {
                remove_node(&mut branch.left, owner, key)
            } else {
                remove_node(&mut branch.right, owner, key)
            }
        }
        TreeNode::Leaf(bucket) => {
            if let Some(pos) = bucket.position(key) {
                bucket.entries.remove(pos);
                true
            } else {
                false
            }
        }
    }
}

fn collect_all(node: &TreeNode, target: &Key, out: &mut Vec<(Distance, PeerInfo)>) {
    match node {
        TreeNode::Leaf(bucket) => {
            out.extend(
                bucket
                    .entries
                    .iter()
                    .map(|c| (target.distance(&c.key), c.peer.clone())),
            );
        }
        TreeNode::Branch(branch) => {
            collect_all(&branch.left, target, out);
            collect_all(&branch.right, target, out);
        }
    }
}

/// Contacts of the single non-empty leaf whose nearest element is closest
/// to the target. Empty iff the whole subtree is empty.
fn closest_bucket(node: &TreeNode, target: &Key) -> Vec<(Distance, PeerInfo)> {
    match node {
        TreeNode::Leaf(bucket) => bucket
            .entries
            .iter()
            .map(|c| (target.distance(&c.key), c.peer.clone()))
            .collect(),
        TreeNode::Branch(branch) => {
            let left = closest_bucket(&branch.left, target);
            let right = closest_bucket(&branch.right, target);
            if left.is_empty() {
                return right;
            }
            if right.is_empty() {
                return left;
            }
            let left_min = left.iter().map(|(d, _)| *d).min();
            let right_min = right.iter().map(|(d, _)| *d).min();
            if left_min <= right_min {
                left
            } else {
                right
            }
        }
    }
}

fn count_node(node: &TreeNode) -> usize {
    match node {
        TreeNode::Leaf(bucket) => bucket.entries.len(),
        TreeNode::Branch(branch) => count_node(&branch.left) + count_node(&branch.right),
    }
}

fn bucket_sizes_node(node: &TreeNode, sizes: &mut Vec<usize>) {
    match node {
        TreeNode::Leaf(bucket) => sizes.push(bucket.entries.len()),
        TreeNode::Branch(branch) => {
            bucket_sizes_node(&branch.left, sizes);
            bucket_sizes_node(&branch.right, sizes);
        }
    }
}

fn find_contact<'a>(node: &'a TreeNode, owner: Key, key: &Key) -> Option<&'a Contact> {
    match node {
        TreeNode::Branch(branch) => {
            let same_side = key.bit(branch.bit) == owner.bit(branch.bit);
            if same_side {
                find_contact(&branch.left, owner, key)
            } else {
                find_contact(&branch.right, owner, key)
            }
        }
        TreeNode::Leaf(bucket) => bucket.position(key).and_then(|pos| bucket.entries.get(pos)),
    }
}
