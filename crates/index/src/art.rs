//! Adaptive radix tree index.
//!
//! Nodes grow through the classic size classes (4 → 16 → 48 → 256 child
//! slots) and carry a compressed path prefix, so densely shared key prefixes
//! cost one node instead of one node per byte. Because keys are arbitrary
//! byte strings (one key may be a prefix of another), every inner node also
//! has a terminal slot for the key that ends exactly at it.

use logfile::Position;
use parking_lot::RwLock;

use crate::{IndexIterator, Indexer, Result};

/// Adaptive radix tree behind a reader/writer lock. Same contract as the
/// B-tree index; rebuilt from the log on every open.
pub struct ArtIndex {
    inner: RwLock<Art>,
}

impl ArtIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Art {
                root: None,
                len: 0,
            }),
        }
    }
}

impl Default for ArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for ArtIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.inner.read().get(key))
    }

    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        let mut art = self.inner.write();
        let old = art.insert(&key, pos);
        if old.is_none() {
            art.len += 1;
        }
        Ok(old)
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        let mut art = self.inner.write();
        let old = art.remove(key);
        if old.is_some() {
            art.len -= 1;
        }
        Ok(old)
    }

    fn size(&self) -> usize {
        self.inner.read().len
    }

    fn iterator(&self, reverse: bool) -> Result<IndexIterator> {
        let art = self.inner.read();
        let mut entries = Vec::with_capacity(art.len);
        if let Some(root) = &art.root {
            collect(root, &mut Vec::new(), &mut entries);
        }
        Ok(IndexIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct Art {
    root: Option<Box<Node>>,
    len: usize,
}

enum Node {
    /// A single key with its position; stores the full key so a leaf can be
    /// relocated without reconstructing its path.
    Leaf { key: Vec<u8>, pos: Position },
    Inner(Inner),
}

struct Inner {
    /// Compressed path: bytes every key below this node shares.
    prefix: Vec<u8>,
    /// Position of the key that ends exactly at this node, if any.
    terminal: Option<Position>,
    children: Children,
}

impl Art {
    fn get(&self, key: &[u8]) -> Option<Position> {
        let mut node = self.root.as_deref()?;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { key: lkey, pos } => {
                    return (lkey[depth..] == key[depth..]).then_some(*pos);
                }
                Node::Inner(inner) => {
                    let rest = &key[depth..];
                    if rest.len() < inner.prefix.len() || !rest.starts_with(&inner.prefix) {
                        return None;
                    }
                    depth += inner.prefix.len();
                    if depth == key.len() {
                        return inner.terminal;
                    }
                    node = inner.children.find(key[depth])?;
                    depth += 1;
                }
            }
        }
    }

    fn insert(&mut self, key: &[u8], pos: Position) -> Option<Position> {
        match self.root.take() {
            None => {
                self.root = Some(Box::new(Node::Leaf {
                    key: key.to_vec(),
                    pos,
                }));
                None
            }
            Some(root) => {
                let (node, old) = insert_at(root, key, 0, pos);
                self.root = Some(node);
                old
            }
        }
    }

    fn remove(&mut self, key: &[u8]) -> Option<Position> {
        let root = self.root.take()?;
        let (node, old) = remove_at(root, key, 0);
        self.root = node;
        old
    }
}

/// Inserts `key` below `node` (whose path covers `key[..depth]`), returning
/// the replacement node and the previous position if the key existed.
fn insert_at(
    mut node: Box<Node>,
    key: &[u8],
    mut depth: usize,
    pos: Position,
) -> (Box<Node>, Option<Position>) {
    match &mut *node {
        Node::Leaf {
            key: lkey,
            pos: lpos,
        } => {
            if lkey[depth..] == key[depth..] {
                let old = *lpos;
                *lpos = pos;
                return (node, Some(old));
            }
            // split: a fresh inner node holding the shared remainder
            let shared = common_prefix(&lkey[depth..], &key[depth..]);
            let mut inner = Inner {
                prefix: key[depth..depth + shared].to_vec(),
                terminal: None,
                children: Children::new4(),
            };
            depth += shared;

            if lkey.len() == depth {
                inner.terminal = Some(*lpos);
            } else {
                let byte = lkey[depth];
                inner.children.add(byte, node);
            }
            if key.len() == depth {
                inner.terminal = Some(pos);
            } else {
                inner.children.add(
                    key[depth],
                    Box::new(Node::Leaf {
                        key: key.to_vec(),
                        pos,
                    }),
                );
            }
            (Box::new(Node::Inner(inner)), None)
        }
        Node::Inner(inner) => {
            let rest = &key[depth..];
            let shared = common_prefix(&inner.prefix, rest);
            if shared < inner.prefix.len() {
                // the new key diverges inside this node's prefix: split it
                let mut top = Inner {
                    prefix: inner.prefix[..shared].to_vec(),
                    terminal: None,
                    children: Children::new4(),
                };
                let down_byte = inner.prefix[shared];
                inner.prefix.drain(..shared + 1);
                top.children.add(down_byte, node);
                depth += shared;
                if key.len() == depth {
                    top.terminal = Some(pos);
                } else {
                    top.children.add(
                        key[depth],
                        Box::new(Node::Leaf {
                            key: key.to_vec(),
                            pos,
                        }),
                    );
                }
                return (Box::new(Node::Inner(top)), None);
            }

            depth += inner.prefix.len();
            if key.len() == depth {
                let old = inner.terminal.replace(pos);
                return (node, old);
            }
            let byte = key[depth];
            match inner.children.take(byte) {
                Some(child) => {
                    let (child, old) = insert_at(child, key, depth + 1, pos);
                    inner.children.add(byte, child);
                    (node, old)
                }
                None => {
                    inner.children.add(
                        byte,
                        Box::new(Node::Leaf {
                            key: key.to_vec(),
                            pos,
                        }),
                    );
                    (node, None)
                }
            }
        }
    }
}

/// Removes `key` below `node`, returning the replacement (or `None` if the
/// subtree became empty) and the removed position.
fn remove_at(
    mut node: Box<Node>,
    key: &[u8],
    mut depth: usize,
) -> (Option<Box<Node>>, Option<Position>) {
    match &mut *node {
        Node::Leaf { key: lkey, pos } => {
            if lkey[depth..] == key[depth..] {
                (None, Some(*pos))
            } else {
                (Some(node), None)
            }
        }
        Node::Inner(inner) => {
            let rest = &key[depth..];
            if rest.len() < inner.prefix.len() || !rest.starts_with(&inner.prefix) {
                return (Some(node), None);
            }
            depth += inner.prefix.len();

            let old = if depth == key.len() {
                inner.terminal.take()
            } else {
                let byte = key[depth];
                match inner.children.take(byte) {
                    None => return (Some(node), None),
                    Some(child) => {
                        let (child, old) = remove_at(child, key, depth + 1);
                        if let Some(child) = child {
                            inner.children.add(byte, child);
                        }
                        old
                    }
                }
            };
            if old.is_none() {
                return (Some(node), None);
            }

            // collapse pass-through nodes left behind by the removal
            match (inner.terminal.is_some(), inner.children.len()) {
                (false, 0) => (None, old),
                (false, 1) => {
                    let (byte, child) = inner.children.take_only();
                    let merged = match *child {
                        Node::Leaf { .. } => child,
                        Node::Inner(mut sub) => {
                            let mut prefix =
                                Vec::with_capacity(inner.prefix.len() + 1 + sub.prefix.len());
                            prefix.extend_from_slice(&inner.prefix);
                            prefix.push(byte);
                            prefix.extend_from_slice(&sub.prefix);
                            sub.prefix = prefix;
                            Box::new(Node::Inner(sub))
                        }
                    };
                    (Some(merged), old)
                }
                _ => (Some(node), old),
            }
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// In-order collection for the snapshot iterator. `path` holds the bytes
/// leading to `node` and is only used for terminal slots; leaves carry their
/// full key.
fn collect(node: &Node, path: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, Position)>) {
    match node {
        Node::Leaf { key, pos } => out.push((key.clone(), *pos)),
        Node::Inner(inner) => {
            path.extend_from_slice(&inner.prefix);
            if let Some(pos) = inner.terminal {
                out.push((path.clone(), pos));
            }
            inner.children.for_each_ordered(|byte, child| {
                path.push(byte);
                collect(child, path, out);
                path.pop();
            });
            path.truncate(path.len() - inner.prefix.len());
        }
    }
}

// -------------------- adaptive child arrays --------------------

enum Children {
    /// Up to 4 children, keys kept sorted.
    Node4 {
        keys: [u8; 4],
        nodes: [Option<Box<Node>>; 4],
        len: u8,
    },
    /// Up to 16 children, keys kept sorted.
    Node16 {
        keys: [u8; 16],
        nodes: [Option<Box<Node>>; 16],
        len: u8,
    },
    /// 256-entry byte index into 48 slots; `NO_SLOT` marks absence.
    Node48 {
        index: [u8; 256],
        nodes: [Option<Box<Node>>; 48],
        len: u8,
    },
    /// Direct byte-indexed array.
    Node256 {
        nodes: [Option<Box<Node>>; 256],
        len: u16,
    },
}

const NO_SLOT: u8 = 0xff;

impl Children {
    fn new4() -> Self {
        Children::Node4 {
            keys: [0; 4],
            nodes: Default::default(),
            len: 0,
        }
    }

    fn len(&self) -> usize {
        match self {
            Children::Node4 { len, .. } | Children::Node16 { len, .. } => *len as usize,
            Children::Node48 { len, .. } => *len as usize,
            Children::Node256 { len, .. } => *len as usize,
        }
    }

    fn find(&self, byte: u8) -> Option<&Node> {
        match self {
            Children::Node4 { keys, nodes, len } => keys[..*len as usize]
                .iter()
                .position(|&k| k == byte)
                .and_then(|i| nodes[i].as_deref()),
            Children::Node16 { keys, nodes, len } => keys[..*len as usize]
                .binary_search(&byte)
                .ok()
                .and_then(|i| nodes[i].as_deref()),
            Children::Node48 { index, nodes, .. } => {
                let slot = index[byte as usize];
                if slot == NO_SLOT {
                    None
                } else {
                    nodes[slot as usize].as_deref()
                }
            }
            Children::Node256 { nodes, .. } => nodes[byte as usize].as_deref(),
        }
    }

    /// Removes and returns the child at `byte`, leaving its slot free.
    fn take(&mut self, byte: u8) -> Option<Box<Node>> {
        match self {
            Children::Node4 { keys, nodes, len } => {
                let i = keys[..*len as usize].iter().position(|&k| k == byte)?;
                let node = nodes[i].take();
                // shift the sorted tail down
                for j in i..*len as usize - 1 {
                    keys[j] = keys[j + 1];
                    nodes[j] = nodes[j + 1].take();
                }
                *len -= 1;
                node
            }
            Children::Node16 { keys, nodes, len } => {
                let i = keys[..*len as usize].binary_search(&byte).ok()?;
                let node = nodes[i].take();
                for j in i..*len as usize - 1 {
                    keys[j] = keys[j + 1];
                    nodes[j] = nodes[j + 1].take();
                }
                *len -= 1;
                node
            }
            Children::Node48 { index, nodes, len } => {
                let slot = index[byte as usize];
                if slot == NO_SLOT {
                    return None;
                }
                index[byte as usize] = NO_SLOT;
                *len -= 1;
                nodes[slot as usize].take()
            }
            Children::Node256 { nodes, len } => {
                let node = nodes[byte as usize].take();
                if node.is_some() {
                    *len -= 1;
                }
                node
            }
        }
    }

    /// Takes the single remaining child; callers check `len() == 1` first.
    fn take_only(&mut self) -> (u8, Box<Node>) {
        match self {
            Children::Node4 { keys, nodes, len } => take_only_sorted(keys, nodes, len),
            Children::Node16 { keys, nodes, len } => take_only_sorted(keys, nodes, len),
            Children::Node48 { index, nodes, len } => {
                *len = 0;
                for byte in 0..=255u8 {
                    let slot = index[byte as usize];
                    if slot != NO_SLOT {
                        index[byte as usize] = NO_SLOT;
                        if let Some(node) = nodes[slot as usize].take() {
                            return (byte, node);
                        }
                    }
                }
                unreachable!("node48 with len == 1 has a populated slot")
            }
            Children::Node256 { nodes, len } => {
                *len = 0;
                for byte in 0..=255u8 {
                    if let Some(node) = nodes[byte as usize].take() {
                        return (byte, node);
                    }
                }
                unreachable!("node256 with len == 1 has a populated slot")
            }
        }
    }

    /// Inserts a child, growing to the next size class when full. `byte` must
    /// not already be present.
    fn add(&mut self, byte: u8, node: Box<Node>) {
        if self.is_full() {
            self.grow();
        }
        match self {
            Children::Node4 { keys, nodes, len } => add_sorted(keys, nodes, len, byte, node),
            Children::Node16 { keys, nodes, len } => add_sorted(keys, nodes, len, byte, node),
            Children::Node48 { index, nodes, len } => {
                // removals leave holes, so the first free slot is not *len
                for (slot, entry) in nodes.iter_mut().enumerate() {
                    if entry.is_none() {
                        index[byte as usize] = slot as u8;
                        *entry = Some(node);
                        *len += 1;
                        return;
                    }
                }
                unreachable!("node48 grows before all slots fill");
            }
            Children::Node256 { nodes, len } => {
                nodes[byte as usize] = Some(node);
                *len += 1;
            }
        }
    }

    fn is_full(&self) -> bool {
        match self {
            Children::Node4 { len, .. } => *len == 4,
            Children::Node16 { len, .. } => *len == 16,
            Children::Node48 { len, .. } => *len == 48,
            Children::Node256 { .. } => false,
        }
    }

    fn grow(&mut self) {
        *self = match self {
            Children::Node4 { keys, nodes, len } => {
                let mut new_keys = [0u8; 16];
                let mut new_nodes: [Option<Box<Node>>; 16] = Default::default();
                for i in 0..*len as usize {
                    new_keys[i] = keys[i];
                    new_nodes[i] = nodes[i].take();
                }
                Children::Node16 {
                    keys: new_keys,
                    nodes: new_nodes,
                    len: *len,
                }
            }
            Children::Node16 { keys, nodes, len } => {
                let mut index = [NO_SLOT; 256];
                let mut new_nodes: [Option<Box<Node>>; 48] = std::array::from_fn(|_| None);
                for i in 0..*len as usize {
                    index[keys[i] as usize] = i as u8;
                    new_nodes[i] = nodes[i].take();
                }
                Children::Node48 {
                    index,
                    nodes: new_nodes,
                    len: *len,
                }
            }
            Children::Node48 { index, nodes, len } => {
                let mut new_nodes: [Option<Box<Node>>; 256] = std::array::from_fn(|_| None);
                for byte in 0..256usize {
                    let slot = index[byte];
                    if slot != NO_SLOT {
                        new_nodes[byte] = nodes[slot as usize].take();
                    }
                }
                Children::Node256 {
                    nodes: new_nodes,
                    len: u16::from(*len),
                }
            }
            Children::Node256 { .. } => return,
        };
    }

    /// Visits children in ascending byte order.
    fn for_each_ordered(&self, mut f: impl FnMut(u8, &Node)) {
        match self {
            Children::Node4 { keys, nodes, len } => {
                for i in 0..*len as usize {
                    if let Some(node) = nodes[i].as_deref() {
                        f(keys[i], node);
                    }
                }
            }
            Children::Node16 { keys, nodes, len } => {
                for i in 0..*len as usize {
                    if let Some(node) = nodes[i].as_deref() {
                        f(keys[i], node);
                    }
                }
            }
            Children::Node48 { index, nodes, .. } => {
                for byte in 0..256usize {
                    let slot = index[byte];
                    if slot != NO_SLOT {
                        if let Some(node) = nodes[slot as usize].as_deref() {
                            f(byte as u8, node);
                        }
                    }
                }
            }
            Children::Node256 { nodes, .. } => {
                for byte in 0..256usize {
                    if let Some(node) = nodes[byte].as_deref() {
                        f(byte as u8, node);
                    }
                }
            }
        }
    }
}

/// Sorted insertion into a Node4/Node16 child array with spare capacity.
fn add_sorted(
    keys: &mut [u8],
    nodes: &mut [Option<Box<Node>>],
    len: &mut u8,
    byte: u8,
    node: Box<Node>,
) {
    let n = *len as usize;
    let i = keys[..n].partition_point(|&k| k < byte);
    for j in (i..n).rev() {
        keys[j + 1] = keys[j];
        nodes[j + 1] = nodes[j].take();
    }
    keys[i] = byte;
    nodes[i] = Some(node);
    *len += 1;
}

/// Takes the only child out of a Node4/Node16 array.
fn take_only_sorted(
    keys: &mut [u8],
    nodes: &mut [Option<Box<Node>>],
    len: &mut u8,
) -> (u8, Box<Node>) {
    *len = 0;
    let byte = keys[0];
    match nodes[0].take() {
        Some(node) => (byte, node),
        None => unreachable!("slot 0 populated when len == 1"),
    }
}
