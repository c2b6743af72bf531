//! Persistent B+ tree index.
//!
//! A page-based tree stored in a single `bplustree-index` file. Page 0 is the
//! meta page (magic, root id, page count, key count); every other page holds
//! one node. Because the tree persists the key→position mapping, an engine
//! configured with it does not rebuild the index from the log on open.
//!
//! ## Page layout (4096 bytes, zero padded)
//!
//! ```text
//! meta:   [magic: u32][root: u32][page_count: u32][key_count: u64]
//! leaf:   [1: u8][n: u16][next_leaf: u32] n * ([key_len: u16][pos_len: u8][key][pos])
//! branch: [2: u8][n: u16]                 n * ([key_len: u16][child: u32][key])
//! ```
//!
//! Branch entries carry the smallest key that was in the child's subtree when
//! the entry was created; deletions may leave the separator smaller than the
//! child's current minimum, which keeps it a valid lower bound. Nodes split
//! when their serialised form outgrows a page; underflow is tolerated (no
//! rebalancing), matching the write-heavy, reopen-rarely profile of the
//! engine.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use logfile::{decode_position, encode_position, Position};
use parking_lot::RwLock;

use crate::{IndexError, IndexIterator, Indexer, Result};

/// File name of the persisted tree inside the data directory.
pub const BPTREE_FILE_NAME: &str = "bplustree-index";

const PAGE_SIZE: usize = 4096;
const MAGIC: u32 = 0x4650_4254; // "FBPT"
const META_PAGE: u32 = 0;

const NODE_LEAF: u8 = 1;
const NODE_BRANCH: u8 = 2;

/// On-disk B+ tree behind a reader/writer lock.
///
/// Every mutation is written through to the file before returning; `fsync`
/// per mutation is governed by `sync_writes`. Visited pages are cached in
/// memory, so reads after warm-up never touch the file.
pub struct BPlusTreeIndex {
    inner: RwLock<Tree>,
}

impl BPlusTreeIndex {
    /// Opens (or initialises) the tree file inside `dir`.
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.join(BPTREE_FILE_NAME))?;

        let mut tree = Tree {
            file,
            meta: Meta {
                root: 1,
                page_count: 2,
                key_count: 0,
            },
            pages: HashMap::new(),
            sync_writes,
        };

        if tree.file.metadata()?.len() == 0 {
            // fresh file: an empty leaf as root
            tree.pages.insert(
                1,
                BNode::Leaf {
                    entries: Vec::new(),
                    next: 0,
                },
            );
            tree.write_page(1)?;
            tree.write_meta()?;
            tree.file.sync_all()?;
        } else {
            tree.read_meta()?;
        }

        Ok(Self {
            inner: RwLock::new(tree),
        })
    }
}

impl Indexer for BPlusTreeIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Position>> {
        self.inner.write().get(key)
    }

    fn put(&self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        self.inner.write().put(key, pos)
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        self.inner.write().delete(key)
    }

    fn size(&self) -> usize {
        self.inner.read().meta.key_count as usize
    }

    fn iterator(&self, reverse: bool) -> Result<IndexIterator> {
        let entries = self.inner.write().all_entries()?;
        Ok(IndexIterator::new(entries, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(self.inner.read().file.sync_all()?)
    }
}

struct Meta {
    root: u32,
    page_count: u32,
    key_count: u64,
}

enum BNode {
    Leaf {
        /// Sorted `(key, position)` pairs.
        entries: Vec<(Vec<u8>, Position)>,
        /// Page id of the next leaf, 0 for the rightmost.
        next: u32,
    },
    Branch {
        /// Sorted `(separator, child page)` pairs; the separator is a lower
        /// bound for every key in the child's subtree.
        entries: Vec<(Vec<u8>, u32)>,
    },
}

struct Tree {
    file: File,
    meta: Meta,
    /// Write-through cache of every page visited so far.
    pages: HashMap<u32, BNode>,
    sync_writes: bool,
}

impl Tree {
    // -------------------- lookups --------------------

    fn get(&mut self, key: &[u8]) -> Result<Option<Position>> {
        let leaf_id = self.descend_to_leaf(key)?;
        let BNode::Leaf { entries, .. } = self.node(leaf_id)? else {
            return Err(IndexError::Corrupted("leaf expected at tree bottom".into()));
        };
        Ok(match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(i) => Some(entries[i].1),
            Err(_) => None,
        })
    }

    /// Walks from the root to the leaf responsible for `key`.
    fn descend_to_leaf(&mut self, key: &[u8]) -> Result<u32> {
        let mut id = self.meta.root;
        loop {
            match self.node(id)? {
                BNode::Leaf { .. } => return Ok(id),
                BNode::Branch { entries } => {
                    if entries.is_empty() {
                        return Err(IndexError::Corrupted("empty branch page".into()));
                    }
                    let idx = entries.partition_point(|(k, _)| k.as_slice() <= key);
                    // keys below the first separator route to the first child
                    id = entries[idx.max(1) - 1].1;
                }
            }
        }
    }

    /// Same walk as [`descend_to_leaf`] but records `(page, child index)`
    /// hops so splits can propagate upward.
    fn descend_with_path(&mut self, key: &[u8]) -> Result<(u32, Vec<(u32, usize)>)> {
        let mut id = self.meta.root;
        let mut path = Vec::new();
        loop {
            match self.node(id)? {
                BNode::Leaf { .. } => return Ok((id, path)),
                BNode::Branch { entries } => {
                    if entries.is_empty() {
                        return Err(IndexError::Corrupted("empty branch page".into()));
                    }
                    let idx = entries.partition_point(|(k, _)| k.as_slice() <= key);
                    let child_idx = idx.max(1) - 1;
                    path.push((id, child_idx));
                    id = entries[child_idx].1;
                }
            }
        }
    }

    // -------------------- mutations --------------------

    fn put(&mut self, key: Vec<u8>, pos: Position) -> Result<Option<Position>> {
        if leaf_entry_size(&key) > PAGE_SIZE - LEAF_HEADER {
            return Err(IndexError::KeyTooLarge(key.len()));
        }

        let (leaf_id, path) = self.descend_with_path(&key)?;
        let BNode::Leaf { entries, .. } = self.node_mut(leaf_id)? else {
            return Err(IndexError::Corrupted("leaf expected at tree bottom".into()));
        };

        let old = match entries.binary_search_by(|(k, _)| k.as_slice().cmp(&key[..])) {
            Ok(i) => {
                let old = entries[i].1;
                entries[i].1 = pos;
                Some(old)
            }
            Err(i) => {
                entries.insert(i, (key, pos));
                None
            }
        };
        if old.is_none() {
            self.meta.key_count += 1;
        }

        let mut dirty = vec![leaf_id];
        self.split_along(leaf_id, path, &mut dirty)?;
        self.flush(&dirty)?;
        Ok(old)
    }

    fn delete(&mut self, key: &[u8]) -> Result<Option<Position>> {
        let leaf_id = self.descend_to_leaf(key)?;
        let BNode::Leaf { entries, .. } = self.node_mut(leaf_id)? else {
            return Err(IndexError::Corrupted("leaf expected at tree bottom".into()));
        };

        let old = match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(i) => Some(entries.remove(i).1),
            Err(_) => None,
        };
        if old.is_some() {
            self.meta.key_count -= 1;
            self.flush(&[leaf_id])?;
        }
        Ok(old)
    }

    /// Splits `id` if its serialised form no longer fits a page, promoting
    /// new separators along the recorded `path` (which may split in turn).
    fn split_along(&mut self, id: u32, path: Vec<(u32, usize)>, dirty: &mut Vec<u32>) -> Result<()> {
        let mut split_id = id;
        let mut path = path;

        loop {
            let Some((sep, new_id)) = self.split_if_oversized(split_id)? else {
                return Ok(());
            };
            dirty.push(new_id);

            match path.pop() {
                Some((parent_id, child_idx)) => {
                    let BNode::Branch { entries } = self.node_mut(parent_id)? else {
                        return Err(IndexError::Corrupted("branch expected on path".into()));
                    };
                    entries.insert(child_idx + 1, (sep, new_id));
                    dirty.push(parent_id);
                    split_id = parent_id;
                }
                None => {
                    // the root itself split: grow the tree by one level
                    let old_root = self.meta.root;
                    let first_key = self.first_key(old_root)?;
                    let new_root = self.alloc_page();
                    self.pages.insert(
                        new_root,
                        BNode::Branch {
                            entries: vec![(first_key, old_root), (sep, new_id)],
                        },
                    );
                    self.meta.root = new_root;
                    dirty.push(new_root);
                    return Ok(());
                }
            }
        }
    }

    /// Splits the node in half when oversized, returning the new right
    /// sibling's separator key and page id.
    fn split_if_oversized(&mut self, id: u32) -> Result<Option<(Vec<u8>, u32)>> {
        let oversized = match self.node(id)? {
            BNode::Leaf { entries, next } => leaf_size(entries, *next) > PAGE_SIZE,
            BNode::Branch { entries } => branch_size(entries) > PAGE_SIZE,
        };
        if !oversized {
            return Ok(None);
        }

        let new_id = self.alloc_page();
        let (sep, right) = match self.node_mut(id)? {
            BNode::Leaf { entries, next } => {
                let right_entries = entries.split_off(entries.len() / 2);
                let sep = right_entries[0].0.clone();
                let right = BNode::Leaf {
                    entries: right_entries,
                    next: *next,
                };
                *next = new_id;
                (sep, right)
            }
            BNode::Branch { entries } => {
                let right_entries = entries.split_off(entries.len() / 2);
                let sep = right_entries[0].0.clone();
                (
                    sep,
                    BNode::Branch {
                        entries: right_entries,
                    },
                )
            }
        };
        self.pages.insert(new_id, right);
        Ok(Some((sep, new_id)))
    }

    fn first_key(&mut self, id: u32) -> Result<Vec<u8>> {
        match self.node(id)? {
            BNode::Leaf { entries, .. } => entries
                .first()
                .map(|(k, _)| k.clone())
                .ok_or_else(|| IndexError::Corrupted("split root has no keys".into())),
            BNode::Branch { entries } => entries
                .first()
                .map(|(k, _)| k.clone())
                .ok_or_else(|| IndexError::Corrupted("split root has no keys".into())),
        }
    }

    // -------------------- iteration --------------------

    /// Collects every entry in ascending key order by chasing leaf links.
    fn all_entries(&mut self) -> Result<Vec<(Vec<u8>, Position)>> {
        let mut out = Vec::with_capacity(self.meta.key_count as usize);

        // leftmost leaf
        let mut id = self.meta.root;
        loop {
            match self.node(id)? {
                BNode::Leaf { .. } => break,
                BNode::Branch { entries } => {
                    id = entries
                        .first()
                        .map(|(_, c)| *c)
                        .ok_or_else(|| IndexError::Corrupted("empty branch page".into()))?;
                }
            }
        }

        loop {
            let BNode::Leaf { entries, next } = self.node(id)? else {
                return Err(IndexError::Corrupted("leaf chain left the leaf level".into()));
            };
            out.extend(entries.iter().map(|(k, p)| (k.clone(), *p)));
            if *next == 0 {
                break;
            }
            id = *next;
        }
        Ok(out)
    }

    // -------------------- pages --------------------

    fn alloc_page(&mut self) -> u32 {
        let id = self.meta.page_count;
        self.meta.page_count += 1;
        id
    }

    fn node(&mut self, id: u32) -> Result<&BNode> {
        self.ensure_cached(id)?;
        self.pages
            .get(&id)
            .ok_or_else(|| IndexError::Corrupted(format!("page {id} missing from cache")))
    }

    fn node_mut(&mut self, id: u32) -> Result<&mut BNode> {
        self.ensure_cached(id)?;
        self.pages
            .get_mut(&id)
            .ok_or_else(|| IndexError::Corrupted(format!("page {id} missing from cache")))
    }

    fn ensure_cached(&mut self, id: u32) -> Result<()> {
        if self.pages.contains_key(&id) {
            return Ok(());
        }
        let mut buf = [0u8; PAGE_SIZE];
        self.file
            .read_exact_at(&mut buf, u64::from(id) * PAGE_SIZE as u64)?;
        let node = deserialize_node(&buf)?;
        self.pages.insert(id, node);
        Ok(())
    }

    /// Writes the dirty pages and the meta page through to the file.
    fn flush(&mut self, dirty: &[u32]) -> Result<()> {
        for &id in dirty {
            self.write_page(id)?;
        }
        self.write_meta()?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn write_page(&mut self, id: u32) -> Result<()> {
        let node = self
            .pages
            .get(&id)
            .ok_or_else(|| IndexError::Corrupted(format!("page {id} missing from cache")))?;
        let buf = serialize_node(node)?;
        self.file.write_all_at(&buf, u64::from(id) * PAGE_SIZE as u64)?;
        Ok(())
    }

    fn write_meta(&mut self) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.meta.root);
        LittleEndian::write_u32(&mut buf[8..12], self.meta.page_count);
        LittleEndian::write_u64(&mut buf[12..20], self.meta.key_count);
        self.file
            .write_all_at(&buf, u64::from(META_PAGE) * PAGE_SIZE as u64)?;
        Ok(())
    }

    fn read_meta(&mut self) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.read_exact_at(&mut buf, 0)?;
        if LittleEndian::read_u32(&buf[0..4]) != MAGIC {
            return Err(IndexError::Corrupted("bad magic in meta page".into()));
        }
        self.meta.root = LittleEndian::read_u32(&buf[4..8]);
        self.meta.page_count = LittleEndian::read_u32(&buf[8..12]);
        self.meta.key_count = LittleEndian::read_u64(&buf[12..20]);
        Ok(())
    }
}

// -------------------- node (de)serialisation --------------------

const LEAF_HEADER: usize = 1 + 2 + 4;
const BRANCH_HEADER: usize = 1 + 2;

fn leaf_entry_size(key: &[u8]) -> usize {
    // pos encodes to at most 20 varint bytes
    2 + 1 + key.len() + 20
}

fn leaf_size(entries: &[(Vec<u8>, Position)], _next: u32) -> usize {
    LEAF_HEADER
        + entries
            .iter()
            .map(|(k, p)| 2 + 1 + k.len() + encode_position(p).len())
            .sum::<usize>()
}

fn branch_size(entries: &[(Vec<u8>, u32)]) -> usize {
    BRANCH_HEADER + entries.iter().map(|(k, _)| 2 + 4 + k.len()).sum::<usize>()
}

fn serialize_node(node: &BNode) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; PAGE_SIZE];
    let mut at;
    match node {
        BNode::Leaf { entries, next } => {
            buf[0] = NODE_LEAF;
            LittleEndian::write_u16(&mut buf[1..3], entries.len() as u16);
            LittleEndian::write_u32(&mut buf[3..7], *next);
            at = LEAF_HEADER;
            for (key, pos) in entries {
                let enc = encode_position(pos);
                let need = 2 + 1 + key.len() + enc.len();
                if at + need > PAGE_SIZE {
                    return Err(IndexError::Corrupted("leaf overflows its page".into()));
                }
                LittleEndian::write_u16(&mut buf[at..at + 2], key.len() as u16);
                buf[at + 2] = enc.len() as u8;
                at += 3;
                buf[at..at + key.len()].copy_from_slice(key);
                at += key.len();
                buf[at..at + enc.len()].copy_from_slice(&enc);
                at += enc.len();
            }
        }
        BNode::Branch { entries } => {
            buf[0] = NODE_BRANCH;
            LittleEndian::write_u16(&mut buf[1..3], entries.len() as u16);
            at = BRANCH_HEADER;
            for (key, child) in entries {
                let need = 2 + 4 + key.len();
                if at + need > PAGE_SIZE {
                    return Err(IndexError::Corrupted("branch overflows its page".into()));
                }
                LittleEndian::write_u16(&mut buf[at..at + 2], key.len() as u16);
                LittleEndian::write_u32(&mut buf[at + 2..at + 6], *child);
                at += 6;
                buf[at..at + key.len()].copy_from_slice(key);
                at += key.len();
            }
        }
    }
    Ok(buf)
}

fn deserialize_node(buf: &[u8]) -> Result<BNode> {
    match buf[0] {
        NODE_LEAF => {
            let n = LittleEndian::read_u16(&buf[1..3]) as usize;
            let next = LittleEndian::read_u32(&buf[3..7]);
            let mut at = LEAF_HEADER;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let key_len = LittleEndian::read_u16(&buf[at..at + 2]) as usize;
                let pos_len = buf[at + 2] as usize;
                at += 3;
                let key = buf[at..at + key_len].to_vec();
                at += key_len;
                let (pos, _) = decode_position(&buf[at..at + pos_len])
                    .map_err(|e| IndexError::Corrupted(format!("bad position in leaf: {e}")))?;
                at += pos_len;
                entries.push((key, pos));
            }
            Ok(BNode::Leaf { entries, next })
        }
        NODE_BRANCH => {
            let n = LittleEndian::read_u16(&buf[1..3]) as usize;
            let mut at = BRANCH_HEADER;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let key_len = LittleEndian::read_u16(&buf[at..at + 2]) as usize;
                let child = LittleEndian::read_u32(&buf[at + 2..at + 6]);
                at += 6;
                let key = buf[at..at + key_len].to_vec();
                at += key_len;
                entries.push((key, child));
            }
            Ok(BNode::Branch { entries })
        }
        other => Err(IndexError::Corrupted(format!("unknown page type {other}"))),
    }
}
