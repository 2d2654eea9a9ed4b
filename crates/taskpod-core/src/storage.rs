//! Hierarchical storage data for parameter payloads.
//!
//! A [`StorageData`] is an arena of [`StorageDataEntry`] nodes plus an ordered
//! worklist of entry handles. Nodes refer to their parent by [`EntryId`], never
//! by reference, so the tree has no cyclic ownership. The worklist is FIFO and
//! normally holds the roots; readers that enumerate an existing subtree put
//! every node on it instead.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Kind of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageDataType {
    File,
    Directory,
}

/// Handle to a node inside one [`StorageData`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// A node of the storage tree.
///
/// A FILE node always carries bytes; a DIRECTORY node never does.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageDataEntry {
    name: String,
    data: Option<Vec<u8>>,
    storage_id: String,
    kind: StorageDataType,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
}

impl StorageDataEntry {
    /// A file node. Its storage-id segment defaults to its name.
    pub fn file(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        Self {
            storage_id: name.clone(),
            name,
            data: Some(data),
            kind: StorageDataType::File,
            parent: None,
            children: Vec::new(),
        }
    }

    /// A directory node. Its storage-id segment defaults to its name.
    pub fn directory(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            storage_id: name.clone(),
            name,
            data: None,
            kind: StorageDataType::Directory,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Builder method to override the storage-id segment.
    pub fn with_storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = storage_id.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File content; `None` for directories.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn kind(&self) -> StorageDataType {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == StorageDataType::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == StorageDataType::Directory
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn children(&self) -> &[EntryId] {
        &self.children
    }
}

/// A storage tree and its worklist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageData {
    entries: Vec<StorageDataEntry>,
    queue: VecDeque<EntryId>,
}

impl StorageData {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree holding a single FILE root.
    pub fn from_file(name: impl Into<String>, data: Vec<u8>) -> Self {
        let mut storage_data = Self::new();
        storage_data.push_root(StorageDataEntry::file(name, data));
        storage_data
    }

    /// Add a root node and append it to the worklist.
    pub fn push_root(&mut self, entry: StorageDataEntry) -> EntryId {
        let id = self.insert(entry, None);
        self.queue.push_back(id);
        id
    }

    /// Attach `entry` under the directory `parent`.
    ///
    /// Children are reachable through their parent and are not put on the worklist.
    pub fn add_child(
        &mut self,
        parent: EntryId,
        entry: StorageDataEntry,
    ) -> Result<EntryId, CoreError> {
        let parent_entry = &self.entries[parent.0];
        if !parent_entry.is_directory() {
            return Err(CoreError::NotADirectory(parent_entry.name.clone()));
        }
        let id = self.insert(entry, Some(parent));
        self.entries[parent.0].children.push(id);
        Ok(id)
    }

    /// Put an existing node on the worklist.
    pub fn enqueue(&mut self, id: EntryId) {
        self.queue.push_back(id);
    }

    fn insert(&mut self, mut entry: StorageDataEntry, parent: Option<EntryId>) -> EntryId {
        let id = EntryId(self.entries.len());
        entry.parent = parent;
        entry.children.clear();
        self.entries.push(entry);
        id
    }

    /// Access a node.
    pub fn entry(&self, id: EntryId) -> &StorageDataEntry {
        &self.entries[id.0]
    }

    /// First node on the worklist.
    pub fn peek(&self) -> Option<&StorageDataEntry> {
        self.queue.front().map(|id| self.entry(*id))
    }

    /// Remove and return the first handle on the worklist.
    pub fn poll(&mut self) -> Option<EntryId> {
        self.queue.pop_front()
    }

    /// Returns true if the worklist is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of handles on the worklist.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.entries.len()
    }

    /// Root-first `/`-joined chain of storage-id segments ending at `id`.
    pub fn absolute_path(&self, id: EntryId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let entry = self.entry(node);
            segments.push(entry.storage_id.as_str());
            current = entry.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    /// Top-most ancestor of `id`.
    pub fn root_of(&self, id: EntryId) -> EntryId {
        let mut current = id;
        while let Some(parent) = self.entry(current).parent {
            current = parent;
        }
        current
    }

    /// Every node of every tree touched by the worklist, exactly once, level by
    /// level. Trees are taken in worklist (FIFO) order and a parent always comes
    /// before its children, whatever order the worklist itself is in.
    pub fn level_order(&self) -> Vec<EntryId> {
        let mut roots = Vec::new();
        for id in &self.queue {
            let root = self.root_of(*id);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        let mut visited = HashSet::new();
        let mut pending: VecDeque<EntryId> = roots.into_iter().collect();
        let mut order = Vec::with_capacity(self.entries.len());
        while let Some(id) = pending.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            pending.extend(self.entry(id).children.iter().copied());
        }
        order
    }
}
