//! In-memory filesystem backend.
//!
//! The tree lives in a slab arena addressed by stable node ids, with the
//! root directory at index 0. A [`FileSystem`] is a cheap clone over the
//! shared storage: every handle constructed from the same instance observes
//! the same tree, and mutations through one handle are visible through all
//! others immediately. All data is ephemeral.

mod node;
mod resolve;

pub use node::{Directory, File, Files, Link, NodeHandle};

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use slab::Slab;

use crate::Pathname;

pub(crate) type NodeId = usize;
pub(crate) const ROOT_ID: NodeId = 0;

/// Scheme-prefixed root of every in-memory tree.
pub const ROOT: &str = "vfs://";

/// Per-node permission bits; both default to permitted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Perms {
    pub readable: bool,
    pub writable: bool,
}

impl Default for Perms {
    fn default() -> Self {
        Self {
            readable: true,
            writable: true,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DirectoryNode {
    pub name: String,
    pub children: Vec<NodeId>,
    pub perms: Perms,
}

#[derive(Debug)]
pub(crate) struct FileNode {
    pub name: String,
    pub data: Vec<u8>,
    pub perms: Perms,
}

#[derive(Debug)]
pub(crate) struct LinkNode {
    pub name: String,
    /// Absolute target path. Deliberately a weak relation: the string is
    /// re-resolved on every access, never a cached node reference.
    pub target: String,
    pub perms: Perms,
}

#[derive(Debug)]
pub(crate) enum TreeNode {
    Directory(DirectoryNode),
    File(FileNode),
    Link(LinkNode),
}

impl TreeNode {
    pub(crate) fn name(&self) -> &str {
        match self {
            TreeNode::Directory(DirectoryNode { name, .. }) => name,
            TreeNode::File(FileNode { name, .. }) => name,
            TreeNode::Link(LinkNode { name, .. }) => name,
        }
    }

    pub(crate) fn set_name(&mut self, new_name: String) {
        match self {
            TreeNode::Directory(DirectoryNode { name, .. }) => *name = new_name,
            TreeNode::File(FileNode { name, .. }) => *name = new_name,
            TreeNode::Link(LinkNode { name, .. }) => *name = new_name,
        }
    }

    pub(crate) fn perms(&self) -> Perms {
        match self {
            TreeNode::Directory(DirectoryNode { perms, .. }) => *perms,
            TreeNode::File(FileNode { perms, .. }) => *perms,
            TreeNode::Link(LinkNode { perms, .. }) => *perms,
        }
    }

    pub(crate) fn perms_mut(&mut self) -> &mut Perms {
        match self {
            TreeNode::Directory(DirectoryNode { perms, .. }) => perms,
            TreeNode::File(FileNode { perms, .. }) => perms,
            TreeNode::Link(LinkNode { perms, .. }) => perms,
        }
    }

}

/// The tree storage. Node ids are slab keys and stay valid until the node is
/// removed; they never leave the enclosing lock.
pub(crate) struct TreeInner {
    pub(crate) storage: Slab<TreeNode>,
}

impl TreeInner {
    fn new() -> Self {
        let mut storage = Slab::new();
        let root = storage.insert(TreeNode::Directory(DirectoryNode {
            name: String::new(),
            children: Vec::new(),
            perms: Perms::default(),
        }));
        debug_assert_eq!(root, ROOT_ID);
        Self { storage }
    }

    pub(crate) fn node(&self, id: NodeId) -> &TreeNode {
        &self.storage[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.storage[id]
    }

    /// Look a child up by name in a directory node.
    pub(crate) fn child_of(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        match self.storage.get(dir) {
            Some(TreeNode::Directory(DirectoryNode { children, .. })) => children
                .iter()
                .copied()
                .find(|id| self.storage.get(*id).is_some_and(|n| n.name() == name)),
            _ => None,
        }
    }

    /// Insert a new node and attach it to `dir`. The caller ensures the name
    /// is not already taken.
    pub(crate) fn insert_child(&mut self, dir: NodeId, node: TreeNode) -> NodeId {
        let id = self.storage.insert(node);
        self.attach(dir, id);
        id
    }

    pub(crate) fn attach(&mut self, dir: NodeId, child: NodeId) {
        if let TreeNode::Directory(DirectoryNode { children, .. }) = &mut self.storage[dir] {
            children.push(child);
        }
    }

    pub(crate) fn detach(&mut self, dir: NodeId, child: NodeId) {
        if let TreeNode::Directory(DirectoryNode { children, .. }) = &mut self.storage[dir] {
            children.retain(|id| *id != child);
        }
    }

    /// Remove a node and, recursively, everything below it.
    pub(crate) fn remove_tree(&mut self, id: NodeId) {
        let children = match self.storage.get(id) {
            Some(TreeNode::Directory(DirectoryNode { children, .. })) => children.clone(),
            Some(_) => Vec::new(),
            None => return,
        };
        for child in children {
            self.remove_tree(child);
        }
        self.storage.remove(id);
    }

    /// Whether `inner` lives inside the subtree rooted at `id`.
    pub(crate) fn subtree_contains(&self, id: NodeId, inner: NodeId) -> bool {
        if id == inner {
            return true;
        }
        match self.storage.get(id) {
            Some(TreeNode::Directory(DirectoryNode { children, .. })) => children
                .iter()
                .any(|child| self.subtree_contains(*child, inner)),
            _ => false,
        }
    }
}

/// The in-memory filesystem.
///
/// Cloning is cheap and aliases the same tree. Forward-slash paths behind a
/// `vfs://` root, independent of the host OS.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<RwLock<TreeInner>>,
    root_path: Pathname,
}

impl FileSystem {
    /// Create a new filesystem holding only the root directory.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TreeInner::new())),
            root_path: Pathname::root(ROOT, '/'),
        }
    }

    /// Handle on the root directory.
    pub fn root(&self) -> Directory {
        Directory::new(self.clone(), self.root_path.clone())
    }

    pub(crate) fn root_path(&self) -> &Pathname {
        &self.root_path
    }

    /// Whether `other` aliases the same tree.
    pub(crate) fn same_instance(&self, other: &FileSystem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // A poisoned lock still holds a structurally valid tree, so recover the
    // guard instead of propagating the poison.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, TreeInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, TreeInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.read();

        writeln!(formatter, "\n{id:<6}  {kind:<4}  name", id = "id", kind = "kind")?;

        fn dump(
            tree: &TreeInner,
            id: NodeId,
            formatter: &mut fmt::Formatter<'_>,
            indentation: usize,
        ) -> fmt::Result {
            let Some(node) = tree.storage.get(id) else {
                return Ok(());
            };
            writeln!(
                formatter,
                "{id:<6}  {kind:<4}  {pad:width$}{name}",
                kind = match node {
                    TreeNode::Directory(_) => "dir",
                    TreeNode::File(_) => "file",
                    TreeNode::Link(_) => "link",
                },
                pad = "",
                width = indentation * 2,
                name = if node.name().is_empty() {
                    "/"
                } else {
                    node.name()
                },
            )?;
            if let TreeNode::Directory(DirectoryNode { children, .. }) = node {
                for child in children {
                    dump(tree, *child, formatter, indentation + 1)?;
                }
            }
            Ok(())
        }

        dump(&tree, ROOT_ID, formatter, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tree_holds_only_the_root() {
        let fs = FileSystem::new();
        let tree = fs.read();
        assert_eq!(tree.storage.len(), 1);
        assert!(matches!(tree.node(ROOT_ID), TreeNode::Directory(_)));
        assert_eq!(tree.node(ROOT_ID).name(), "");
    }

    #[test]
    fn test_child_lookup_by_name() {
        let fs = FileSystem::new();
        let mut tree = fs.write();
        let id = tree.insert_child(
            ROOT_ID,
            TreeNode::File(FileNode {
                name: "a.txt".into(),
                data: Vec::new(),
                perms: Perms::default(),
            }),
        );
        assert_eq!(tree.child_of(ROOT_ID, "a.txt"), Some(id));
        assert_eq!(tree.child_of(ROOT_ID, "b.txt"), None);
    }

    #[test]
    fn test_remove_tree_is_recursive() {
        let fs = FileSystem::new();
        let mut tree = fs.write();
        let dir = tree.insert_child(
            ROOT_ID,
            TreeNode::Directory(DirectoryNode {
                name: "dir".into(),
                children: Vec::new(),
                perms: Perms::default(),
            }),
        );
        let file = tree.insert_child(
            dir,
            TreeNode::File(FileNode {
                name: "f".into(),
                data: Vec::new(),
                perms: Perms::default(),
            }),
        );
        tree.detach(ROOT_ID, dir);
        tree.remove_tree(dir);
        assert!(tree.storage.get(dir).is_none());
        assert!(tree.storage.get(file).is_none());
    }

    #[test]
    fn test_clones_alias_the_same_tree() {
        let fs = FileSystem::new();
        let other = fs.clone();
        assert!(fs.same_instance(&other));
        assert!(!fs.same_instance(&FileSystem::new()));
    }
}
