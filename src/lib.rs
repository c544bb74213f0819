//! Uniform node abstraction over interchangeable filesystem backends.
//!
//! This crate models files, directories and symbolic links as *nodes*
//! addressed by relative name below a backend root. Two backends implement
//! the same contract:
//!
//! - [`host_fs::FileSystem`] — the real operating-system filesystem, rooted
//!   at an existing directory;
//! - [`mem_fs::FileSystem`] — a purely in-memory tree behind a `vfs://` root,
//!   for deterministic tests.
//!
//! Resolution happens lazily on every call: a handle stores only the
//! [`Pathname`] that produced it, so two handles over the same tree observe
//! each other's mutations immediately, and symbolic links are re-resolved on
//! each access. Operations that read or mutate first pass through validation
//! ([`Node::validate`]), which classifies failures precisely — syntactically
//! invalid name, missing node, wrong node kind, unreachable path, denied
//! permission — instead of surfacing raw backend errors.
//!
//! ```
//! use virtual_nodes::{mem_fs, Node};
//!
//! # fn main() -> virtual_nodes::Result<()> {
//! let fs = mem_fs::FileSystem::new();
//! let root = fs.root();
//!
//! // Writing creates intermediate directories on demand.
//! root.file("notes/todo.txt")?.write(b"tea")?;
//!
//! let file = root.file("notes/todo.txt")?;
//! assert!(file.exists());
//! assert_eq!(file.contents()?, b"tea");
//! # Ok(())
//! # }
//! ```

use std::fmt;

mod access;
mod error;
mod path;

pub mod host_fs;
pub mod mem_fs;

pub use access::Access;
pub use error::{DeniedAccess, FsError, InvalidNameKind, Result};
pub use path::Pathname;

pub(crate) use access::{check_access, ProbeData, Reachability};

/// Kind of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Link,
}

impl NodeKind {
    /// Returns true for a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    /// Returns true for a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    /// Returns true for a symbolic link.
    pub fn is_link(&self) -> bool {
        matches!(self, NodeKind::Link)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Directory => write!(f, "directory"),
            NodeKind::Link => write!(f, "symbolic link"),
        }
    }
}

/// Capability contract shared by every node handle of every backend.
///
/// The query methods never fail; they answer `false` for nodes that cannot
/// be reached. [`validate`](Node::validate) is the gate every reading or
/// mutating operation passes through first.
pub trait Node {
    /// The absolute path of this node.
    fn pathname(&self) -> &Pathname;

    /// The relative name below the backend root; empty for the root itself.
    fn name(&self) -> &str;

    /// The fully link-resolved absolute path this node denotes right now.
    /// Differs from [`pathname`](Node::pathname) only when symbolic links
    /// were followed; `None` when the path is currently unreachable.
    fn real_path(&self) -> Option<String>;

    /// Whether the node exists as the kind this handle expects.
    fn exists(&self) -> bool;

    /// Whether the node — or, when missing, its closest existing ancestor
    /// directory — is readable.
    fn is_readable(&self) -> bool;

    /// Whether the node — or, when missing, its closest existing ancestor
    /// directory — is writable.
    fn is_writable(&self) -> bool;

    /// Whether the node could be removed: never true for the root, otherwise
    /// requires a writable parent directory.
    fn is_removable(&self) -> bool;

    /// Check the requested access, classifying the first failure.
    fn validate(&self, access: Access) -> Result<()>;

    /// Remove the node. Removing a node that does not exist is a no-op;
    /// anything else validates [`Access::remove`] first. Directories are
    /// removed recursively; a link path removes the link itself, never its
    /// target.
    fn remove(&self) -> Result<()>;
}
