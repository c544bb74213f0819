//! Node handles over the in-memory tree.
//!
//! A handle stores only the filesystem and the [`Pathname`] that produced
//! it; every operation re-resolves the path at call time. Handles therefore
//! never go stale: after any mutation the next call simply observes the
//! current tree.

use std::io::Read;

use tracing::{debug, trace};

use super::resolve::{resolve, LinkTarget, Located, Resolved};
use super::{
    DirectoryNode, FileNode, FileSystem, LinkNode, NodeId, Perms, TreeInner, TreeNode,
};
use crate::error::{FsError, Result};
use crate::{check_access, Access, NodeKind, Pathname, ProbeData, Reachability};

/// Handle-level view of any in-memory node, used where a node of either kind
/// is accepted as an argument (link targets).
pub trait NodeHandle: crate::Node {
    /// The filesystem this handle belongs to.
    fn filesystem(&self) -> &FileSystem;

    /// The node kind this handle addresses.
    fn kind(&self) -> NodeKind;
}

/// A file below an in-memory root.
#[derive(Clone)]
pub struct File {
    fs: FileSystem,
    path: Pathname,
}

/// A directory below (or at) an in-memory root.
#[derive(Clone, Debug)]
pub struct Directory {
    fs: FileSystem,
    path: Pathname,
}

/// A symbolic link below an in-memory root.
#[derive(Clone)]
pub struct Link {
    fs: FileSystem,
    path: Pathname,
}

// ---------------------------------------------------------------------------
// Resolution plumbing shared by all handle kinds.

/// Re-root a handle path below the tree root and resolve it.
fn resolve_handle(tree: &TreeInner, fs: &FileSystem, path: &Pathname) -> Result<Resolved> {
    let rel = fs.root_path().as_root_for(path.absolute())?;
    Ok(resolve(tree, fs.root_path(), &rel))
}

/// The resolved identity of a path: the node it ultimately denotes, with
/// link chains followed. Used for self-reference detection.
fn resolved_identity(located: &Located) -> Option<NodeId> {
    match located {
        Located::Directory(id) | Located::File(id) => Some(*id),
        Located::Link { target, .. } => match target {
            LinkTarget::Directory(id) | LinkTarget::File(id) => Some(*id),
            LinkTarget::Missing { .. } | LinkTarget::Invalid => None,
        },
        Located::Missing { .. } | Located::Invalid { .. } => None,
    }
}

/// The base entry at a path as `(owning directory, node)`: the entry itself,
/// links *not* followed. This is what a move detaches, so moving a link
/// moves the link.
fn base_entry(tree: &TreeInner, resolved: &Resolved) -> Option<(NodeId, NodeId)> {
    let (dir, name) = resolved.parent.as_ref()?;
    tree.child_of(*dir, name).map(|child| (*dir, child))
}

fn build_probe(
    tree: &TreeInner,
    path: &Pathname,
    expected: NodeKind,
    resolved: &Resolved,
) -> ProbeData {
    let no_perms = Perms {
        readable: false,
        writable: false,
    };

    let mut present = None;
    let mut exists = false;
    let mut reach = Reachability::Reachable;

    // Permissions of the effective node: the resolved node itself, or the
    // closest existing ancestor directory when the node is missing.
    let perms = match &resolved.located {
        Located::Directory(id) => {
            present = Some(NodeKind::Directory);
            exists = expected.is_dir();
            tree.node(*id).perms()
        }
        Located::File(id) => {
            present = Some(NodeKind::File);
            exists = expected.is_file();
            tree.node(*id).perms()
        }
        Located::Link { link, target } => {
            if expected.is_link() {
                present = Some(NodeKind::Link);
                exists = true;
                tree.node(*link).perms()
            } else {
                match target {
                    LinkTarget::Directory(id) => {
                        present = Some(NodeKind::Directory);
                        exists = expected.is_dir();
                        tree.node(*id).perms()
                    }
                    LinkTarget::File(id) => {
                        present = Some(NodeKind::File);
                        exists = expected.is_file();
                        tree.node(*id).perms()
                    }
                    LinkTarget::Missing { dir, .. } => tree.node(*dir).perms(),
                    LinkTarget::Invalid => {
                        reach = Reachability::BadLink;
                        no_perms
                    }
                }
            }
        }
        Located::Missing { dir, .. } => tree.node(*dir).perms(),
        Located::Invalid { collision, .. } => {
            reach = if *collision {
                Reachability::LeafCollision
            } else {
                Reachability::BadLink
            };
            no_perms
        }
    };

    let parent_writable = match (&resolved.parent, &resolved.located) {
        (Some((dir, _)), _) => tree.node(*dir).perms().writable,
        (None, Located::Missing { dir, segments }) if segments.len() == 1 => {
            tree.node(*dir).perms().writable
        }
        _ => false,
    };

    ProbeData {
        path: path.absolute().to_string(),
        expected,
        exists,
        present,
        reach,
        readable: perms.readable,
        writable: perms.writable,
        root: path.is_root(),
        parent_writable,
    }
}

fn validate_at(fs: &FileSystem, path: &Pathname, expected: NodeKind, access: Access) -> Result<()> {
    let tree = fs.read();
    let resolved = resolve_handle(&tree, fs, path)?;
    check_access(&build_probe(&tree, path, expected, &resolved), access)
}

fn real_path_at(fs: &FileSystem, path: &Pathname) -> Option<String> {
    let tree = fs.read();
    resolve_handle(&tree, fs, path).ok()?.real_path
}

fn probe_flag(
    fs: &FileSystem,
    path: &Pathname,
    expected: NodeKind,
    flag: impl FnOnce(&ProbeData) -> bool,
) -> bool {
    let tree = fs.read();
    match resolve_handle(&tree, fs, path) {
        Ok(resolved) => flag(&build_probe(&tree, path, expected, &resolved)),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Shared mutation helpers.

/// Create one directory node per segment below `dir`, returning the last.
fn materialize_dirs(tree: &mut TreeInner, dir: NodeId, segments: &[String]) -> NodeId {
    let mut current = dir;
    for segment in segments {
        current = tree.insert_child(
            current,
            TreeNode::Directory(DirectoryNode {
                name: segment.clone(),
                children: Vec::new(),
                perms: Perms::default(),
            }),
        );
    }
    current
}

fn remove_at(fs: &FileSystem, path: &Pathname, expected: NodeKind) -> Result<()> {
    let mut tree = fs.write();
    let resolved = resolve_handle(&tree, fs, path)?;

    // Removing a node that is not there is a no-op.
    if matches!(resolved.located, Located::Missing { .. }) {
        return Ok(());
    }

    check_access(
        &build_probe(&tree, path, expected, &resolved),
        Access::remove(),
    )?;

    if let Some((dir, name)) = resolved.parent {
        if let Some(child) = tree.child_of(dir, &name) {
            tree.detach(dir, child);
            tree.remove_tree(child);
            debug!(path = path.absolute(), "removed node");
        }
    }
    Ok(())
}

fn set_perm(
    fs: &FileSystem,
    path: &Pathname,
    expected: NodeKind,
    apply: impl FnOnce(&mut Perms),
) -> Result<()> {
    let mut tree = fs.write();
    let resolved = resolve_handle(&tree, fs, path)?;
    check_access(
        &build_probe(&tree, path, expected, &resolved),
        Access::exists(),
    )?;

    let id = match &resolved.located {
        Located::Directory(id) | Located::File(id) => *id,
        Located::Link { link, target } => {
            if expected.is_link() {
                *link
            } else {
                match target {
                    LinkTarget::Directory(id) | LinkTarget::File(id) => *id,
                    _ => return Err(FsError::not_found(path.absolute())),
                }
            }
        }
        _ => return Err(FsError::not_found(path.absolute())),
    };
    apply(tree.node_mut(id).perms_mut());
    Ok(())
}

/// Move the base node at `src` below `dest_dir`, under `name` (or the
/// source's own leaf name).
///
/// A destination resolving to the same underlying node as the source is a
/// silent no-op. An existing destination entry is otherwise discarded; when
/// the destination is a link aliasing a different node, the link itself is
/// replaced.
fn move_node(
    fs: &FileSystem,
    src: &Pathname,
    expected: NodeKind,
    dest_dir: &Directory,
    name: Option<&str>,
) -> Result<Pathname> {
    if !fs.same_instance(&dest_dir.fs) {
        return Err(FsError::foreign(dest_dir.path.absolute()));
    }

    let leaf = match name {
        Some(name) => name.to_string(),
        None => src.leaf().to_string(),
    };
    let dest_path = dest_dir.path.for_child(&leaf)?;

    let mut tree = fs.write();
    let src_res = resolve_handle(&tree, fs, src)?;
    let dest_res = resolve_handle(&tree, fs, &dest_path)?;

    // Self-reference: identical resolved targets make the move a no-op,
    // whatever relative spelling or link indirection produced them.
    let src_id = resolved_identity(&src_res.located);
    if src_id.is_some() && src_id == resolved_identity(&dest_res.located) {
        trace!(
            from = src.absolute(),
            to = dest_path.absolute(),
            "self-referential move ignored"
        );
        return Ok(dest_path);
    }

    check_access(
        &build_probe(&tree, src, expected, &src_res),
        Access::exists() | Access::remove(),
    )?;
    let dest_dir_res = resolve_handle(&tree, fs, &dest_dir.path)?;
    check_access(
        &build_probe(&tree, &dest_dir.path, NodeKind::Directory, &dest_dir_res),
        Access::exists() | Access::write(),
    )?;

    let Some((src_parent, base)) = base_entry(&tree, &src_res) else {
        return Err(FsError::not_found(src.absolute()));
    };

    let (dest_parent, discarded) = match dest_res.located {
        Located::Missing { dir, segments } => {
            let parent = materialize_dirs(&mut tree, dir, &segments[..segments.len() - 1]);
            (parent, None)
        }
        Located::Directory(_) | Located::File(_) | Located::Link { .. } => {
            let Some((dir, child_name)) = dest_res.parent else {
                return Err(FsError::CannotRemoveRoot {
                    path: dest_path.absolute().to_string(),
                });
            };
            let existing = tree.child_of(dir, &child_name);
            (dir, existing)
        }
        Located::Invalid { collision, .. } => {
            return Err(if collision {
                FsError::leaf_node(dest_path.absolute())
            } else {
                FsError::unreachable(dest_path.absolute())
            });
        }
    };

    // The destination entry *is* the source (same spelling of the same
    // slot): nothing to do.
    if discarded == Some(base) {
        return Ok(dest_path);
    }

    // A directory cannot be moved below itself.
    if tree.subtree_contains(base, dest_parent) {
        return Err(FsError::unreachable(dest_path.absolute()));
    }

    tree.detach(src_parent, base);
    if let Some(old) = discarded {
        tree.detach(dest_parent, old);
        tree.remove_tree(old);
    }
    tree.node_mut(base).set_name(leaf);
    tree.attach(dest_parent, base);
    debug!(
        from = src.absolute(),
        to = dest_path.absolute(),
        "moved node"
    );
    Ok(dest_path)
}

// ---------------------------------------------------------------------------
// File

impl File {
    pub(crate) fn new(fs: FileSystem, path: Pathname) -> Self {
        Self { fs, path }
    }

    /// Validate and return the handle, for call chaining.
    pub fn validated(self, access: Access) -> Result<Self> {
        crate::Node::validate(&self, access)?;
        Ok(self)
    }

    /// The file's contents; empty when the file does not exist yet.
    pub fn contents(&self) -> Result<Vec<u8>> {
        let tree = self.fs.read();
        let resolved = resolve_handle(&tree, &self.fs, &self.path)?;
        check_access(
            &build_probe(&tree, &self.path, NodeKind::File, &resolved),
            Access::read(),
        )?;
        match resolved.located {
            Located::File(id)
            | Located::Link {
                target: LinkTarget::File(id),
                ..
            } => match tree.node(id) {
                TreeNode::File(FileNode { data, .. }) => Ok(data.clone()),
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }

    /// Replace the file's contents, creating the file — and any missing
    /// intermediate directories — on first write.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.put(data, false)
    }

    /// Append to the file, creating it like [`write`](File::write) when
    /// absent.
    pub fn append(&self, data: &[u8]) -> Result<()> {
        self.put(data, true)
    }

    fn put(&self, data: &[u8], append: bool) -> Result<()> {
        let mut tree = self.fs.write();
        let resolved = resolve_handle(&tree, &self.fs, &self.path)?;
        check_access(
            &build_probe(&tree, &self.path, NodeKind::File, &resolved),
            Access::write(),
        )?;
        match resolved.located {
            Located::File(id)
            | Located::Link {
                target: LinkTarget::File(id),
                ..
            } => {
                if let TreeNode::File(FileNode { data: buffer, .. }) = tree.node_mut(id) {
                    if append {
                        buffer.extend_from_slice(data);
                    } else {
                        *buffer = data.to_vec();
                    }
                }
            }
            Located::Missing { dir, segments }
            | Located::Link {
                target: LinkTarget::Missing { dir, segments },
                ..
            } => {
                let parent = materialize_dirs(&mut tree, dir, &segments[..segments.len() - 1]);
                let name = segments[segments.len() - 1].clone();
                tree.insert_child(
                    parent,
                    TreeNode::File(FileNode {
                        name,
                        data: data.to_vec(),
                        perms: Perms::default(),
                    }),
                );
            }
            _ => unreachable!("validation rejects every other shape"),
        }
        debug!(path = self.path.absolute(), len = data.len(), "wrote file");
        Ok(())
    }

    /// Copy this file's contents into `other`.
    ///
    /// Copying a file onto itself — including through a symlink alias — is a
    /// silent no-op.
    pub fn copy(&self, other: &File) -> Result<()> {
        if !self.fs.same_instance(&other.fs) {
            return Err(FsError::foreign(other.path.absolute()));
        }
        {
            let tree = self.fs.read();
            let a = resolve_handle(&tree, &self.fs, &self.path)?;
            let b = resolve_handle(&tree, &self.fs, &other.path)?;
            let identity = resolved_identity(&a.located);
            if identity.is_some() && identity == resolved_identity(&b.located) {
                trace!(path = self.path.absolute(), "self-referential copy ignored");
                return Ok(());
            }
        }
        let data = self.contents()?;
        other.write(&data)
    }

    /// Move this file below `dest`, optionally renaming it.
    pub fn move_to(&self, dest: &Directory, name: Option<&str>) -> Result<File> {
        let path = move_node(&self.fs, &self.path, NodeKind::File, dest, name)?;
        Ok(File::new(self.fs.clone(), path))
    }

    /// A streaming handle on the contents. The in-memory backend has none;
    /// callers fall back to [`contents`](File::contents).
    pub fn content_stream(&self) -> Result<Option<Box<dyn Read>>> {
        Ok(None)
    }

    /// Toggle the readable bit; the node must exist.
    pub fn set_readable(&self, readable: bool) -> Result<()> {
        set_perm(&self.fs, &self.path, NodeKind::File, |perms| {
            perms.readable = readable;
        })
    }

    /// Toggle the writable bit; the node must exist.
    pub fn set_writable(&self, writable: bool) -> Result<()> {
        set_perm(&self.fs, &self.path, NodeKind::File, |perms| {
            perms.writable = writable;
        })
    }
}

impl crate::Node for File {
    fn pathname(&self) -> &Pathname {
        &self.path
    }
    fn name(&self) -> &str {
        self.path.relative()
    }
    fn real_path(&self) -> Option<String> {
        real_path_at(&self.fs, &self.path)
    }
    fn exists(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::File, |p| p.exists)
    }
    fn is_readable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::File, |p| p.readable)
    }
    fn is_writable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::File, |p| p.writable)
    }
    fn is_removable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::File, |p| {
            !p.root && p.parent_writable
        })
    }
    fn validate(&self, access: Access) -> Result<()> {
        validate_at(&self.fs, &self.path, NodeKind::File, access)
    }
    fn remove(&self) -> Result<()> {
        remove_at(&self.fs, &self.path, NodeKind::File)
    }
}

impl NodeHandle for File {
    fn filesystem(&self) -> &FileSystem {
        &self.fs
    }
    fn kind(&self) -> NodeKind {
        NodeKind::File
    }
}

// ---------------------------------------------------------------------------
// Directory

impl Directory {
    pub(crate) fn new(fs: FileSystem, path: Pathname) -> Self {
        Self { fs, path }
    }

    /// Validate and return the handle, for call chaining.
    pub fn validated(self, access: Access) -> Result<Self> {
        crate::Node::validate(&self, access)?;
        Ok(self)
    }

    /// Handle on a file below this directory. `name` may span several
    /// segments.
    pub fn file(&self, name: &str) -> Result<File> {
        Ok(File::new(self.fs.clone(), self.path.for_child(name)?))
    }

    /// Handle on a subdirectory.
    pub fn subdirectory(&self, name: &str) -> Result<Directory> {
        Ok(Directory::new(self.fs.clone(), self.path.for_child(name)?))
    }

    /// Handle on a symbolic link below this directory.
    pub fn link(&self, name: &str) -> Result<Link> {
        Ok(Link::new(self.fs.clone(), self.path.for_child(name)?))
    }

    /// The files currently below this directory, as a restartable sequence:
    /// every fresh iteration re-lists the directory.
    pub fn files(&self) -> Result<Files> {
        crate::Node::validate(self, Access::exists() | Access::read())?;
        Ok(Files {
            fs: self.fs.clone(),
            path: self.path.clone(),
        })
    }

    /// Materialize this directory (and missing intermediates). Creating a
    /// directory that already exists is a no-op.
    pub fn create(&self) -> Result<Directory> {
        let mut tree = self.fs.write();
        let resolved = resolve_handle(&tree, &self.fs, &self.path)?;
        check_access(
            &build_probe(&tree, &self.path, NodeKind::Directory, &resolved),
            Access::write(),
        )?;
        match resolved.located {
            Located::Directory(_)
            | Located::Link {
                target: LinkTarget::Directory(_),
                ..
            } => {}
            Located::Missing { dir, segments }
            | Located::Link {
                target: LinkTarget::Missing { dir, segments },
                ..
            } => {
                materialize_dirs(&mut tree, dir, &segments);
                debug!(path = self.path.absolute(), "created directory");
            }
            _ => unreachable!("validation rejects every other shape"),
        }
        Ok(self.clone())
    }

    /// Reinterpret this directory as a root: the returned handle has an
    /// empty relative path over the same tree. Fails when the directory does
    /// not exist.
    pub fn as_root(&self) -> Result<Directory> {
        if !crate::Node::exists(self) {
            return Err(FsError::root_not_found(self.path.absolute()));
        }
        Ok(Directory::new(self.fs.clone(), self.path.as_root()))
    }

    /// Move this directory below `dest`, optionally renaming it.
    pub fn move_to(&self, dest: &Directory, name: Option<&str>) -> Result<Directory> {
        let path = move_node(&self.fs, &self.path, NodeKind::Directory, dest, name)?;
        Ok(Directory::new(self.fs.clone(), path))
    }

    /// Toggle the readable bit; the node must exist.
    pub fn set_readable(&self, readable: bool) -> Result<()> {
        set_perm(&self.fs, &self.path, NodeKind::Directory, |perms| {
            perms.readable = readable;
        })
    }

    /// Toggle the writable bit; the node must exist.
    pub fn set_writable(&self, writable: bool) -> Result<()> {
        set_perm(&self.fs, &self.path, NodeKind::Directory, |perms| {
            perms.writable = writable;
        })
    }
}

impl crate::Node for Directory {
    fn pathname(&self) -> &Pathname {
        &self.path
    }
    fn name(&self) -> &str {
        self.path.relative()
    }
    fn real_path(&self) -> Option<String> {
        real_path_at(&self.fs, &self.path)
    }
    fn exists(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Directory, |p| p.exists)
    }
    fn is_readable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Directory, |p| p.readable)
    }
    fn is_writable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Directory, |p| p.writable)
    }
    fn is_removable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Directory, |p| {
            !p.root && p.parent_writable
        })
    }
    fn validate(&self, access: Access) -> Result<()> {
        validate_at(&self.fs, &self.path, NodeKind::Directory, access)
    }
    fn remove(&self) -> Result<()> {
        remove_at(&self.fs, &self.path, NodeKind::Directory)
    }
}

impl NodeHandle for Directory {
    fn filesystem(&self) -> &FileSystem {
        &self.fs
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Directory
    }
}

// ---------------------------------------------------------------------------
// Files sequence

/// The files below a directory.
///
/// The sequence is restartable: each call to [`iter`](Files::iter) (or each
/// `IntoIterator` pass) re-lists the directory, so iteration after a
/// mutation sees the current contents. Links are included when their chain
/// resolves to a file.
#[derive(Clone)]
pub struct Files {
    fs: FileSystem,
    path: Pathname,
}

impl Files {
    fn list(&self) -> Vec<File> {
        let tree = self.fs.read();
        let Ok(resolved) = resolve_handle(&tree, &self.fs, &self.path) else {
            return Vec::new();
        };
        let dir = match resolved.located {
            Located::Directory(id)
            | Located::Link {
                target: LinkTarget::Directory(id),
                ..
            } => id,
            _ => return Vec::new(),
        };
        let TreeNode::Directory(DirectoryNode { children, .. }) = tree.node(dir) else {
            return Vec::new();
        };

        let mut names: Vec<String> = children
            .iter()
            .filter_map(|id| match tree.node(*id) {
                TreeNode::File(FileNode { name, .. }) => Some(name.clone()),
                TreeNode::Link(LinkNode { name, .. }) => {
                    let rel = self.fs.root_path().as_root_for(self.path.absolute()).ok()?;
                    let link_path = rel.for_child(name).ok()?;
                    match resolve(&tree, self.fs.root_path(), &link_path).located {
                        Located::Link {
                            target: LinkTarget::File(_),
                            ..
                        } => Some(name.clone()),
                        _ => None,
                    }
                }
                TreeNode::Directory(_) => None,
            })
            .collect();
        names.sort();

        names
            .into_iter()
            .filter_map(|name| self.path.for_child(&name).ok())
            .map(|path| File::new(self.fs.clone(), path))
            .collect()
    }

    /// Iterate the files as of now.
    pub fn iter(&self) -> std::vec::IntoIter<File> {
        self.list().into_iter()
    }

    /// The file names as of now, sorted.
    pub fn names(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .map(|file| file.path.leaf().to_string())
            .collect()
    }
}

impl IntoIterator for &Files {
    type Item = File;
    type IntoIter = std::vec::IntoIter<File>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Link

impl Link {
    pub(crate) fn new(fs: FileSystem, path: Pathname) -> Self {
        Self { fs, path }
    }

    /// Validate and return the handle, for call chaining.
    pub fn validated(self, access: Access) -> Result<Self> {
        crate::Node::validate(&self, access)?;
        Ok(self)
    }

    /// The stored target path.
    ///
    /// `None` when the link does not exist — or when its target chain no
    /// longer resolves, unless `show_removed` asks for the stale target.
    pub fn target(&self, show_removed: bool) -> Option<String> {
        let tree = self.fs.read();
        let resolved = resolve_handle(&tree, &self.fs, &self.path).ok()?;
        match resolved.located {
            Located::Link { link, target } => {
                let TreeNode::Link(LinkNode { target: stored, .. }) = tree.node(link) else {
                    return None;
                };
                let stored = stored.clone();
                match target {
                    LinkTarget::File(_) | LinkTarget::Directory(_) => Some(stored),
                    LinkTarget::Missing { .. } | LinkTarget::Invalid => {
                        show_removed.then_some(stored)
                    }
                }
            }
            _ => None,
        }
    }

    /// Point this link at `node`, creating the link if it does not exist or
    /// replacing the target of an existing one.
    ///
    /// Fails when `node` does not exist, belongs to a different filesystem
    /// instance, is itself a link, or mismatches the kind an existing link
    /// resolves to.
    pub fn set_target<N: NodeHandle>(&self, node: &N) -> Result<()> {
        if !self.fs.same_instance(node.filesystem()) {
            return Err(FsError::foreign(node.pathname().absolute()));
        }
        if node.kind().is_link() {
            return Err(FsError::unexpected_type(
                node.pathname().absolute(),
                self.resolved_kind().unwrap_or(NodeKind::File),
            ));
        }
        if !node.exists() {
            return Err(FsError::not_found(node.pathname().absolute()));
        }
        if let Some(kind) = self.resolved_kind() {
            if kind != node.kind() {
                return Err(FsError::unexpected_type(node.pathname().absolute(), kind));
            }
        }
        self.set_target_path(node.pathname().absolute())
    }

    /// Point this link at an absolute path below the same root, without
    /// checking that the target exists. Dangling and cyclic targets are
    /// representable on purpose.
    pub fn set_target_path(&self, target: &str) -> Result<()> {
        self.fs.root_path().as_root_for(target)?;

        let mut tree = self.fs.write();
        let resolved = resolve_handle(&tree, &self.fs, &self.path)?;
        check_access(
            &build_probe(&tree, &self.path, NodeKind::Link, &resolved),
            Access::write(),
        )?;
        match resolved.located {
            Located::Link { link, .. } => {
                if let TreeNode::Link(LinkNode { target: stored, .. }) = tree.node_mut(link) {
                    *stored = target.to_string();
                }
            }
            Located::Missing { dir, segments } => {
                let parent = materialize_dirs(&mut tree, dir, &segments[..segments.len() - 1]);
                let name = segments[segments.len() - 1].clone();
                tree.insert_child(
                    parent,
                    TreeNode::Link(LinkNode {
                        name,
                        target: target.to_string(),
                        perms: Perms::default(),
                    }),
                );
            }
            _ => unreachable!("validation rejects every other shape"),
        }
        debug!(path = self.path.absolute(), link_target = target, "set link target");
        Ok(())
    }

    /// Whether the link currently resolves to a file.
    pub fn is_file(&self) -> bool {
        self.resolved_kind() == Some(NodeKind::File)
    }

    /// Whether the link currently resolves to a directory.
    pub fn is_directory(&self) -> bool {
        self.resolved_kind() == Some(NodeKind::Directory)
    }

    /// Move this link below `dest`; the link itself moves, its target is
    /// untouched.
    pub fn move_to(&self, dest: &Directory, name: Option<&str>) -> Result<Link> {
        let path = move_node(&self.fs, &self.path, NodeKind::Link, dest, name)?;
        Ok(Link::new(self.fs.clone(), path))
    }

    fn resolved_kind(&self) -> Option<NodeKind> {
        let tree = self.fs.read();
        let resolved = resolve_handle(&tree, &self.fs, &self.path).ok()?;
        match resolved.located {
            Located::Link { target, .. } => match target {
                LinkTarget::File(_) => Some(NodeKind::File),
                LinkTarget::Directory(_) => Some(NodeKind::Directory),
                LinkTarget::Missing { .. } | LinkTarget::Invalid => None,
            },
            _ => None,
        }
    }
}

impl crate::Node for Link {
    fn pathname(&self) -> &Pathname {
        &self.path
    }
    fn name(&self) -> &str {
        self.path.relative()
    }
    fn real_path(&self) -> Option<String> {
        real_path_at(&self.fs, &self.path)
    }
    fn exists(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Link, |p| p.exists)
    }
    fn is_readable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Link, |p| p.readable)
    }
    fn is_writable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Link, |p| p.writable)
    }
    fn is_removable(&self) -> bool {
        probe_flag(&self.fs, &self.path, NodeKind::Link, |p| {
            !p.root && p.parent_writable
        })
    }
    fn validate(&self, access: Access) -> Result<()> {
        validate_at(&self.fs, &self.path, NodeKind::Link, access)
    }
    fn remove(&self) -> Result<()> {
        remove_at(&self.fs, &self.path, NodeKind::Link)
    }
}

impl NodeHandle for Link {
    fn filesystem(&self) -> &FileSystem {
        &self.fs
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Node;

    #[test]
    fn test_two_handles_observe_the_same_tree() {
        let fs = FileSystem::new();
        let first = fs.root().file("shared.txt").unwrap();
        let second = fs.root().file("shared.txt").unwrap();

        assert!(!second.exists());
        first.write(b"data").unwrap();
        assert!(second.exists());
        assert_eq!(second.contents().unwrap(), b"data");
    }

    #[test]
    fn test_write_through_dangling_link_creates_the_target() {
        let fs = FileSystem::new();
        let root = fs.root();
        root.link("ghost.lnk")
            .unwrap()
            .set_target_path("vfs://real.txt")
            .unwrap();

        let through = root.file("ghost.lnk").unwrap();
        assert!(!through.exists());
        through.write(b"now real").unwrap();

        assert_eq!(root.file("real.txt").unwrap().contents().unwrap(), b"now real");
    }

    #[test]
    fn test_link_moves_as_link() {
        let fs = FileSystem::new();
        let root = fs.root();
        root.file("data.txt").unwrap().write(b"payload").unwrap();
        let link = root.link("alias.lnk").unwrap();
        link.set_target(&root.file("data.txt").unwrap()).unwrap();
        root.subdirectory("sub").unwrap().create().unwrap();

        let moved = link
            .move_to(&root.subdirectory("sub").unwrap(), None)
            .unwrap();

        assert!(!root.link("alias.lnk").unwrap().exists());
        assert!(moved.exists());
        assert_eq!(moved.target(false).as_deref(), Some("vfs://data.txt"));
        // The target file itself never moved.
        assert_eq!(root.file("data.txt").unwrap().contents().unwrap(), b"payload");
    }

    #[test]
    fn test_set_target_rejects_other_filesystem() {
        let fs = FileSystem::new();
        let other = FileSystem::new();
        other.root().file("far.txt").unwrap().write(b"x").unwrap();

        let link = fs.root().link("l").unwrap();
        let err = link
            .set_target(&other.root().file("far.txt").unwrap())
            .unwrap_err();
        assert!(matches!(err, FsError::ForeignNode { .. }));
    }

    #[test]
    fn test_set_target_rejects_links_and_missing_nodes() {
        let fs = FileSystem::new();
        let root = fs.root();
        root.file("a.txt").unwrap().write(b"a").unwrap();
        let link = root.link("l1").unwrap();
        link.set_target(&root.file("a.txt").unwrap()).unwrap();

        let second = root.link("l2").unwrap();
        assert!(matches!(
            second.set_target(&link),
            Err(FsError::UnexpectedNodeType { .. })
        ));
        assert!(matches!(
            second.set_target(&root.file("missing.txt").unwrap()),
            Err(FsError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_set_target_kind_must_match_existing_link() {
        let fs = FileSystem::new();
        let root = fs.root();
        root.file("a.txt").unwrap().write(b"a").unwrap();
        root.subdirectory("d").unwrap().create().unwrap();

        let link = root.link("l").unwrap();
        link.set_target(&root.file("a.txt").unwrap()).unwrap();
        assert!(link.is_file());

        let err = link
            .set_target(&root.subdirectory("d").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            FsError::UnexpectedNodeType {
                expected: NodeKind::File,
                ..
            }
        ));
    }

    #[test]
    fn test_files_sequence_restarts_against_live_state() {
        let fs = FileSystem::new();
        let root = fs.root();
        root.file("one.txt").unwrap().write(b"1").unwrap();

        let files = root.files().unwrap();
        assert_eq!(files.names(), ["one.txt"]);

        root.file("two.txt").unwrap().write(b"2").unwrap();
        assert_eq!(files.names(), ["one.txt", "two.txt"]);

        let listed: Vec<String> = (&files)
            .into_iter()
            .map(|f| f.pathname().absolute().to_string())
            .collect();
        assert_eq!(listed, ["vfs://one.txt", "vfs://two.txt"]);
    }

    #[test]
    fn test_as_root_rebases_the_relative_path() {
        let fs = FileSystem::new();
        let root = fs.root();
        root.file("sub/inner.txt").unwrap().write(b"x").unwrap();

        let sub = root.subdirectory("sub").unwrap().as_root().unwrap();
        assert_eq!(sub.name(), "");
        let inner = sub.file("inner.txt").unwrap();
        assert_eq!(inner.contents().unwrap(), b"x");
        assert_eq!(inner.pathname().absolute(), "vfs://sub/inner.txt");
        assert_eq!(inner.name(), "inner.txt");

        assert!(matches!(
            root.subdirectory("nope").unwrap().as_root(),
            Err(FsError::RootNotFound { .. })
        ));
    }

    #[test]
    fn test_directory_cannot_move_into_its_own_subtree() {
        let fs = FileSystem::new();
        let root = fs.root();
        root.file("outer/inner/leaf.txt").unwrap().write(b"").unwrap();

        let outer = root.subdirectory("outer").unwrap();
        let inner = root.subdirectory("outer/inner").unwrap();
        let err = outer.move_to(&inner, None).unwrap_err();
        assert!(matches!(err, FsError::UnreachablePath { .. }));
        // Nothing moved.
        assert!(root.file("outer/inner/leaf.txt").unwrap().exists());
    }
}
