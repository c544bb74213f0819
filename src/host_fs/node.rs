//! Node handles over the host filesystem.
//!
//! Handles hold only the backend and the [`Pathname`] that produced them;
//! every operation goes back to the OS at call time. Validation runs before
//! any I/O; an OS failure after validation passed surfaces as the matching
//! `UnableTo*` error with the offending path attached.

use std::fs;
use std::io::{Read, Write as _};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::{build_probe, entry_kind, resolved_kind, FileSystem};
use crate::error::{FsError, Result};
use crate::{check_access, Access, NodeKind, Pathname};

/// Handle-level view of any host node, used where a node of either kind is
/// accepted as an argument (link targets).
pub trait NodeHandle: crate::Node {
    /// The filesystem this handle belongs to.
    fn filesystem(&self) -> &FileSystem;

    /// The node kind this handle addresses.
    fn kind(&self) -> NodeKind;
}

/// A file below a host root.
#[derive(Debug, Clone)]
pub struct File {
    fs: FileSystem,
    path: Pathname,
}

/// A directory below (or at) a host root.
#[derive(Debug, Clone)]
pub struct Directory {
    fs: FileSystem,
    path: Pathname,
}

/// A symbolic link below a host root.
#[derive(Debug, Clone)]
pub struct Link {
    fs: FileSystem,
    path: Pathname,
}

fn full_path(path: &Pathname) -> PathBuf {
    PathBuf::from(path.absolute())
}

fn validate_at(fs: &FileSystem, path: &Pathname, expected: NodeKind, access: Access) -> Result<()> {
    check_access(&build_probe(fs, path, expected), access)
}

fn probe_flag(
    fs: &FileSystem,
    path: &Pathname,
    expected: NodeKind,
    flag: impl FnOnce(&crate::ProbeData) -> bool,
) -> bool {
    flag(&build_probe(fs, path, expected))
}

fn remove_at(fs: &FileSystem, path: &Pathname, expected: NodeKind) -> Result<()> {
    let full = full_path(path);

    // Removing a node that is not there is a no-op.
    let Some(entry) = entry_kind(&full) else {
        return Ok(());
    };

    validate_at(fs, path, expected, Access::remove())?;

    let outcome = match entry {
        NodeKind::Directory => fs::remove_dir_all(&full),
        // `remove_file` unlinks the entry itself, so a link path removes
        // the link, never its target.
        NodeKind::File | NodeKind::Link => fs::remove_file(&full),
    };
    outcome.map_err(|source| FsError::UnableToRemove {
        path: path.absolute().to_string(),
        source,
    })?;
    debug!(path = path.absolute(), "removed node");
    Ok(())
}

fn set_writable_at(
    fs: &FileSystem,
    path: &Pathname,
    expected: NodeKind,
    writable: bool,
) -> Result<()> {
    validate_at(fs, path, expected, Access::exists())?;
    let full = full_path(path);

    let io_err = |source| FsError::UnableToSetPermissions {
        path: path.absolute().to_string(),
        source,
    };
    let meta = fs::metadata(&full).map_err(io_err)?;
    let mut perms = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        perms.set_mode(if writable { mode | 0o200 } else { mode & !0o222 });
    }
    #[cfg(not(unix))]
    perms.set_readonly(!writable);

    fs::set_permissions(&full, perms).map_err(io_err)
}

/// The canonical identity of whatever a path resolves to, links followed.
/// `None` when the path cannot be canonicalized (missing or broken).
fn canonical_identity(path: &Pathname) -> Option<PathBuf> {
    dunce::canonicalize(full_path(path)).ok()
}

/// The fully link-resolved absolute path. For a missing tail the closest
/// existing ancestor is canonicalized and the remaining segments re-applied;
/// a blocked or broken chain has no real path.
fn real_path_at(path: &Pathname) -> Option<String> {
    let full = full_path(path);
    if let Ok(canonical) = dunce::canonicalize(&full) {
        return Some(canonical.to_string_lossy().into_owned());
    }

    let components: Vec<_> = full.components().collect();
    for (stripped, ancestor) in full.ancestors().enumerate().skip(1) {
        if fs::symlink_metadata(ancestor).is_ok() {
            let Ok(canonical) = dunce::canonicalize(ancestor) else {
                return None;
            };
            if !canonical.is_dir() {
                return None;
            }
            let mut out = canonical;
            for component in &components[components.len() - stripped..] {
                out.push(component);
            }
            return Some(out.to_string_lossy().into_owned());
        }
    }
    None
}

fn move_entry(
    fs: &FileSystem,
    src: &Pathname,
    expected: NodeKind,
    dest_dir: &Directory,
    name: Option<&str>,
) -> Result<Pathname> {
    fs.ensure_under_root(dest_dir.path.absolute())?;

    let leaf = match name {
        Some(name) => name.to_string(),
        None => src.leaf().to_string(),
    };
    let dest_path = dest_dir.path.for_child(&leaf)?;

    // Self-reference: both spellings resolve to the identical node, so the
    // move is a no-op. This covers moving onto a symlink alias of the
    // source, and moving onto the source's own path.
    if let (Some(a), Some(b)) = (canonical_identity(src), canonical_identity(&dest_path)) {
        if a == b {
            trace!(
                from = src.absolute(),
                to = dest_path.absolute(),
                "self-referential move ignored"
            );
            return Ok(dest_path);
        }
    }

    validate_at(fs, src, expected, Access::exists() | Access::remove())?;
    validate_at(
        &dest_dir.fs,
        &dest_dir.path,
        NodeKind::Directory,
        Access::exists() | Access::write(),
    )?;

    let src_full = full_path(src);
    let dest_full = full_path(&dest_path);
    let io_err = |source| FsError::UnableToMove {
        path: src.absolute().to_string(),
        source,
    };

    if let Some(parent) = dest_full.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    // Discard whatever occupies the destination; the identity check above
    // already excluded the source itself.
    match entry_kind(&dest_full) {
        Some(NodeKind::Directory) => fs::remove_dir_all(&dest_full).map_err(io_err)?,
        Some(_) => fs::remove_file(&dest_full).map_err(io_err)?,
        None => {}
    }

    // `rename` does not follow the final link, so moving a link moves the
    // link itself.
    fs::rename(&src_full, &dest_full).map_err(io_err)?;
    debug!(
        from = src.absolute(),
        to = dest_path.absolute(),
        "moved node"
    );
    Ok(dest_path)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("symbolic links are not supported"))
}

/// Replace an existing link by creating a uniquely named sibling and
/// renaming it over the old one. Approximates atomicity versus concurrent
/// readers; the temporary is cleaned up best-effort on failure.
fn replace_link(link: &Path, target: &Path) -> std::io::Result<()> {
    let parent = link
        .parent()
        .ok_or_else(|| std::io::Error::other("link has no parent directory"))?;
    let leaf = link
        .file_name()
        .ok_or_else(|| std::io::Error::other("link has no name"))?
        .to_string_lossy()
        .into_owned();

    let mut attempt = 0u32;
    let temp = loop {
        let candidate = parent.join(format!(".{leaf}.{}.{attempt}.tmp", std::process::id()));
        if fs::symlink_metadata(&candidate).is_err() {
            break candidate;
        }
        attempt += 1;
    };

    make_symlink(target, &temp)?;
    if let Err(err) = fs::rename(&temp, link) {
        if let Err(cleanup) = fs::remove_file(&temp) {
            warn!(temp = %temp.display(), error = %cleanup, "failed to clean up temporary link");
        }
        return Err(err);
    }
    Ok(())
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
        crate::Node::validate(self, Access::read())?;
        match fs::read(full_path(&self.path)) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(FsError::UnableToReadContents {
                path: self.path.absolute().to_string(),
                source,
            }),
        }
    }

    /// Replace the file's contents, creating the file — and any missing
    /// intermediate directories — on first write.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        crate::Node::validate(self, Access::write())?;
        let full = full_path(&self.path);
        let io_err = |source| FsError::UnableToCreate {
            path: self.path.absolute().to_string(),
            source,
        };
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&full, data).map_err(io_err)?;
        debug!(path = self.path.absolute(), len = data.len(), "wrote file");
        Ok(())
    }

    /// Append to the file, creating it like [`write`](File::write) when
    /// absent.
    pub fn append(&self, data: &[u8]) -> Result<()> {
        crate::Node::validate(self, Access::write())?;
        let full = full_path(&self.path);
        let io_err = |source| FsError::UnableToCreate {
            path: self.path.absolute().to_string(),
            source,
        };
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .map_err(io_err)?;
        file.write_all(data).map_err(io_err)?;
        debug!(path = self.path.absolute(), len = data.len(), "appended to file");
        Ok(())
    }

    /// Copy this file's contents into `other`.
    ///
    /// Copying a file onto itself — including through a symlink alias — is a
    /// silent no-op.
    pub fn copy(&self, other: &File) -> Result<()> {
        self.fs.ensure_under_root(other.path.absolute())?;
        if let (Some(a), Some(b)) = (
            canonical_identity(&self.path),
            canonical_identity(&other.path),
        ) {
            if a == b {
                trace!(path = self.path.absolute(), "self-referential copy ignored");
                return Ok(());
            }
        }
        let data = self.contents()?;
        other.write(&data)
    }

    /// Move this file below `dest`, optionally renaming it.
    pub fn move_to(&self, dest: &Directory, name: Option<&str>) -> Result<File> {
        let path = move_entry(&self.fs, &self.path, NodeKind::File, dest, name)?;
        Ok(File::new(self.fs.clone(), path))
    }

    /// A streaming handle on the contents; `None` when the file does not
    /// exist yet.
    pub fn content_stream(&self) -> Result<Option<Box<dyn Read>>> {
        crate::Node::validate(self, Access::read())?;
        match fs::File::open(full_path(&self.path)) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FsError::UnableToReadContents {
                path: self.path.absolute().to_string(),
                source,
            }),
        }
    }

    /// Toggle the write permission bits; the node must exist.
    pub fn set_writable(&self, writable: bool) -> Result<()> {
        set_writable_at(&self.fs, &self.path, NodeKind::File, writable)
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
        real_path_at(&self.path)
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
        crate::Node::validate(self, Access::write())?;
        fs::create_dir_all(full_path(&self.path)).map_err(|source| FsError::UnableToCreate {
            path: self.path.absolute().to_string(),
            source,
        })?;
        debug!(path = self.path.absolute(), "created directory");
        Ok(self.clone())
    }

    /// Reinterpret this directory as a new filesystem root. Fails when the
    /// directory does not exist.
    pub fn as_root(&self) -> Result<Directory> {
        let fs = FileSystem::new(full_path(&self.path))?;
        Ok(fs.root())
    }

    /// Move this directory below `dest`, optionally renaming it.
    pub fn move_to(&self, dest: &Directory, name: Option<&str>) -> Result<Directory> {
        let path = move_entry(&self.fs, &self.path, NodeKind::Directory, dest, name)?;
        Ok(Directory::new(self.fs.clone(), path))
    }

    /// Toggle the write permission bits; the node must exist.
    pub fn set_writable(&self, writable: bool) -> Result<()> {
        set_writable_at(&self.fs, &self.path, NodeKind::Directory, writable)
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
        real_path_at(&self.path)
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

/// The files below a host directory.
///
/// Restartable: each [`iter`](Files::iter) call (or `IntoIterator` pass)
/// re-lists the directory. Links are included when they resolve to a file.
#[derive(Debug, Clone)]
pub struct Files {
    fs: FileSystem,
    path: Pathname,
}

impl Files {
    fn list(&self) -> Vec<File> {
        let Ok(entries) = fs::read_dir(full_path(&self.path)) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                // Follows links, so a link to a file counts as a file.
                if resolved_kind(&entry.path()) == Some(NodeKind::File) {
                    Some(entry.file_name().to_string_lossy().into_owned())
                } else {
                    None
                }
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
    /// `None` when the link does not exist — or when its target no longer
    /// resolves, unless `show_removed` asks for the stale target.
    pub fn target(&self, show_removed: bool) -> Option<String> {
        let full = full_path(&self.path);
        if entry_kind(&full) != Some(NodeKind::Link) {
            return None;
        }
        let target = fs::read_link(&full).ok()?;
        let absolute = if target.is_absolute() {
            target
        } else {
            full.parent()?.join(&target)
        };
        let stored = absolute.to_string_lossy().into_owned();
        if fs::metadata(&absolute).is_ok() {
            Some(stored)
        } else {
            show_removed.then_some(stored)
        }
    }

    /// Point this link at `node`, creating the link if it does not exist or
    /// replacing the target of an existing one.
    ///
    /// Fails when `node` does not exist, lies outside this filesystem's
    /// root, is itself a link, or mismatches the kind an existing link
    /// resolves to.
    pub fn set_target<N: NodeHandle>(&self, node: &N) -> Result<()> {
        self.fs.ensure_under_root(node.pathname().absolute())?;
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
    /// checking that the target exists.
    ///
    /// Replacing an existing link goes through a temporary sibling plus a
    /// rename, so concurrent readers never observe a half-written link.
    pub fn set_target_path(&self, target: &str) -> Result<()> {
        self.fs.ensure_under_root(target)?;
        crate::Node::validate(self, Access::write())?;

        let full = full_path(&self.path);
        let target_buf = PathBuf::from(target);
        let io_err = |source| FsError::UnableToCreate {
            path: self.path.absolute().to_string(),
            source,
        };

        match entry_kind(&full) {
            Some(NodeKind::Link) => replace_link(&full, &target_buf).map_err(io_err)?,
            None => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).map_err(io_err)?;
                }
                make_symlink(&target_buf, &full).map_err(io_err)?;
            }
            Some(_) => {
                return Err(FsError::unexpected_type(
                    self.path.absolute(),
                    NodeKind::Link,
                ));
            }
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
        let path = move_entry(&self.fs, &self.path, NodeKind::Link, dest, name)?;
        Ok(Link::new(self.fs.clone(), path))
    }

    fn resolved_kind(&self) -> Option<NodeKind> {
        let full = full_path(&self.path);
        if entry_kind(&full) != Some(NodeKind::Link) {
            return None;
        }
        resolved_kind(&full)
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
        real_path_at(&self.path)
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
