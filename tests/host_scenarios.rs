//! End-to-end scenarios over the host backend, inside a temp directory.

use anyhow::Result;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use virtual_nodes::{host_fs, Access, FsError, Node};

fn setup() -> Result<(host_fs::FileSystem, TempDir)> {
    let dir = TempDir::new()?;
    let fs = host_fs::FileSystem::new(dir.path())?;
    Ok((fs, dir))
}

/// Permission-bit assertions are meaningless for the superuser, which
/// bypasses them.
#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

#[test]
fn resolves_a_nested_file() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("foo/bar/baz.txt")?.write(b"x")?;

    let file = root.file("foo/bar/baz.txt")?;
    assert!(file.exists());
    assert_eq!(file.contents()?, b"x");
    assert_eq!(file.name(), "foo/bar/baz.txt");
    Ok(())
}

#[test]
fn descending_through_a_file_is_a_leaf_collision() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("blocker.txt")?.write(b"x")?;

    let below = root.file("blocker.txt/extra")?;
    assert!(!below.exists());
    assert!(matches!(
        below.validate(Access::write()),
        Err(FsError::UnexpectedLeafNode { .. })
    ));
    Ok(())
}

#[test]
fn writing_creates_intermediate_directories() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.subdirectory("foo")?.create()?;

    root.file("foo/new/dir/file.txt")?.write(b"made it")?;

    assert!(root.subdirectory("foo/new")?.exists());
    assert!(root.subdirectory("foo/new/dir")?.exists());
    assert_eq!(root.file("foo/new/dir/file.txt")?.contents()?, b"made it");
    Ok(())
}

#[test]
fn wrong_kind_is_a_type_mismatch() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.subdirectory("dir")?.create()?;

    let as_file = root.file("dir")?;
    assert!(!as_file.exists());
    assert!(matches!(
        as_file.validate(Access::read()),
        Err(FsError::UnexpectedNodeType { .. })
    ));
    Ok(())
}

#[test]
fn exists_assertion_reports_not_found() -> Result<()> {
    let (fs, _dir) = setup()?;
    let file = fs.root().file("absent.txt")?;

    assert!(matches!(
        file.validate(Access::exists()),
        Err(FsError::NodeNotFound { .. })
    ));
    assert_eq!(file.contents()?, Vec::<u8>::new());
    Ok(())
}

#[test]
fn root_removal_is_always_refused() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("keep.txt")?.write(b"x")?;

    assert!(matches!(
        root.remove(),
        Err(FsError::CannotRemoveRoot { .. })
    ));
    assert!(!root.is_removable());
    assert!(root.file("keep.txt")?.exists());
    Ok(())
}

#[test]
fn move_overwrites_an_existing_destination() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("src.txt")?.write(b"fresh")?;
    root.file("dest/old.txt")?.write(b"stale")?;

    let moved = root
        .file("src.txt")?
        .move_to(&root.subdirectory("dest")?, Some("old.txt"))?;

    assert!(!root.file("src.txt")?.exists());
    assert_eq!(moved.contents()?, b"fresh");
    Ok(())
}

#[test]
fn directory_move_carries_its_subtree() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("from/deep/leaf.txt")?.write(b"leaf")?;
    root.subdirectory("to")?.create()?;

    root.subdirectory("from")?
        .move_to(&root.subdirectory("to")?, None)?;

    assert!(!root.subdirectory("from")?.exists());
    assert_eq!(root.file("to/from/deep/leaf.txt")?.contents()?, b"leaf");
    Ok(())
}

#[test]
fn files_sequence_restarts_against_live_state() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("one.txt")?.write(b"1")?;
    root.subdirectory("not-a-file")?.create()?;

    let files = root.files()?;
    assert_eq!(files.names(), ["one.txt"]);

    root.file("two.txt")?.write(b"2")?;
    assert_eq!(files.names(), ["one.txt", "two.txt"]);
    Ok(())
}

#[test]
fn as_root_rebases_onto_a_subdirectory() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("sub/inner.txt")?.write(b"x")?;

    let sub = root.subdirectory("sub")?.as_root()?;
    assert_eq!(sub.name(), "");
    assert_eq!(sub.file("inner.txt")?.contents()?, b"x");

    assert!(matches!(
        root.subdirectory("nope")?.as_root(),
        Err(FsError::RootNotFound { .. })
    ));
    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_nodes_inherit_ancestor_permissions() -> Result<()> {
    if running_as_root() {
        eprintln!("skipped: permission bits do not bind the superuser");
        return Ok(());
    }
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.subdirectory("foo")?.create()?;

    assert!(root.file("foo/not-yet-created.txt")?.is_writable());

    root.subdirectory("foo")?.set_writable(false)?;
    assert!(!root.file("foo/not-yet-created.txt")?.is_writable());
    assert!(matches!(
        root.file("foo/not-yet-created.txt")?.write(b"nope"),
        Err(FsError::AccessDenied { .. })
    ));

    // Restore so the temp directory can be cleaned up.
    root.subdirectory("foo")?.set_writable(true)?;
    root.file("foo/bar/baz.txt")?.write(b"allowed")?;
    assert_eq!(root.file("foo/bar/baz.txt")?.contents()?, b"allowed");
    Ok(())
}

#[cfg(unix)]
#[test]
fn link_scenarios_round_trip() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("b.txt")?.write(b"hi")?;
    root.link("a.lnk")?.set_target(&root.file("b.txt")?)?;

    // Content routes to the target, identity stays with the link.
    assert_eq!(root.file("a.lnk")?.contents()?, b"hi");
    let link = root.link("a.lnk")?;
    assert!(link.exists());
    assert!(link.is_file());
    assert!(link.target(false).unwrap().ends_with("b.txt"));

    // Removing the link path removes the link, not the target.
    root.file("a.lnk")?.remove()?;
    assert!(!root.link("a.lnk")?.exists());
    assert_eq!(root.file("b.txt")?.contents()?, b"hi");
    Ok(())
}

#[cfg(unix)]
#[test]
fn self_copy_and_self_move_through_an_alias_are_noops() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.file("a.txt")?.write(b"original")?;
    root.link("alias.lnk")?.set_target(&root.file("a.txt")?)?;

    let file = root.file("a.txt")?;
    file.copy(&root.file("alias.lnk")?)?;
    file.move_to(&root, Some("alias.lnk"))?;

    assert_eq!(root.file("a.txt")?.contents()?, b"original");
    assert!(root.link("alias.lnk")?.exists());
    Ok(())
}

#[cfg(unix)]
#[test]
fn symlink_cycle_terminates_as_unreachable() -> Result<()> {
    let (fs, _dir) = setup()?;
    let root = fs.root();
    root.link("a.lnk")?
        .set_target_path(&format!("{}/a.lnk2", fs.root().pathname().absolute()))?;
    root.link("a.lnk2")?
        .set_target_path(&format!("{}/a.lnk", fs.root().pathname().absolute()))?;

    let through = root.file("a.lnk")?;
    assert!(!through.exists());
    assert!(matches!(
        through.validate(Access::read()),
        Err(FsError::UnreachablePath { .. })
    ));
    Ok(())
}
