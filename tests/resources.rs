//! Failing steps must not leave file descriptors or helper processes behind.
//!
//! Everything runs in a single test so nothing else in this process opens files or spawns
//! children concurrently.

use std::os::fd::OwnedFd;

use mount_idmapped::idmap::{IdKind, IdMapEntry, IdMapSet};
use mount_idmapped::mount::{MountError, graft};
use mount_idmapped::userns::{NamespaceError, Userns};

fn open_fds() -> Vec<String> {
    let mut fds: Vec<String> = std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    fds.sort();
    fds
}

fn has_children() -> bool {
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_ALL,
            0,
            &mut info,
            libc::WEXITED | libc::WSTOPPED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    rc == 0
}

fn assert_clean(before: &[String], step: &str) {
    assert_eq!(open_fds(), before, "file descriptors leaked by {step}");
    assert!(!has_children(), "helper process left behind by {step}");
}

#[test]
fn no_leaks_on_any_path() {
    let before = open_fds();
    assert!(!has_children());

    // rejected uid map write
    let mut set = IdMapSet::new();
    set.push(IdMapEntry::new(IdKind::Uid, 0, u32::MAX - 1, 1000));
    match Userns::mint(&set) {
        Err(NamespaceError::MappingWriteFailed { .. } | NamespaceError::ProcessSpawnFailed(_)) => (),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_clean(&before, "a rejected uid map");

    // rejected gid map write after a successful uid map write
    let uid = unsafe { libc::geteuid() };
    let mut set = IdMapSet::new();
    set.push(IdMapEntry::new(IdKind::Uid, 0, uid, 1));
    set.push(IdMapEntry::new(IdKind::Gid, 0, u32::MAX - 1, 1000));
    match Userns::mint(&set) {
        Err(NamespaceError::MappingWriteFailed { kind, .. }) => assert_eq!(kind, IdKind::Gid),
        Err(NamespaceError::ProcessSpawnFailed(_)) => (),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_clean(&before, "a rejected gid map");

    // successful mint, the handle is the only thing left and closes on drop
    let mut set = IdMapSet::new();
    set.push(IdMapEntry::new(IdKind::Uid, 0, uid, 1));
    if let Ok(userns) = Userns::mint(&set) {
        assert!(!has_children(), "helper process outlived mint");
        assert_eq!(open_fds().len(), before.len() + 1);
        drop(userns);
    }
    assert_clean(&before, "a successful mint");

    // detach failure
    let dir = tempfile::tempdir().unwrap();
    let before = open_fds();
    let err = graft(&dir.path().join("missing"), dir.path(), None, true).unwrap_err();
    assert!(matches!(err, MountError::DetachFailed { .. }), "{err}");
    assert_clean(&before, "a failed detach");

    // attribute failure, a regular file is not a user namespace
    let not_userns = Userns::from(OwnedFd::from(tempfile::tempfile().unwrap()));
    let target = tempfile::tempdir().unwrap();
    match graft(dir.path(), target.path(), Some(not_userns), false) {
        Err(MountError::AttributeApplyFailed { source, .. }) => {
            assert_eq!(source.raw_os_error(), Some(libc::EINVAL));
        }
        // no CAP_SYS_ADMIN or no new mount API
        Err(MountError::DetachFailed { .. }) => (),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_clean(&before, "a failed attribute change");

    // attach failure, possibly after applying an id mapping to the clone
    let idmapped = Userns::mint(&set).ok();
    let err = graft(dir.path(), &dir.path().join("missing"), idmapped, false).unwrap_err();
    assert!(
        matches!(
            err,
            MountError::DetachFailed { .. }
                | MountError::AttributeApplyFailed { .. }
                | MountError::AttachFailed { .. }
        ),
        "{err}"
    );
    assert_clean(&before, "a failed attach");
}
