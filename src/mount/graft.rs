//! Grafting an (optionally id-mapped) clone of a mount tree onto another path.

use std::ffi::{c_int, c_uint};
use std::path::Path;

use tracing::{debug, info};

use crate::mount::{Mount, MountError, MountSetAttr, MoveMount, OpenTree};
use crate::userns::Userns;

/// `open_tree(2)` flags for the detached clone.
fn clone_flags(recursive: bool) -> OpenTree {
    let mut flags = OpenTree::CLONE | OpenTree::CLOEXEC;
    if recursive {
        flags |= OpenTree::RECURSIVE;
    }
    flags
}

/// `AT_*` flags for `mount_setattr(2)` on the clone, `AT_EMPTY_PATH` is implied.
fn setattr_flags(recursive: bool) -> c_int {
    if recursive { libc::AT_RECURSIVE } else { 0 }
}

/// Clone the mount at `source`, id-map the clone through `idmap` if given and attach it at
/// `target`.
///
/// With `recursive` the whole tree of submounts below `source` is cloned and id-mapped, otherwise
/// only the mount `source` belongs to. The clone and the namespace handle are closed before this
/// returns. If a step fails the clone is discarded without ever having been attached anywhere.
pub fn graft<S, T>(
    source: &S,
    target: &T,
    idmap: Option<Userns>,
    recursive: bool,
) -> Result<(), MountError>
where
    S: ?Sized + AsRef<Path>,
    T: ?Sized + AsRef<Path>,
{
    let (source, target) = (source.as_ref(), target.as_ref());

    let mount = Mount::open_tree(
        source,
        clone_flags(recursive),
        libc::AT_EMPTY_PATH as c_uint,
    )
    .map_err(|err| MountError::DetachFailed {
        path: source.to_path_buf(),
        source: err,
    })?;

    if let Some(userns) = idmap {
        mount
            .setattr(&MountSetAttr::new().idmap(&userns), setattr_flags(recursive))
            .map_err(|err| MountError::AttributeApplyFailed {
                path: source.to_path_buf(),
                source: err,
            })?;
        debug!("applied id mapping to clone of {source:?}");
    }

    mount
        .move_mount(target, MoveMount::empty())
        .map_err(|err| MountError::AttachFailed {
            path: target.to_path_buf(),
            source: err,
        })?;

    info!("mounted {source:?} on {target:?}");
    Ok(())
}
