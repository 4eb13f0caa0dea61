//! Minting user namespace file descriptors for id-mapped mounts. Requires kernel >=5.3.
//!
//! A user namespace only exists as long as something refers to it. To get a handle to one with
//! a given id mapping, a helper process is cloned into a new user and mount namespace, its
//! `uid_map` and `gid_map` are written, `/proc/<pid>/ns/user` is opened and the helper is killed
//! again. The open file descriptor keeps the namespace alive from then on.

use std::fs::File;
use std::io::{self, Write as _};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use thiserror::Error;
use tracing::debug;

use crate::idmap::{IdKind, IdMapSet, MapTooLarge};
use crate::open::OpenHow;

mod process;
use process::HelperProcess;

/// A handle to a user namespace.
#[derive(Debug)]
pub struct Userns {
    fd: OwnedFd,
}

impl Userns {
    /// Create a user namespace with the uid and gid mappings of `idmap`.
    ///
    /// See [`mint`].
    pub fn mint(idmap: &IdMapSet) -> Result<Self, NamespaceError> {
        mint(idmap)
    }
}

impl AsRawFd for Userns {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for Userns {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl FromRawFd for Userns {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl AsFd for Userns {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl From<OwnedFd> for Userns {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

/// Errors while minting a user namespace.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NamespaceError {
    /// The helper process could not be created.
    #[error("failed to create user namespace helper process")]
    ProcessSpawnFailed(#[source] io::Error),

    /// The id map does not fit into a single write.
    #[error(transparent)]
    MappingTooLarge(#[from] MapTooLarge),

    /// Denying `setgroups(2)` failed, which is required for unprivileged gid mappings.
    #[error("failed to write \"deny\" to {path:?}")]
    SetgroupsWriteFailed {
        /// The `setgroups` file.
        path: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Writing the uid or gid map failed.
    #[error("failed to write {kind} mapping to {path:?}")]
    MappingWriteFailed {
        /// Which map failed.
        kind: IdKind,
        /// The map file.
        path: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The namespace file of the helper could not be opened.
    #[error("failed to open user namespace {path:?}")]
    NamespaceOpenFailed {
        /// The `ns/user` file.
        path: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl NamespaceError {
    /// The OS error which caused this, if any.
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            NamespaceError::ProcessSpawnFailed(err) => Some(err),
            NamespaceError::MappingTooLarge(_) => None,
            NamespaceError::SetgroupsWriteFailed { source, .. }
            | NamespaceError::MappingWriteFailed { source, .. }
            | NamespaceError::NamespaceOpenFailed { source, .. } => Some(source),
        }
    }
}

/// Write `data` with a single `write(2)` call. A short write is an error since the kernel
/// interprets each write to these files as a whole.
fn write_once(file: &mut File, data: &[u8]) -> io::Result<()> {
    let written = loop {
        match file.write(data) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => break other?,
        }
    };
    if written != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write ({written} of {} bytes)", data.len()),
        ));
    }
    Ok(())
}

/// Deny `setgroups(2)` in the helper's namespace. A missing `setgroups` file (kernels before
/// 3.19) is not an error.
fn deny_setgroups(helper: &HelperProcess) -> Result<(), NamespaceError> {
    let path = helper.proc_path("setgroups");
    let fail = |source| NamespaceError::SetgroupsWriteFailed {
        path: path.clone(),
        source,
    };

    let mut file = match OpenHow::new_write().no_final_symlink(true).open_file(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("{path} does not exist, not denying setgroups");
            return Ok(());
        }
        Err(err) => return Err(fail(err)),
    };
    write_once(&mut file, b"deny\n").map_err(fail)
}

fn write_map(helper: &HelperProcess, kind: IdKind, data: &[u8]) -> Result<(), NamespaceError> {
    let path = helper.proc_path(kind.map_file());
    let fail = |source| NamespaceError::MappingWriteFailed {
        kind,
        path: path.clone(),
        source,
    };

    let mut file = OpenHow::new_write()
        .no_final_symlink(true)
        .open_file(&path)
        .map_err(fail)?;
    write_once(&mut file, data).map_err(fail)?;
    debug!("wrote {} bytes of {kind} mappings to {path}", data.len());
    Ok(())
}

fn is_privileged() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Create a user namespace with the uid and gid mappings of `idmap` and return a handle to it.
///
/// Maps without entries of a kind are left unwritten. The helper process is killed and reaped
/// before this returns, whether it succeeds or not.
pub fn mint(idmap: &IdMapSet) -> Result<Userns, NamespaceError> {
    // Render both maps up front so an oversized map fails before any process exists.
    let mut maps = Vec::with_capacity(IdKind::ALL.len());
    for kind in IdKind::ALL {
        if let Some(data) = idmap.kernel_map(kind)? {
            maps.push((kind, data));
        }
    }

    let helper = HelperProcess::spawn(libc::CLONE_NEWUSER | libc::CLONE_NEWNS)
        .map_err(NamespaceError::ProcessSpawnFailed)?;

    for (kind, data) in &maps {
        // Unprivileged gid mappings require setgroups to be denied first.
        if *kind == IdKind::Gid && !is_privileged() {
            deny_setgroups(&helper)?;
        }
        write_map(&helper, *kind, data)?;
    }

    let path = helper.proc_path("ns/user");
    let fd = OpenHow::new_read()
        .open(&path)
        .map_err(|source| NamespaceError::NamespaceOpenFailed {
            path: path.clone(),
            source,
        })?;
    debug!(pid = helper.pid(), "opened {path}");

    drop(helper);
    Ok(Userns { fd })
}
