//! Linux >=5.12 mount API: detached clones of mount trees, `mount_setattr(2)` and
//! `move_mount(2)`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod sys;

pub mod mount;
#[doc(inline)]
pub use mount::{Mount, MountAttr, MountSetAttr, MoveMount, OpenTree, RawMountAttr};

#[cfg(feature = "userns")]
mod graft;
#[cfg(feature = "userns")]
pub use graft::graft;

/// Errors while cloning, id-mapping or attaching a mount tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MountError {
    /// `open_tree(2)` could not clone the source mount.
    #[error("failed to open {path:?}")]
    DetachFailed {
        /// The source path.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `mount_setattr(2)` could not apply the id mapping to the clone.
    #[error("failed to change mount attributes of the clone of {path:?}")]
    AttributeApplyFailed {
        /// The source path of the clone.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `move_mount(2)` could not attach the clone.
    #[error("failed to attach mount to {path:?}")]
    AttachFailed {
        /// The target path.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl MountError {
    /// The OS error which caused this.
    pub fn os_error(&self) -> &io::Error {
        match self {
            MountError::DetachFailed { source, .. }
            | MountError::AttributeApplyFailed { source, .. }
            | MountError::AttachFailed { source, .. } => source,
        }
    }
}
