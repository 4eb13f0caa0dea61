//! # Id-mapped mounts
//!
//! Create a mount of an existing directory tree whose file ownership appears translated through a
//! uid/gid mapping, without touching the ownership stored on disk.
//!
//! This takes three steps:
//!
//! 1. Build an [`IdMapSet`](idmap::IdMapSet) describing the uid and gid ranges to translate.
//! 2. Mint a user namespace carrying that mapping. The kernel only hands out user namespaces to
//!    processes, so this spawns a helper process, writes its `uid_map`/`gid_map` files, keeps a
//!    file descriptor to its namespace and kills the helper again.
//! 3. Clone the source mount into a detached mount tree, set the `MOUNT_ATTR_IDMAP` attribute with
//!    the namespace on it and attach it at the target path.
//!
//! ``` rust, no_run
//! # fn code() -> Result<(), mount_idmapped::Error> {
//! use mount_idmapped::idmap::IdMapSet;
//! use mount_idmapped::mount::graft;
//! use mount_idmapped::userns::Userns;
//!
//! let mut idmap = IdMapSet::new();
//! idmap.parse_into("b:0:100000:65536")?;
//!
//! let userns = Userns::mint(&idmap)?;
//! graft("/srv/rootfs", "/mnt/mapped", Some(userns), true)?;
//! #
//! # Ok(())
//! # }
//! ```
//!
//! [`IdmappedMount`](orchestrate::IdmappedMount) bundles these steps, skipping the namespace
//! entirely when no mapping was requested, which results in a plain bind-style clone.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]

#[cfg(any(feature = "open", feature = "mount"))]
pub(crate) mod c_path;
#[cfg(any(feature = "open", feature = "mount"))]
use c_path::CPath;

pub mod error;
#[doc(inline)]
pub use error::Error;

pub mod idmap;

#[cfg(feature = "mount")]
pub mod mount;

#[cfg(feature = "open")]
pub mod open;

#[cfg(feature = "userns")]
pub mod userns;

#[cfg(all(feature = "mount", feature = "userns"))]
pub mod orchestrate;
