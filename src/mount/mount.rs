//! Detached mount tree handles.

use std::ffi::{CStr, c_int, c_uint};
use std::io;
use std::marker::PhantomData;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use bitflags::bitflags;
use tracing::debug;

use crate::CPath;
use crate::error::{io_assert, io_bail};
use crate::mount::sys;

pub use super::sys::MountAttr;

bitflags! {
    /// Flags for handling the "from" and "to" parts of a [`move_mount`](Mount::move_mount())
    /// operation.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct MoveMount: c_uint {
        /// Follow symlinks on the "from" path.
        const F_SYMLINKS    = 0x0000_0001;
        /// Trigger auto-mounts on the "from" path.
        const F_AUTOMOUNTS  = 0x0000_0002;
        /// Permit an empty "from" path to use the "from" file descriptor directly.
        const F_EMPTY_PATH  = 0x0000_0004;

        /// Mask of valid flags for the "from" side.
        const F_MASK =
            Self::F_SYMLINKS.bits() | Self::F_AUTOMOUNTS.bits() | Self::F_EMPTY_PATH.bits();

        /// Follow symlinks on the "to" path.
        const T_SYMLINKS    = 0x0000_0010;
        /// Trigger auto-mounts on the "to" path.
        const T_AUTOMOUNTS  = 0x0000_0020;
        /// Permit an empty "to" path to use the "to" file descriptor directly.
        const T_EMPTY_PATH  = 0x0000_0040;
    }
}

bitflags! {
    /// Flags for [`Mount::open_tree`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct OpenTree: c_uint {
        /// Clone the subtree at this point, creating a detached "bind" mount.
        /// Without this flag, `open_tree` behaves like `open` with `O_PATH`.
        const CLONE   = 0x0000_0001;

        /// Set the close-on-exec flag on the resulting file descriptor.
        const CLOEXEC = 0o0200_0000; // octal!

        /// Clone the whole tree of submounts instead of only the mount at the path.
        ///
        /// The value of this is the same as `AT_RECURSIVE`.
        const RECURSIVE = libc::AT_RECURSIVE as c_uint;
    }
}

/// The kernel's `struct mount_attr`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct RawMountAttr {
    /// `MOUNT_ATTR_*` flags to set.
    pub attr_set: u64,
    /// `MOUNT_ATTR_*` flags to clear.
    pub attr_clr: u64,
    /// An `MS_*` propagation type, `0` leaves it unchanged.
    pub propagation: u64,
    /// The user namespace file descriptor for [`MountAttr::IDMAP`].
    pub userns_fd: u64,
}

/// A `mount_setattr(2)` request. Borrows the user namespace file descriptor, if any, so it stays
/// open until the request has been applied.
#[derive(Clone, Debug, Default)]
#[repr(C)]
pub struct MountSetAttr<'a> {
    attr: RawMountAttr,
    _fd_lifetime: PhantomData<&'a ()>,
}

impl MountSetAttr<'_> {
    /// Create a new empty request.
    pub fn new() -> MountSetAttr<'static> {
        Default::default()
    }

    /// Set mount attributes.
    pub fn set(mut self, attr: MountAttr) -> Self {
        self.attr.attr_set |= attr.bits();
        self.attr.attr_clr &= !attr.bits();
        self
    }

    /// Clear mount attributes.
    pub fn clear(mut self, attr: MountAttr) -> Self {
        self.attr.attr_set &= !attr.bits();
        self.attr.attr_clr |= attr.bits();
        self
    }

    /// Set the propagation type to one of the `MS_PRIVATE`, `MS_SHARED`, `MS_SLAVE` or
    /// `MS_UNBINDABLE` flags.
    pub fn propagation(mut self, propagation: u64) -> Self {
        self.attr.propagation = propagation;
        self
    }

    /// Id-map the mount through the user namespace `userns`.
    pub fn idmap<'new, T: AsFd + ?Sized + 'new>(self, userns: &'new T) -> MountSetAttr<'new> {
        let idmap = MountAttr::IDMAP.bits();
        MountSetAttr::<'new> {
            attr: RawMountAttr {
                attr_set: self.attr.attr_set | idmap,
                attr_clr: self.attr.attr_clr & !idmap,
                userns_fd: userns.as_fd().as_raw_fd() as u64,
                ..self.attr
            },
            _fd_lifetime: PhantomData,
        }
    }

    /// The raw request as passed to the kernel.
    pub fn as_raw(&self) -> &RawMountAttr {
        &self.attr
    }
}

/// Handle to a mount tree, usually a detached clone created via [`Mount::open_tree`].
///
/// Dropping a detached mount which was never attached releases the clone.
#[derive(Debug)]
pub struct Mount {
    pub(crate) fd: OwnedFd,
}

impl AsFd for Mount {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Mount {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for Mount {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl FromRawFd for Mount {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl Mount {
    /// Open the mount tree at `path` (relative to the current working directory).
    ///
    /// With [`OpenTree::CLONE`] this creates a detached copy of the mount (and, with
    /// [`OpenTree::RECURSIVE`], of its submounts) which can later be attached somewhere via
    /// [`move_mount`](Self::move_mount). `at_flags` are additional `AT_*` flags such as
    /// `AT_EMPTY_PATH` or `AT_SYMLINK_NOFOLLOW`.
    pub fn open_tree<P>(path: &P, flags: OpenTree, at_flags: c_uint) -> io::Result<Self>
    where
        P: ?Sized + CPath,
    {
        path.c_path(move |path| Self::open_tree_raw(path, flags, at_flags))?
    }

    /// [`open_tree`](Self::open_tree) with an already converted path.
    pub fn open_tree_raw(path: &CStr, flags: OpenTree, at_flags: c_uint) -> io::Result<Self> {
        let rc = unsafe {
            libc::syscall(
                sys::SYS_open_tree,
                libc::AT_FDCWD,
                path.as_ptr(),
                flags.bits() | at_flags,
            )
        };
        io_assert!(rc >= 0);
        debug!(fd = rc, "open_tree({path:?}, {flags:?})");
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(rc as RawFd) },
        })
    }

    /// Attach this mount at `dest`.
    ///
    /// Only "to" side flags are accepted, the "from" side is always this file descriptor. Unless
    /// [`MoveMount::T_SYMLINKS`] is passed, a symlink at `dest` is not followed.
    pub fn move_mount<P>(&self, dest: &P, move_flags: MoveMount) -> io::Result<()>
    where
        P: ?Sized + CPath,
    {
        dest.c_path(move |dest| self.move_mount_raw(dest, move_flags))?
    }

    /// [`move_mount`](Self::move_mount) with an already converted path.
    pub fn move_mount_raw(&self, dest: &CStr, move_flags: MoveMount) -> io::Result<()> {
        if move_flags.intersects(MoveMount::F_MASK) {
            io_bail!("must not use source flags in move_mount()");
        }
        let move_flags = move_flags | MoveMount::F_EMPTY_PATH;

        let rc = unsafe {
            libc::syscall(
                sys::SYS_move_mount,
                self.fd.as_raw_fd(),
                c"".as_ptr(),
                libc::AT_FDCWD,
                dest.as_ptr(),
                move_flags.bits(),
            )
        };
        io_assert!(rc == 0);
        debug!(fd = self.fd.as_raw_fd(), "move_mount(.., {dest:?}, {move_flags:?})");
        Ok(())
    }

    /// Change attributes of this mount, or of the whole tree with `AT_RECURSIVE` in `at_flags`.
    pub fn setattr(&self, attr: &MountSetAttr, at_flags: c_int) -> io::Result<()> {
        let rc = unsafe {
            libc::syscall(
                sys::SYS_mount_setattr,
                self.fd.as_raw_fd(),
                c"".as_ptr(),
                libc::AT_EMPTY_PATH | at_flags,
                attr.as_raw(),
                std::mem::size_of::<RawMountAttr>(),
            )
        };
        io_assert!(rc == 0);
        debug!(fd = self.fd.as_raw_fd(), "mount_setattr({:?})", attr.as_raw());
        Ok(())
    }
}
