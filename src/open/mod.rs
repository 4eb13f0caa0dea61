//! Small `openat2(2)` builder, used to reach into a helper process' `/proc/<pid>` directory.

use std::ffi::CStr;
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use crate::CPath;

/// The kernel's `struct open_how`.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct RawOpenHow {
    /// The `O_*` flags used to open a file.
    pub flags: u64,
    /// The `mode` bits used to create a new file.
    pub mode: u64,
    /// The `RESOLVE_*` flags.
    pub resolve: u64,
}

impl RawOpenHow {
    /// `O_CLOEXEC | O_NOCTTY` with a mode of `0o000` and no resolve flags.
    pub const fn new() -> Self {
        Self {
            flags: (libc::O_CLOEXEC | libc::O_NOCTTY) as u64,
            mode: 0,
            resolve: 0,
        }
    }
}

impl Default for RawOpenHow {
    fn default() -> Self {
        Self::new()
    }
}

/// A "builder" style `openat2(2)` interface. Relative paths are resolved against the current
/// working directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenHow {
    /// The raw `struct open_how`.
    pub how: RawOpenHow,
}

impl OpenHow {
    const fn with_flags(flags: libc::c_int) -> Self {
        let mut how = RawOpenHow::new();
        how.flags |= flags as u64;
        Self { how }
    }

    /// `O_RDONLY | O_CLOEXEC | O_NOCTTY`.
    pub const fn new_read() -> Self {
        Self::with_flags(libc::O_RDONLY)
    }

    /// `O_WRONLY | O_CLOEXEC | O_NOCTTY`.
    pub const fn new_write() -> Self {
        Self::with_flags(libc::O_WRONLY)
    }

    /// Disallow the *final* path component to be a symlink (`O_NOFOLLOW`).
    ///
    /// Must not be used for magic links such as `/proc/<pid>/ns/user`, opening those fails with
    /// `ELOOP`.
    pub fn no_final_symlink(mut self, on: bool) -> Self {
        let flag = libc::O_NOFOLLOW as u64;
        if on {
            self.how.flags |= flag;
        } else {
            self.how.flags &= !flag;
        }
        self
    }

    /// Open the path.
    pub fn open<P>(&self, path: &P) -> io::Result<OwnedFd>
    where
        P: ?Sized + CPath,
    {
        path.c_path(|path| self.open_raw(path))?
    }

    /// This is [`open`](OpenHow::open()) with an already converted path.
    pub fn open_raw(&self, path: &CStr) -> io::Result<OwnedFd> {
        let res = unsafe {
            libc::syscall(
                libc::SYS_openat2,
                libc::AT_FDCWD,
                path.as_ptr(),
                &self.how,
                std::mem::size_of_val(&self.how),
            )
        };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(res as RawFd) })
    }

    /// Open the path as a `std::fs::File`.
    pub fn open_file<P>(&self, path: &P) -> io::Result<File>
    where
        P: ?Sized + CPath,
    {
        self.open(path).map(File::from)
    }
}
