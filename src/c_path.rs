//! Conversion of Rust paths into the NUL terminated strings the syscalls want.

use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Something usable as a path argument to a raw syscall.
///
/// Paths containing an interior NUL byte produce an `io::ErrorKind::InvalidInput` error instead
/// of being silently cut short.
pub trait CPath {
    /// Call `func` with a `CStr` version of `self`.
    fn c_path<R, F>(&self, func: F) -> io::Result<R>
    where
        F: FnOnce(&CStr) -> R;
}

fn with_bytes<R, F>(bytes: &[u8], func: F) -> io::Result<R>
where
    F: FnOnce(&CStr) -> R,
{
    let path = CString::new(bytes).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("null byte in path {:?}", OsStr::from_bytes(bytes)),
        )
    })?;
    Ok(func(&path))
}

impl CPath for OsStr {
    fn c_path<R, F>(&self, func: F) -> io::Result<R>
    where
        F: FnOnce(&CStr) -> R,
    {
        with_bytes(self.as_bytes(), func)
    }
}

impl CPath for Path {
    fn c_path<R, F>(&self, func: F) -> io::Result<R>
    where
        F: FnOnce(&CStr) -> R,
    {
        self.as_os_str().c_path(func)
    }
}

impl CPath for PathBuf {
    fn c_path<R, F>(&self, func: F) -> io::Result<R>
    where
        F: FnOnce(&CStr) -> R,
    {
        self.as_os_str().c_path(func)
    }
}

impl CPath for str {
    fn c_path<R, F>(&self, func: F) -> io::Result<R>
    where
        F: FnOnce(&CStr) -> R,
    {
        with_bytes(self.as_bytes(), func)
    }
}

impl CPath for String {
    fn c_path<R, F>(&self, func: F) -> io::Result<R>
    where
        F: FnOnce(&CStr) -> R,
    {
        self.as_str().c_path(func)
    }
}

impl CPath for CStr {
    fn c_path<R, F>(&self, func: F) -> io::Result<R>
    where
        F: FnOnce(&CStr) -> R,
    {
        Ok(func(self))
    }
}
