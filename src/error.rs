//! Error types and common error handling helpers.

#![allow(unused_macros)]
#![allow(unused_imports)]

use std::io;

use thiserror::Error as ThisError;

/// Like failure's `format_err` but producing a `std::io::Error`.
macro_rules! io_format_err {
    ($($msg:tt)+) => {
        ::std::io::Error::new(::std::io::ErrorKind::Other, format!($($msg)+))
    };
}
pub(crate) use io_format_err;

/// Like failure's `bail` but producing a `std::io::Error`.
macro_rules! io_bail {
    ($($msg:tt)+) => {{
        return Err($crate::error::io_format_err!($($msg)+));
    }};
}
pub(crate) use io_bail;

/// Shortcut to return an `io::Error::last_os_error`.
macro_rules! io_bail_last {
    () => {
        return Err(::std::io::Error::last_os_error().into());
    };
}
pub(crate) use io_bail_last;

/// Non-panicking assertion: shortcut for returning an `io::Error` if the condition is not met.
/// Essentially: `if !expr { io_bail_last!() }`.
macro_rules! io_assert {
    ($value:expr) => {
        if !$value {
            $crate::error::io_bail_last!();
        }
    };
}
pub(crate) use io_assert;

/// Everything that can go wrong while creating an id-mapped mount.
///
/// Every variant is terminal: nothing is retried and nothing already done by an earlier stage is
/// rolled back.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// A `--map-mount` style id mapping could not be parsed.
    #[error(transparent)]
    Parse(#[from] crate::idmap::ParseIdMapError),

    /// Creating the throwaway user namespace failed.
    #[cfg(feature = "userns")]
    #[error(transparent)]
    Namespace(#[from] crate::userns::NamespaceError),

    /// Cloning, id-mapping or attaching the mount tree failed.
    #[cfg(feature = "mount")]
    #[error(transparent)]
    Mount(#[from] crate::mount::MountError),

    /// The source or target path was not provided.
    #[error("missing source or target mountpoint")]
    MissingArgument,

    /// Replacing the process image with the caller side helper failed.
    #[error("failed to execute {program:?}")]
    Exec {
        /// The program which could not be executed.
        program: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// The OS error at the bottom of this error, if there is one.
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            Error::Parse(_) | Error::MissingArgument => None,
            #[cfg(feature = "userns")]
            Error::Namespace(err) => err.os_error(),
            #[cfg(feature = "mount")]
            Error::Mount(err) => Some(err.os_error()),
            Error::Exec { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_argument_message() {
        assert_eq!(
            Error::MissingArgument.to_string(),
            "missing source or target mountpoint"
        );
        assert!(Error::MissingArgument.os_error().is_none());
    }

    #[test]
    fn exec_error_keeps_os_error() {
        let err = Error::Exec {
            program: "lxc-usernsexec".to_string(),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert_eq!(err.to_string(), "failed to execute \"lxc-usernsexec\"");
        assert_eq!(err.os_error().and_then(|e| e.raw_os_error()), Some(libc::ENOENT));
    }

    #[test]
    fn io_assert_returns_last_os_error() {
        fn fails() -> io::Result<()> {
            let rc = unsafe { libc::close(-1) };
            io_assert!(rc == 0);
            Ok(())
        }

        let err = fails().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
