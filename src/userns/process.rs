//! The throwaway process owning a freshly created user namespace.

use std::ffi::{c_int, c_void};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::{debug, warn};

/// Stack size for the helper. It only ever calls `kill(2)`.
const STACK_SIZE: usize = 64 * 1024;

extern "C" fn stop_self(_arg: *mut c_void) -> c_int {
    // Stay alive (but idle) until the parent has configured the namespace and kills us.
    unsafe { libc::kill(libc::getpid(), libc::SIGSTOP) }
}

/// A child process created in new namespaces which stops itself right away.
///
/// Dropping this kills and reaps the process, so it cannot outlive the scope which spawned it.
#[derive(Debug)]
pub(crate) struct HelperProcess {
    pid: libc::pid_t,
    pid_fd: OwnedFd,
}

impl HelperProcess {
    /// `clone(2)` a helper into the namespaces given as `CLONE_NEW*` flags.
    pub fn spawn(namespaces: c_int) -> io::Result<Self> {
        let mut pid_fd: c_int = -1;

        // Without CLONE_VM the child runs on its own copy of this buffer, so the parent may free
        // it as soon as clone() returns.
        let mut stack = vec![0u8; STACK_SIZE].into_boxed_slice();
        let stack_top = unsafe { stack.as_mut_ptr().add(STACK_SIZE) };
        let stack_top = (stack_top as usize & !0xf) as *mut c_void;

        let pid = unsafe {
            libc::clone(
                stop_self,
                stack_top,
                namespaces | libc::CLONE_PIDFD | libc::SIGCHLD,
                std::ptr::null_mut(),
                &raw mut pid_fd as *mut libc::pid_t,
            )
        };
        drop(stack);

        if pid < 0 {
            return Err(io::Error::last_os_error());
        }
        let pid_fd = unsafe { OwnedFd::from_raw_fd(pid_fd) };
        debug!(pid, "spawned namespace helper process");

        Ok(Self { pid, pid_fd })
    }

    /// The helper's pid, valid until this guard is dropped.
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Path to a file in the helper's `/proc` directory.
    pub fn proc_path(&self, file: &str) -> String {
        format!("/proc/{}/{file}", self.pid)
    }

    fn kill(&self) {
        let rc = unsafe {
            libc::syscall(
                libc::SYS_pidfd_send_signal,
                self.pid_fd.as_raw_fd(),
                libc::SIGKILL,
                std::ptr::null::<c_void>(),
                0,
            )
        };
        if rc != 0 {
            // the process is our unreaped child, so the pid cannot have been reused
            unsafe { libc::kill(self.pid, libc::SIGKILL) };
        }
    }

    fn reap(&self) -> io::Result<()> {
        loop {
            let rc = unsafe { libc::waitpid(self.pid, std::ptr::null_mut(), 0) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if rc == self.pid {
                return Ok(());
            }
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        self.kill();
        match self.reap() {
            Ok(()) => debug!(pid = self.pid, "reaped namespace helper process"),
            Err(err) => warn!(pid = self.pid, "failed to reap namespace helper process: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whether `pid` is a child of ours which has not been reaped yet.
    fn is_unreaped_child(pid: libc::pid_t) -> bool {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WSTOPPED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        rc == 0
    }

    #[test]
    fn helper_is_reaped_on_drop() {
        // a plain mount namespace needs privileges, a user namespace usually does not
        let helper = match HelperProcess::spawn(libc::CLONE_NEWUSER) {
            Ok(helper) => helper,
            Err(err) => {
                eprintln!("skipping, cannot create user namespaces: {err}");
                return;
            }
        };
        let pid = helper.pid();
        assert!(pid > 0);
        assert_eq!(helper.proc_path("uid_map"), format!("/proc/{pid}/uid_map"));
        assert!(is_unreaped_child(pid));

        drop(helper);
        assert!(!is_unreaped_child(pid));
    }
}
