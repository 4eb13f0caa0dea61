//! Driving the namespace minting and mount grafting steps in order.

use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::Error;
use crate::idmap::IdMapSet;
use crate::mount;
use crate::userns::{self, Userns};

/// The program run with the caller's id mapping after a successful mount.
pub const CALLER_HELPER: &str = "lxc-usernsexec";

/// The steps used to create an id-mapped mount.
///
/// [`KernelBackend`] performs the actual syscalls, other implementations can be used to observe
/// the order in which the steps are taken.
pub trait Backend {
    /// Handle to a minted user namespace.
    type Namespace;

    /// Create a user namespace with the mappings in `idmap`.
    fn mint(&mut self, idmap: &IdMapSet) -> Result<Self::Namespace, Error>;

    /// Clone `source`, id-map the clone if `idmap` is set and attach it at `target`.
    fn graft(
        &mut self,
        source: &Path,
        target: &Path,
        idmap: Option<Self::Namespace>,
        recursive: bool,
    ) -> Result<(), Error>;
}

/// The [`Backend`] talking to the kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelBackend;

impl Backend for KernelBackend {
    type Namespace = Userns;

    fn mint(&mut self, idmap: &IdMapSet) -> Result<Userns, Error> {
        Ok(userns::mint(idmap)?)
    }

    fn graft(
        &mut self,
        source: &Path,
        target: &Path,
        idmap: Option<Userns>,
        recursive: bool,
    ) -> Result<(), Error> {
        Ok(mount::graft(source, target, idmap, recursive)?)
    }
}

/// An id-mapped mount of `source` at `target`.
#[derive(Clone, Debug)]
pub struct IdmappedMount {
    source: PathBuf,
    target: PathBuf,
    idmap: IdMapSet,
    recursive: bool,
}

impl IdmappedMount {
    /// Mount `source` at `target` without any id mapping and without submounts.
    pub fn new<S, T>(source: S, target: T) -> Self
    where
        S: Into<PathBuf>,
        T: Into<PathBuf>,
    {
        Self {
            source: source.into(),
            target: target.into(),
            idmap: IdMapSet::new(),
            recursive: false,
        }
    }

    /// Set the id mapping to apply to the mount. An empty set means no id mapping at all.
    pub fn idmap(mut self, idmap: IdMapSet) -> Self {
        self.idmap = idmap;
        self
    }

    /// Also clone and id-map all submounts of `source`.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// The source path.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The target path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Create the mount.
    pub fn run(&self) -> Result<(), Error> {
        self.run_with(&mut KernelBackend)
    }

    /// Create the mount using `backend`.
    ///
    /// A user namespace is only minted if there is at least one mapping.
    pub fn run_with<B: Backend>(&self, backend: &mut B) -> Result<(), Error> {
        let userns = if self.idmap.is_empty() {
            debug!("no id mappings given, cloning {:?} without id mapping", self.source);
            None
        } else {
            Some(backend.mint(&self.idmap)?)
        };

        backend.graft(&self.source, &self.target, userns, self.recursive)
    }
}

/// Build the command which runs a shell in a user namespace with the caller's id mapping.
///
/// `idmap` is passed through unparsed.
pub fn caller_helper_command(idmap: &str) -> Command {
    let mut command = Command::new(CALLER_HELPER);
    command.arg("-m").arg(idmap).arg("bash");
    command
}

/// Replace the current process with [`caller_helper_command`]. Only returns on failure.
pub fn exec_caller_helper(idmap: &str) -> Error {
    let source = caller_helper_command(idmap).exec();
    Error::Exec {
        program: CALLER_HELPER.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    use crate::idmap::{IdKind, IdMapEntry};
    use crate::mount::MountError;

    #[derive(Debug, PartialEq)]
    enum Call {
        Mint(IdMapSet),
        Graft {
            source: PathBuf,
            target: PathBuf,
            idmap: Option<u32>,
            recursive: bool,
        },
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        fail_mint: bool,
        minted: u32,
    }

    impl Backend for Recorder {
        type Namespace = u32;

        fn mint(&mut self, idmap: &IdMapSet) -> Result<u32, Error> {
            self.calls.push(Call::Mint(idmap.clone()));
            if self.fail_mint {
                return Err(Error::Namespace(userns::NamespaceError::ProcessSpawnFailed(
                    io::Error::from_raw_os_error(libc::EPERM),
                )));
            }
            self.minted += 1;
            Ok(self.minted)
        }

        fn graft(
            &mut self,
            source: &Path,
            target: &Path,
            idmap: Option<u32>,
            recursive: bool,
        ) -> Result<(), Error> {
            self.calls.push(Call::Graft {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                idmap,
                recursive,
            });
            Ok(())
        }
    }

    #[test]
    fn no_mappings_means_no_namespace() {
        let mut backend = Recorder::default();
        IdmappedMount::new("/source", "/target")
            .run_with(&mut backend)
            .unwrap();
        assert_eq!(
            backend.calls,
            [Call::Graft {
                source: "/source".into(),
                target: "/target".into(),
                idmap: None,
                recursive: false,
            }]
        );
    }

    #[test]
    fn namespace_is_minted_before_graft() {
        let idmap: IdMapSet = "b:0:10000:10000".parse().unwrap();
        let mut backend = Recorder::default();
        IdmappedMount::new("/source", "/target")
            .idmap(idmap.clone())
            .recursive(true)
            .run_with(&mut backend)
            .unwrap();
        assert_eq!(
            backend.calls,
            [
                Call::Mint(idmap),
                Call::Graft {
                    source: "/source".into(),
                    target: "/target".into(),
                    idmap: Some(1),
                    recursive: true,
                },
            ]
        );
    }

    #[test]
    fn separate_kinds_are_minted_together() {
        let mut idmap = IdMapSet::new();
        idmap.parse_into("u:0:10000:10000").unwrap();
        idmap.parse_into("g:0:20000:20000").unwrap();
        let mut backend = Recorder::default();
        IdmappedMount::new("/source", "/target")
            .idmap(idmap)
            .run_with(&mut backend)
            .unwrap();

        let Call::Mint(minted) = &backend.calls[0] else {
            panic!("expected a mint call first: {:?}", backend.calls);
        };
        assert_eq!(
            minted.iter().copied().collect::<Vec<_>>(),
            [
                IdMapEntry::new(IdKind::Uid, 0, 10000, 10000),
                IdMapEntry::new(IdKind::Gid, 0, 20000, 20000),
            ]
        );
        assert_eq!(backend.calls.len(), 2);
    }

    #[test]
    fn failed_mint_skips_graft() {
        let mut backend = Recorder {
            fail_mint: true,
            ..Default::default()
        };
        let err = IdmappedMount::new("/source", "/target")
            .idmap("u:0:1000:1".parse().unwrap())
            .run_with(&mut backend)
            .unwrap_err();
        assert!(matches!(err, Error::Namespace(_)), "{err}");
        assert_eq!(backend.calls.len(), 1);
    }

    #[test]
    fn kernel_backend_reports_detach_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("missing");
        let err = IdmappedMount::new(&source, dir.path())
            .run()
            .unwrap_err();
        match err {
            Error::Mount(MountError::DetachFailed { path, .. }) => assert_eq!(path, source),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn caller_helper_gets_the_map_verbatim() {
        let command = caller_helper_command("u:0:10000:10000 g:0:20000:20000");
        assert_eq!(command.get_program(), CALLER_HELPER);
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["-m", "u:0:10000:10000 g:0:20000:20000", "bash"]);
    }
}
