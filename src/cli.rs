use std::path::PathBuf;

use clap::Parser;

use mount_idmapped::Error;
use mount_idmapped::idmap::IdMapSet;
use mount_idmapped::orchestrate::IdmappedMount;

#[derive(Debug, Parser)]
#[command(name = "mount-idmapped")]
#[command(version, about = "Create an id-mapped mount", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Create an idmapped mount of /source on /target with both ('b') uids and gids mapped
    mount-idmapped --map-mount b:0:10000:10000 /source /target

    # Create an idmapped mount of /source on /target
    # with uids ('u') and gids ('g') mapped separately
    mount-idmapped --map-mount u:0:10000:10000 --map-mount g:0:20000:20000 /source /target

    # Create an idmapped mount of /source on /target
    # and enter a user namespace with both ('b') uids and gids mapped afterwards
    mount-idmapped --map-caller b:0:10000:10000 --map-mount b:0:10000:1000 /source /target

    # To idmap a whole mount tree pass --recursive
    mount-idmapped --recursive --map-mount b:0:10000:10000 /source /target
")]
pub struct Cli {
    /// Id mapping for the mount, <u|g|b>:<ns id>:<host id>:<range> (repeatable)
    #[arg(long = "map-mount", value_name = "MAP")]
    pub map_mount: Vec<String>,

    /// Id mapping of a user namespace to run a shell in after mounting (via lxc-usernsexec)
    #[arg(long = "map-caller", value_name = "MAP")]
    pub map_caller: Option<String>,

    /// Clone and id-map the whole mount tree below the source
    #[arg(long)]
    pub recursive: bool,

    /// Show debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// The directory to clone
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Where to attach the clone
    #[arg(value_name = "TARGET")]
    pub target: Option<PathBuf>,
}

impl Cli {
    /// Turn the arguments into a mount plan. The mount idmaps are validated before the paths.
    pub fn plan(&self) -> Result<IdmappedMount, Error> {
        let mut idmap = IdMapSet::new();
        for spec in &self.map_mount {
            idmap.parse_into(spec)?;
        }

        let (Some(source), Some(target)) = (&self.source, &self.target) else {
            return Err(Error::MissingArgument);
        };

        Ok(IdmappedMount::new(source, target)
            .idmap(idmap)
            .recursive(self.recursive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mount-idmapped").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn repeated_map_mount() {
        let cli = parse(&[
            "--map-mount",
            "u:0:10000:10000",
            "--map-mount=g:0:20000:20000",
            "--recursive",
            "/source",
            "/target",
        ]);
        assert_eq!(cli.map_mount, ["u:0:10000:10000", "g:0:20000:20000"]);
        assert!(cli.recursive);

        let plan = cli.plan().unwrap();
        assert_eq!(plan.source(), std::path::Path::new("/source"));
        assert_eq!(plan.target(), std::path::Path::new("/target"));
    }

    #[test]
    fn caller_map_is_kept_verbatim() {
        let cli = parse(&["--map-caller", "b:0:10000:10000", "/a", "/b"]);
        assert_eq!(cli.map_caller.as_deref(), Some("b:0:10000:10000"));
        assert!(cli.map_mount.is_empty());
    }

    #[test]
    fn missing_target() {
        let cli = parse(&["--map-mount", "b:0:10000:10000", "/source"]);
        assert!(matches!(cli.plan(), Err(Error::MissingArgument)));
        assert!(matches!(parse(&[]).plan(), Err(Error::MissingArgument)));
    }

    #[test]
    fn bad_map_wins_over_missing_paths() {
        let cli = parse(&["--map-mount", "x:0:10000:10000"]);
        match cli.plan() {
            Err(Error::Parse(err)) => assert_eq!(err.spec(), "x:0:10000:10000"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
