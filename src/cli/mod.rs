use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::algorithm::Algorithm;
use crate::config::Config;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON config file. Environment variables (BULKSEAL_*) and flags override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Worker threads per pool. [0 = auto-detect based on CPU cores]
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Use the unconfined pools (one thread per task, no backpressure).
    #[arg(long, global = true)]
    pub unconfined: bool,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Pack files into a sealed container.
    #[command(alias = "p")]
    Pack {
        /// Files to pack. Entry names are their base names.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// The container file to write. Its base name must fit in 32 bytes.
        #[arg(short, long)]
        output: PathBuf,

        /// Transform applied to every file. Defaults to the configured algorithm.
        #[arg(short, long, value_enum)]
        algorithm: Option<Algorithm>,

        /// Show a progress line on stderr.
        #[arg(long)]
        progress: bool,

        /// Give up after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Restore files from a container.
    #[command(alias = "x")]
    Unpack {
        #[arg(required = true)]
        container: PathBuf,

        /// Directory to restore into. Defaults to the current directory.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Restore only this entry.
        #[arg(long)]
        entry: Option<String>,

        /// Write the restored entry to stdout instead of a file. Requires --entry.
        #[arg(long, requires = "entry")]
        stdout: bool,

        /// Show a progress line on stderr.
        #[arg(long)]
        progress: bool,

        /// Give up after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// List the entries of a container without decoding payloads.
    #[command(alias = "l")]
    List {
        #[arg(required = true)]
        container: PathBuf,
    },

    /// Print the work units a pack of the given files will report.
    Work {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_enum)]
        algorithm: Option<Algorithm>,
    },
}

impl Args {
    /// Resolve configuration: file, then environment, then command-line flags.
    pub fn resolve_config(&self, algorithm: Option<Algorithm>) -> Result<Config> {
        let base = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::default(),
        };
        let mut config = base.with_env_overrides()?;
        if let Some(algorithm) = algorithm {
            config.algorithm = algorithm;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if self.unconfined {
            config.confined = false;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_pack() {
        let args = Args::try_parse_from([
            "bulkseal", "pack", "a.txt", "b.txt", "-o", "out.seal", "--algorithm", "3des",
            "--unconfined",
        ])
        .unwrap();
        assert!(args.unconfined);
        match &args.command {
            Commands::Pack { inputs, output, algorithm, .. } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(output, Path::new("out.seal"));
                assert_eq!(*algorithm, Some(Algorithm::TripleDes));
            }
            other => panic!("unexpected {other:?}"),
        }
        let config = args.resolve_config(Some(Algorithm::TripleDes)).unwrap();
        assert!(!config.confined);
        assert_eq!(config.algorithm, Algorithm::TripleDes);
    }

    #[test]
    fn stdout_requires_entry() {
        assert!(Args::try_parse_from(["bulkseal", "unpack", "c.seal", "--stdout"]).is_err());
    }
}
