//! # bulkseal Core Library
//!
//! Packs a flat list of files into one container, transforming every file chunk by
//! chunk with AES, DES, 3DES, RSA or Base64, and restores it again.
//!
//! ## Key Modules
//!
//! - [`container`]: the binary container layout and its header codecs.
//! - [`crypto`]: per-chunk transforms and per-file key material.
//! - [`workers`]: confined and unconfined worker pools, cancellation.
//! - [`pack`] / [`extract`]: the pack and unpack pipelines.
//! - [`progress`]: per-call progress tracking and work estimation.
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::Path;
//! use bulkseal::{Algorithm, Config, Packer, Unpacker};
//!
//! # fn main() -> bulkseal::Result<()> {
//! let packer = Packer::new(Config::with_algorithm(Algorithm::Aes));
//! packer.pack(&["notes.txt", "photo.jpg"], Path::new("bundle.seal"))?;
//!
//! let unpacker = Unpacker::default();
//! for entry in unpacker.extract_info(Path::new("bundle.seal"))?.entries {
//!     println!("{} ({} bytes)", entry.name, entry.origin_size);
//! }
//! unpacker.unpack(Path::new("bundle.seal"), Path::new("restored"))?;
//! # Ok(())
//! # }
//! ```

pub mod algorithm;
pub mod cli;
pub mod cli_runner;
pub mod config;
pub mod container;
pub mod crypto;
pub mod error;
pub mod extract;
pub mod pack;
pub mod progress;
pub mod workers;

pub use algorithm::Algorithm;
pub use config::Config;
pub use error::{PackError, Result, SealError, UnpackError};
pub use extract::{ContainerInfo, EntryInfo, UnpackSummary, Unpacker};
pub use pack::{PackSummary, Packer};
pub use progress::{work_calculate, ProgressState, ProgressTracker};
pub use workers::{CancelToken, Pool};
