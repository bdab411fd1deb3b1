//! # Unpack Pipeline
//!
//! Reads a container back: header inspection without touching payloads,
//! bulk extraction to a directory, and single-entry extraction to memory or disk.
//! The algorithm comes from the container's `Type` tag; chunk sizes come from
//! [`Config`] and must match the ones used when packing.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use scopeguard::ScopeGuard;
use tracing::{debug, info, warn};

use crate::algorithm::Algorithm;
use crate::config::Config;
use crate::container::{self, EntryHeader, EntryRecord};
use crate::crypto;
use crate::error::{Result, SealError};
use crate::progress::{padded_size, ProgressTracker};
use crate::workers::{CancelToken, Pool};

/// One entry as listed by [`Unpacker::extract_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub origin_size: u64,
    pub crypt_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub author: String,
    pub algorithm: Algorithm,
    pub entries: Vec<EntryInfo>,
}

impl ContainerInfo {
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn sizes(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.origin_size).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackSummary {
    pub algorithm: Algorithm,
    /// Files written, in container order.
    pub written: Vec<PathBuf>,
    pub origin_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Unpacker {
    config: Config,
}

impl Unpacker {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Headers only: entry names and original sizes, no payload is decoded.
    pub fn extract_info(&self, src: &Path) -> Result<ContainerInfo> {
        let file = File::open(src).map_err(SealError::io(src))?;
        let len = file.metadata().map_err(SealError::io(src))?.len();
        let index = container::scan(&mut BufReader::new(file), len, src)?;

        let entries = index
            .entries
            .iter()
            .map(|loc| {
                Ok(EntryInfo {
                    name: loc.header.name()?,
                    origin_size: loc.header.origin_size() as u64,
                    crypt_size: loc.header.crypt_size() as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ContainerInfo {
            name: index.header.name()?,
            author: index.header.author()?,
            algorithm: index.algorithm,
            entries,
        })
    }

    /// Units an unpack of `src` will report.
    pub fn work_calculate(&self, src: &Path) -> Result<u64> {
        self.config.validate()?;
        let info = self.extract_info(src)?;
        let buffer = self.config.buffer_size(info.algorithm);
        Ok(info.entries.iter().map(|e| padded_size(e.origin_size, buffer)).sum())
    }

    pub fn unpack(&self, src: &Path, dest_dir: &Path) -> Result<UnpackSummary> {
        self.unpack_with(src, dest_dir, &ProgressTracker::default(), &CancelToken::new())
    }

    /// Restore every entry into `dest_dir`. When several entries share a name,
    /// only the last one is written.
    pub fn unpack_with(
        &self,
        src: &Path,
        dest_dir: &Path,
        progress: &ProgressTracker,
        cancel: &CancelToken,
    ) -> Result<UnpackSummary> {
        self.config.validate()?;
        progress.reset();
        let started = Instant::now();

        let bytes = fs::read(src).map_err(SealError::io(src))?;
        let (index, records) = container::parse(&bytes)?;
        let algorithm = index.algorithm;

        let names = records
            .iter()
            .map(|r| safe_name(&r.header))
            .collect::<Result<Vec<_>>>()?;
        let last_index: HashMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let jobs: Vec<(&EntryRecord<'_>, &str)> = records
            .iter()
            .zip(&names)
            .enumerate()
            .filter(|(i, (_, name))| last_index.get(name.as_str()) == Some(i))
            .map(|(_, (record, name))| (record, name.as_str()))
            .collect();

        let buffer = self.config.buffer_size(algorithm);
        let units: u64 = jobs
            .iter()
            .map(|(r, _)| padded_size(r.header.origin_size() as u64, buffer))
            .sum();
        progress.set_totals(jobs.len() as u64, units);

        fs::create_dir_all(dest_dir).map_err(SealError::io(dest_dir))?;
        let file_pool = Pool::for_files(&self.config);
        let written = file_pool.run(jobs, cancel, |_, (record, name)| {
            let out = dest_dir.join(name);
            self.open_entry(algorithm, record, progress, cancel)
                .and_then(|data| write_entry(&out, &data).map(|()| data.len()))
                .map(|len| {
                    progress.record_file();
                    debug!(entry = name, path = %out.display(), len, "restored entry");
                    (out, len as u64)
                })
                .map_err(|e| {
                    warn!(entry = name, error = %e, "failed to restore entry");
                    e.for_entry(name)
                })
        })?;
        progress.force_completion();

        let origin_bytes: u64 = written.iter().map(|(_, len)| len).sum();
        info!(
            src = %src.display(),
            algorithm = %algorithm,
            entries = written.len(),
            origin_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "unpack complete"
        );
        Ok(UnpackSummary {
            algorithm,
            written: written.into_iter().map(|(path, _)| path).collect(),
            origin_bytes,
        })
    }

    /// Restore the first entry named `target` and return its bytes.
    pub fn unpack_to_memory(&self, src: &Path, target: &str) -> Result<Vec<u8>> {
        self.config.validate()?;
        let bytes = fs::read(src).map_err(SealError::io(src))?;
        let (index, records) = container::parse(&bytes)?;
        let record = find_entry(&records, target)?;
        self.open_entry(index.algorithm, record, &ProgressTracker::default(), &CancelToken::new())
            .map_err(|e| e.for_entry(target))
    }

    /// Restore the first entry named `target` into `dest_dir`, returning the written path.
    pub fn unpack_entry_to_file(
        &self,
        src: &Path,
        target: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        self.config.validate()?;
        let bytes = fs::read(src).map_err(SealError::io(src))?;
        let (index, records) = container::parse(&bytes)?;
        let record = find_entry(&records, target)?;
        let name = safe_name(&record.header)?;

        let data = self
            .open_entry(index.algorithm, record, &ProgressTracker::default(), &CancelToken::new())
            .map_err(|e| e.for_entry(target))?;
        fs::create_dir_all(dest_dir).map_err(SealError::io(dest_dir))?;
        let out = dest_dir.join(name);
        write_entry(&out, &data)?;
        debug!(entry = target, path = %out.display(), "restored single entry");
        Ok(out)
    }

    /// Inverse-transform one payload on its own chunk pool.
    fn open_entry(
        &self,
        algorithm: Algorithm,
        record: &EntryRecord<'_>,
        progress: &ProgressTracker,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let header = &record.header;
        let cipher = crypto::open(algorithm, &header.key, &header.iv)?;
        let buffer = self.config.buffer_size(algorithm) as u64;
        let stride = self.config.crypt_chunk_size(algorithm);

        let pieces: Vec<&[u8]> = record.payload.chunks(stride).collect();
        let chunk_pool = Pool::for_chunks(&self.config);
        let plain = chunk_pool
            .run(pieces, cancel, |_, piece| {
                let out = cipher.inverse(piece)?;
                progress.record_chunk(buffer);
                Ok(out)
            })?
            .concat();

        if plain.len() != header.origin_size() {
            return Err(SealError::SizeMismatch {
                name: header.name.to_text_lossy(),
                expected: header.origin_size(),
                actual: plain.len(),
            });
        }
        Ok(plain)
    }
}

fn find_entry<'r, 'a>(records: &'r [EntryRecord<'a>], target: &str) -> Result<&'r EntryRecord<'a>> {
    records
        .iter()
        .find(|r| r.header.name.trimmed() == target.as_bytes())
        .ok_or_else(|| SealError::EntryNotFound { name: target.to_owned() })
}

fn safe_name(header: &EntryHeader) -> Result<String> {
    let name = header.name()?;
    container::check_entry_name(&name)?;
    Ok(name)
}

/// Write a restored entry; a partially written file is removed again on failure.
fn write_entry(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(SealError::io(path))?;
    let cleanup = scopeguard::guard(path, |p| {
        let _ = fs::remove_file(p);
    });
    file.write_all(data).map_err(SealError::io(path))?;
    ScopeGuard::into_inner(cleanup);
    Ok(())
}
