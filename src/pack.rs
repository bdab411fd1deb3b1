//! Pack pipeline: source files in, one sealed container out.
//!
//! Files are sealed in parallel on a file-level [`Pool`]; inside each file the
//! chunks are transformed on a chunk-level pool of their own. Every task writes
//! into its own index slot, so the container is assembled in source order no
//! matter which task finishes first.

use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::algorithm::Algorithm;
use crate::config::Config;
use crate::container::{
    self, ContainerHeader, EntryHeader, EntryLayout, AUTHOR, CONTAINER_HEADER_LEN, NAME_WIDTH,
};
use crate::crypto::{self, ChunkTransform};
use crate::error::{Result, SealError};
use crate::progress::{self, ProgressTracker};
use crate::workers::{CancelToken, Pool};

/// What a finished pack produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub algorithm: Algorithm,
    pub entries: usize,
    pub origin_bytes: u64,
    pub container_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Packer {
    config: Config,
}

impl Packer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Units a pack of `src` will report, from file sizes alone.
    pub fn work_calculate<P: AsRef<Path>>(&self, src: &[P]) -> Result<u64> {
        self.config.validate()?;
        progress::work_calculate(src, self.config.buffer_size(self.config.algorithm))
    }

    pub fn pack<P: AsRef<Path>>(&self, src: &[P], dest: &Path) -> Result<PackSummary> {
        self.pack_with(src, dest, &ProgressTracker::default(), &CancelToken::new())
    }

    /// Pack `src` into `dest`, reporting to `progress` and stopping between
    /// tasks once `cancel` trips.
    ///
    /// The container is written through a temporary file in the destination
    /// directory and moved into place, so a failed pack leaves no `dest` behind.
    pub fn pack_with<P: AsRef<Path>>(
        &self,
        src: &[P],
        dest: &Path,
        progress: &ProgressTracker,
        cancel: &CancelToken,
    ) -> Result<PackSummary> {
        self.config.validate()?;
        progress.reset();
        let started = Instant::now();

        let container_name = dest_name(dest)?;
        if src.is_empty() {
            return Err(SealError::EmptyInput);
        }
        let names = src
            .iter()
            .map(|p| entry_name(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let algorithm = self.config.algorithm;
        let header = ContainerHeader::new(container_name, AUTHOR, algorithm.tag(), src.len())?;
        progress.set_totals(src.len() as u64, self.work_calculate(src)?);

        let jobs: Vec<(&Path, &str)> =
            src.iter().map(|p| p.as_ref()).zip(names.iter().map(String::as_str)).collect();
        let file_pool = Pool::for_files(&self.config);
        let records = file_pool.run(jobs, cancel, |_, (path, name)| {
            self.seal_file(path, name, progress, cancel).map_err(|e| {
                warn!(path = %path.display(), error = %e, "failed to seal file");
                e.for_entry(path)
            })
        })?;

        let mut container = Vec::with_capacity(
            CONTAINER_HEADER_LEN + records.iter().map(|r| r.bytes.len()).sum::<usize>(),
        );
        container.extend_from_slice(&header.encode());
        let mut origin_bytes = 0u64;
        for record in &records {
            container.extend_from_slice(&record.bytes);
            origin_bytes += record.origin_size as u64;
        }

        cancel.check()?;
        write_container(dest, &container)?;
        progress.force_completion();

        let summary = PackSummary {
            algorithm,
            entries: records.len(),
            origin_bytes,
            container_bytes: container.len() as u64,
        };
        info!(
            dest = %dest.display(),
            algorithm = %algorithm,
            entries = summary.entries,
            origin_bytes,
            container_bytes = summary.container_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pack complete"
        );
        Ok(summary)
    }

    /// Read one file, seal it chunk by chunk and return its encoded entry.
    fn seal_file(
        &self,
        path: &Path,
        name: &str,
        progress: &ProgressTracker,
        cancel: &CancelToken,
    ) -> Result<SealedEntry> {
        let algorithm = self.config.algorithm;
        let buffer_size = self.config.buffer_size(algorithm);

        let data = fs::read(path).map_err(SealError::io(path))?;
        let (material, cipher) = crypto::generate(algorithm)?;
        let chunk_pool = Pool::for_chunks(&self.config);
        let payload =
            seal_chunks(&chunk_pool, cipher.as_ref(), &data, buffer_size, progress, cancel)?;
        if payload.is_empty() && !data.is_empty() {
            return Err(SealError::EmptyPayload { path: path.to_path_buf() });
        }

        let layout = EntryLayout::for_algorithm(algorithm);
        let header =
            EntryHeader::new(layout, name, &material.key, &material.iv, data.len(), payload.len())?;
        let mut bytes = Vec::with_capacity(layout.len() + payload.len());
        header.encode_into(&mut bytes);
        bytes.extend_from_slice(&payload);

        progress.record_file();
        debug!(
            path = %path.display(),
            origin_size = data.len(),
            crypt_size = payload.len(),
            chunks = data.len().div_ceil(buffer_size),
            "sealed file"
        );
        Ok(SealedEntry { bytes, origin_size: data.len() })
    }
}

struct SealedEntry {
    bytes: Vec<u8>,
    origin_size: usize,
}

/// Split `data` into `buffer_size` chunks, transform them on `pool` and join the
/// results in chunk order.
pub fn seal_chunks(
    pool: &Pool,
    cipher: &dyn ChunkTransform,
    data: &[u8],
    buffer_size: usize,
    progress: &ProgressTracker,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let chunks: Vec<&[u8]> = data.chunks(buffer_size).collect();
    let sealed = pool.run(chunks, cancel, |_, chunk| {
        let out = cipher.transform(chunk)?;
        progress.record_chunk(buffer_size as u64);
        Ok(out)
    })?;
    Ok(sealed.concat())
}

/// Base name stored in an entry header. Checked before any file is read.
fn entry_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| SealError::UnsafeEntryName { name: path.display().to_string() })?;
    container::check_entry_name(name)?;
    Ok(name.to_owned())
}

fn dest_name(dest: &Path) -> Result<&str> {
    let name = dest
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| SealError::UnsafeEntryName { name: dest.display().to_string() })?;
    if name.len() > NAME_WIDTH {
        return Err(SealError::DestNameTooLong { name: name.to_owned(), capacity: NAME_WIDTH });
    }
    Ok(name)
}

fn write_container(dest: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(SealError::io(dir))?;
    tmp.write_all(bytes).map_err(SealError::io(tmp.path()))?;
    tmp.persist(dest).map_err(|e| SealError::io(dest)(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container;
    use rand::{Rng, RngCore};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_files(dir: &Path, sizes: &[usize]) -> Vec<PathBuf> {
        let mut rng = rand::thread_rng();
        sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let path = dir.join(format!("file_{i}.bin"));
                let mut data = vec![0u8; n];
                rng.fill_bytes(&mut data);
                fs::write(&path, data).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_chunk_parallel_output_is_deterministic() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let cipher = crypto::open(Algorithm::Aes, &key, &iv).unwrap();
        let buffer = 128;
        let mut data = vec![0u8; buffer * 40];
        rand::thread_rng().fill_bytes(&mut data);

        let tracker = ProgressTracker::default();
        let token = CancelToken::new();
        let expected: Vec<u8> =
            data.chunks(buffer).flat_map(|c| cipher.transform(c).unwrap()).collect();

        for _ in 0..5 {
            let confined = Pool::confined(3, 8);
            let a = seal_chunks(&confined, cipher.as_ref(), &data, buffer, &tracker, &token)
                .unwrap();
            let unconfined = Pool::unconfined();
            let b = seal_chunks(&unconfined, cipher.as_ref(), &data, buffer, &tracker, &token)
                .unwrap();
            assert_eq!(a, expected);
            assert_eq!(b, expected);
            assert!(confined.peak().unwrap() <= 3);
        }
    }

    #[test]
    fn test_container_layout_follows_source_order() {
        let dir = TempDir::new().unwrap();
        let src = write_files(dir.path(), &[10, 300, 0, 128]);
        let dest = dir.path().join("out.seal");

        let packer = Packer::new(Config::with_algorithm(Algorithm::Des));
        let summary = packer.pack(&src, &dest).unwrap();
        assert_eq!(summary.entries, 4);
        assert_eq!(summary.origin_bytes, 438);

        let bytes = fs::read(&dest).unwrap();
        assert_eq!(bytes.len() as u64, summary.container_bytes);
        let (index, records) = container::parse(&bytes).unwrap();
        assert_eq!(index.header.name().unwrap(), "out.seal");
        assert_eq!(index.header.author().unwrap(), AUTHOR);
        assert_eq!(index.algorithm, Algorithm::Des);
        assert_eq!(index.header.number, 4);

        let names: Vec<_> = records.iter().map(|r| r.header.name().unwrap()).collect();
        assert_eq!(names, ["file_0.bin", "file_1.bin", "file_2.bin", "file_3.bin"]);
        let sizes: Vec<_> = records.iter().map(|r| r.header.origin_size()).collect();
        assert_eq!(sizes, [10, 300, 0, 128]);
        // 128 aligned bytes become one 136-byte DES chunk.
        assert_eq!(records[3].header.crypt_size(), 136);
        assert_eq!(records[2].header.crypt_size(), 0);
    }

    #[test]
    fn test_progress_reaches_work_total() {
        let dir = TempDir::new().unwrap();
        let mut rng = rand::thread_rng();
        let sizes: Vec<usize> = (0..6).map(|_| rng.gen_range(1..2000)).collect();
        let src = write_files(dir.path(), &sizes);

        let packer = Packer::default();
        let total = packer.work_calculate(&src).unwrap();

        let mut tracker = ProgressTracker::new(Duration::ZERO);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        tracker.enable_with_callback(move |s| seen_clone.lock().unwrap().push(s.done_units));

        packer.pack_with(&src, &dir.path().join("p.seal"), &tracker, &CancelToken::new()).unwrap();
        assert_eq!(tracker.total_units(), total);
        assert_eq!(tracker.done_units(), total);
        assert_eq!(tracker.snapshot().done_files, 6);

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_dest_name_too_long_is_checked_first() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a".repeat(33));
        let err = Packer::default().pack(&[dir.path().join("missing")], &dest).unwrap_err();
        assert!(matches!(err, SealError::DestNameTooLong { capacity: 32, .. }));
        assert!(!dest.exists());

        let exact = dir.path().join("b".repeat(32));
        let src = write_files(dir.path(), &[5]);
        Packer::default().pack(&src, &exact).unwrap();
    }

    #[test]
    fn test_entry_name_too_long() {
        let dir = TempDir::new().unwrap();
        let long = dir.path().join(format!("{}.txt", "n".repeat(40)));
        fs::write(&long, b"data").unwrap();
        let err = Packer::default().pack(&[long], &dir.path().join("o")).unwrap_err();
        assert!(matches!(err, SealError::FieldTooLong { field: "name", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_backslash_name_is_refused_before_packing() {
        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("a\\b.txt");
        fs::write(&odd, b"data").unwrap();
        let dest = dir.path().join("o.seal");

        let err = Packer::default().pack(&[&odd], &dest).unwrap_err();
        assert!(matches!(err, SealError::UnsafeEntryName { ref name } if name == "a\\b.txt"));
        assert!(!dest.exists());
    }

    #[test]
    fn test_empty_input() {
        let dir = TempDir::new().unwrap();
        let none: [PathBuf; 0] = [];
        let err = Packer::default().pack(&none, &dir.path().join("o")).unwrap_err();
        assert!(matches!(err, SealError::EmptyInput));
    }

    #[test]
    fn test_missing_source_reports_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.txt");
        let err = Packer::default().pack(&[&missing], &dir.path().join("o")).unwrap_err();
        assert!(matches!(err.root(), SealError::Io { .. }));
        assert!(err.to_string().contains("gone.txt"));
    }

    #[test]
    fn test_cancelled_pack_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let src = write_files(dir.path(), &[4096, 4096]);
        let dest = dir.path().join("c.seal");
        let token = CancelToken::new();
        token.cancel();

        let err = Packer::default()
            .pack_with(&src, &dest, &ProgressTracker::default(), &token)
            .unwrap_err();
        assert!(matches!(err, SealError::Cancelled));
        assert!(!dest.exists());
    }
}
