//! Read-only runtime configuration: algorithm selection, buffer sizes and pool bounds.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, Family, RSA_MAX_PACKET};
use crate::error::{Result, SealError};

pub const AES_BUFFER_SIZE: usize = 128;
pub const DES_BUFFER_SIZE: usize = 128;
pub const RSA_PACKET_SIZE: usize = 64;
pub const BASE64_BUFFER_SIZE: usize = 128;
/// Files packed concurrently.
pub const CONFINE_FILES: usize = 5;
/// Chunks of one file transformed concurrently.
pub const CONFINE_BUFFERS: usize = 8192;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub algorithm: Algorithm,
    pub aes_buffer_size: usize,
    /// Shared by DES and 3DES.
    pub des_buffer_size: usize,
    pub rsa_packet_size: usize,
    pub base64_buffer_size: usize,
    pub confine_files: usize,
    pub confine_buffers: usize,
    /// Worker threads per pool. 0 = number of CPU cores.
    pub threads: usize,
    /// `false` switches to the unconfined pool (one thread per task).
    pub confined: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Aes,
            aes_buffer_size: AES_BUFFER_SIZE,
            des_buffer_size: DES_BUFFER_SIZE,
            rsa_packet_size: RSA_PACKET_SIZE,
            base64_buffer_size: BASE64_BUFFER_SIZE,
            confine_files: CONFINE_FILES,
            confine_buffers: CONFINE_BUFFERS,
            threads: 0,
            confined: true,
        }
    }
}

impl Config {
    pub fn with_algorithm(algorithm: Algorithm) -> Self {
        Self { algorithm, ..Self::default() }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(SealError::io(path))?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BULKSEAL_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(algo) = std::env::var("BULKSEAL_ALGORITHM") {
            self.algorithm = algo.parse()?;
        }
        if let Some(v) = env_usize("BULKSEAL_THREADS")? {
            self.threads = v;
        }
        if let Some(v) = env_usize("BULKSEAL_CONFINE_FILES")? {
            self.confine_files = v;
        }
        if let Some(v) = env_usize("BULKSEAL_CONFINE_BUFFERS")? {
            self.confine_buffers = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confine_files == 0 || self.confine_buffers == 0 {
            return Err(SealError::Config("pool bounds must be at least 1".into()));
        }
        for algo in [Algorithm::Aes, Algorithm::Des] {
            let size = self.buffer_size(algo);
            if size == 0 || size % algo.block_size() != 0 {
                return Err(SealError::Config(format!(
                    "{algo} buffer size {size} must be a non-zero multiple of {}",
                    algo.block_size()
                )));
            }
        }
        if self.rsa_packet_size == 0 || self.rsa_packet_size > RSA_MAX_PACKET {
            return Err(SealError::Config(format!(
                "RSA packet size {} must be in 1..={RSA_MAX_PACKET}",
                self.rsa_packet_size
            )));
        }
        if self.base64_buffer_size == 0 {
            return Err(SealError::Config("base64 buffer size must be non-zero".into()));
        }
        Ok(())
    }

    /// Plaintext chunk size used when splitting a file for `algorithm`.
    pub fn buffer_size(&self, algorithm: Algorithm) -> usize {
        match algorithm {
            Algorithm::Aes => self.aes_buffer_size,
            Algorithm::Des | Algorithm::TripleDes => self.des_buffer_size,
            Algorithm::Rsa => self.rsa_packet_size,
            Algorithm::Base64 => self.base64_buffer_size,
        }
    }

    /// Size of one transformed full chunk. Payloads are split at this stride on unpack;
    /// only the final piece may be shorter.
    pub fn crypt_chunk_size(&self, algorithm: Algorithm) -> usize {
        let buffer = self.buffer_size(algorithm);
        match algorithm.family() {
            // PKCS#7 always appends, so an aligned chunk grows by one block.
            Family::Block => buffer + algorithm.block_size(),
            Family::Asymmetric => crate::algorithm::RSA_UNPACK_SIZE,
            Family::Encoding => buffer.div_ceil(3) * 4,
        }
    }

    /// Resolved worker thread budget.
    pub fn thread_budget(&self) -> usize {
        if self.threads == 0 { num_cpus::get().max(1) } else { self.threads }
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| SealError::Config(format!("{name}={raw} is not a number"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.algorithm, Algorithm::Aes);
        assert_eq!(config.confine_files, 5);
        assert_eq!(config.confine_buffers, 8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            algorithm: Algorithm::TripleDes,
            des_buffer_size: 256,
            confine_files: 2,
            ..Config::default()
        };
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "algorithm": "B64" }"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.algorithm, Algorithm::Base64);
        assert_eq!(loaded.base64_buffer_size, BASE64_BUFFER_SIZE);
    }

    #[test]
    fn test_rejects_misaligned_block_buffer() {
        let config = Config { aes_buffer_size: 100, ..Config::default() };
        assert!(matches!(config.validate(), Err(SealError::Config(_))));
    }

    #[test]
    fn test_rejects_oversized_rsa_packet() {
        let config = Config { rsa_packet_size: 200, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_crypt_chunk_sizes() {
        let config = Config::default();
        assert_eq!(config.crypt_chunk_size(Algorithm::Aes), 144);
        assert_eq!(config.crypt_chunk_size(Algorithm::Des), 136);
        assert_eq!(config.crypt_chunk_size(Algorithm::Rsa), 128);
        assert_eq!(config.crypt_chunk_size(Algorithm::Base64), 172);
    }
}
