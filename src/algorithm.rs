//! Algorithm tags and their fixed geometry (key width, IV width, block size).

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SealError;

/// Width of the RSA key field in an entry header. Holds a zero-padded PKCS#1 PEM private key.
pub const RSA_KEY_FIELD: usize = 1024;
/// Modulus size of per-file RSA keys.
pub const RSA_KEY_BITS: usize = 1024;
/// Ciphertext size of one RSA packet (modulus bytes).
pub const RSA_UNPACK_SIZE: usize = RSA_KEY_BITS / 8;
/// PKCS#1 v1.5 needs 11 bytes of overhead per packet.
pub const RSA_MAX_PACKET: usize = RSA_UNPACK_SIZE - 11;

/// The transform selected for a container. The tag is written to the
/// container header's 8-byte Type field.
#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "AES")]
    #[value(name = "aes")]
    Aes,
    #[serde(rename = "DES")]
    #[value(name = "des")]
    Des,
    #[serde(rename = "3DES")]
    #[value(name = "3des")]
    TripleDes,
    #[serde(rename = "RSA")]
    #[value(name = "rsa")]
    Rsa,
    #[serde(rename = "B64")]
    #[value(name = "b64")]
    Base64,
}

/// Transform families sharing one chunk discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Block,
    Asymmetric,
    Encoding,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] =
        [Algorithm::Aes, Algorithm::Des, Algorithm::TripleDes, Algorithm::Rsa, Algorithm::Base64];

    pub fn tag(self) -> &'static str {
        match self {
            Algorithm::Aes => "AES",
            Algorithm::Des => "DES",
            Algorithm::TripleDes => "3DES",
            Algorithm::Rsa => "RSA",
            Algorithm::Base64 => "B64",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.tag() == tag)
    }

    pub fn family(self) -> Family {
        match self {
            Algorithm::Aes | Algorithm::Des | Algorithm::TripleDes => Family::Block,
            Algorithm::Rsa => Family::Asymmetric,
            Algorithm::Base64 => Family::Encoding,
        }
    }

    /// Width of the Key field in this algorithm's entry header.
    pub fn key_width(self) -> usize {
        match self {
            Algorithm::Aes => 16,
            Algorithm::Des => 8,
            Algorithm::TripleDes => 24,
            Algorithm::Rsa => RSA_KEY_FIELD,
            Algorithm::Base64 => 0,
        }
    }

    /// Cipher block size; zero for non-block families.
    pub fn block_size(self) -> usize {
        match self {
            Algorithm::Aes => 16,
            Algorithm::Des | Algorithm::TripleDes => 8,
            Algorithm::Rsa | Algorithm::Base64 => 0,
        }
    }

    /// Width of the IV field. Block ciphers carry one block of random IV per file.
    pub fn iv_width(self) -> usize {
        self.block_size()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Algorithm {
    type Err = SealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let canonical = match upper.as_str() {
            "TDES" | "TRIPLEDES" | "DES3" => "3DES",
            "BASE64" => "B64",
            other => other,
        };
        Algorithm::from_tag(canonical)
            .ok_or_else(|| SealError::Config(format!("unknown algorithm '{s}'")))
    }
}
