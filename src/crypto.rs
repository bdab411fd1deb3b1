//! Cryptography module: per-chunk transforms and per-file key material.
//!
//! Every chunk is an independent cryptographic unit. Block ciphers run CBC with PKCS#7
//! from the file's IV for each chunk, so chunks can be encrypted and decrypted in any
//! order without carrying state between them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::algorithm::{Algorithm, Family, RSA_KEY_BITS, RSA_MAX_PACKET};
use crate::error::{Result, SealError};

/// Converts one chunk to its transformed form and back.
pub trait ChunkTransform: Send + Sync {
    fn transform(&self, chunk: &[u8]) -> Result<Vec<u8>>;
    fn inverse(&self, chunk: &[u8]) -> Result<Vec<u8>>;
}

/// Key bytes and IV bytes as stored in an entry header.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Fresh per-file key material plus the transform that uses it.
pub fn generate(algorithm: Algorithm) -> Result<(KeyMaterial, Box<dyn ChunkTransform>)> {
    match algorithm.family() {
        Family::Block => {
            let material = KeyMaterial {
                key: random_bytes(algorithm.key_width()),
                iv: random_bytes(algorithm.iv_width()),
            };
            let cipher = CbcCipher::new(algorithm, &material.key, &material.iv)?;
            Ok((material, Box::new(cipher)))
        }
        Family::Asymmetric => {
            let cipher = RsaCipher::generate()?;
            let pem = cipher
                .private
                .to_pkcs1_pem(LineEnding::LF)
                .map_err(|e| SealError::Transform(format!("rsa key encoding: {e}")))?;
            let material = KeyMaterial { key: pem.as_bytes().to_vec(), iv: Vec::new() };
            Ok((material, Box::new(cipher)))
        }
        Family::Encoding => Ok((KeyMaterial::default(), Box::new(Base64Codec))),
    }
}

/// Rebuild the transform from an entry header's key and IV fields.
pub fn open(algorithm: Algorithm, key: &[u8], iv: &[u8]) -> Result<Box<dyn ChunkTransform>> {
    match algorithm.family() {
        Family::Block => Ok(Box::new(CbcCipher::new(algorithm, key, iv)?)),
        Family::Asymmetric => Ok(Box::new(RsaCipher::from_key_field(key)?)),
        Family::Encoding => {
            if !key.is_empty() {
                return Err(SealError::InvalidKeyLength {
                    algorithm: algorithm.tag(),
                    expected: 0,
                    actual: key.len(),
                });
            }
            Ok(Box::new(Base64Codec))
        }
    }
}

/// AES-128, DES or 3DES in CBC mode with PKCS#7 padding, applied per chunk.
pub struct CbcCipher {
    algorithm: Algorithm,
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl CbcCipher {
    pub fn new(algorithm: Algorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        if algorithm.family() != Family::Block {
            return Err(SealError::Transform(format!("{algorithm} is not a block cipher")));
        }
        let widths = [(algorithm.key_width(), key.len()), (algorithm.iv_width(), iv.len())];
        for (expected, actual) in widths {
            if expected != actual {
                return Err(SealError::InvalidKeyLength {
                    algorithm: algorithm.tag(),
                    expected,
                    actual,
                });
            }
        }
        Ok(Self { algorithm, key: key.to_vec(), iv: iv.to_vec() })
    }

    fn invalid_length(&self) -> SealError {
        SealError::InvalidKeyLength {
            algorithm: self.algorithm.tag(),
            expected: self.algorithm.key_width(),
            actual: self.key.len(),
        }
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Option<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let enc = cbc::Encryptor::<C>::new_from_slices(key, iv).ok()?;
    Some(enc.encrypt_padded_vec_mut::<Pkcs7>(data))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Option<Result<Vec<u8>>>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let dec = cbc::Decryptor::<C>::new_from_slices(key, iv).ok()?;
    Some(dec.decrypt_padded_vec_mut::<Pkcs7>(data).map_err(SealError::from))
}

impl ChunkTransform for CbcCipher {
    fn transform(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        let out = match self.algorithm {
            Algorithm::Aes => cbc_encrypt::<aes::Aes128>(&self.key, &self.iv, chunk),
            Algorithm::Des => cbc_encrypt::<des::Des>(&self.key, &self.iv, chunk),
            Algorithm::TripleDes => cbc_encrypt::<des::TdesEde3>(&self.key, &self.iv, chunk),
            _ => None,
        };
        out.ok_or_else(|| self.invalid_length())
    }

    fn inverse(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        let out = match self.algorithm {
            Algorithm::Aes => cbc_decrypt::<aes::Aes128>(&self.key, &self.iv, chunk),
            Algorithm::Des => cbc_decrypt::<des::Des>(&self.key, &self.iv, chunk),
            Algorithm::TripleDes => cbc_decrypt::<des::TdesEde3>(&self.key, &self.iv, chunk),
            _ => None,
        };
        out.ok_or_else(|| self.invalid_length())?
    }
}

/// 1024-bit RSA with PKCS#1 v1.5 encryption; one packet per chunk.
pub struct RsaCipher {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaCipher {
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)?;
        Ok(Self::from_private(private))
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { private, public }
    }

    /// Parse the zero-padded PEM stored in an RSA key field.
    pub fn from_key_field(field: &[u8]) -> Result<Self> {
        let expected = Algorithm::Rsa.key_width();
        if field.len() != expected {
            return Err(SealError::InvalidKeyLength {
                algorithm: "RSA",
                expected,
                actual: field.len(),
            });
        }
        let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let pem = std::str::from_utf8(&field[..end])
            .map_err(|_| SealError::Transform("rsa key field is not PEM text".into()))?;
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| SealError::Transform(format!("rsa key decoding: {e}")))?;
        Ok(Self::from_private(private))
    }
}

impl ChunkTransform for RsaCipher {
    fn transform(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        if chunk.len() > RSA_MAX_PACKET {
            return Err(SealError::Transform(format!(
                "rsa packet of {} bytes exceeds {RSA_MAX_PACKET}",
                chunk.len()
            )));
        }
        Ok(self.public.encrypt(&mut OsRng, Pkcs1v15Encrypt, chunk)?)
    }

    fn inverse(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        Ok(self.private.decrypt(Pkcs1v15Encrypt, chunk)?)
    }
}

/// Standard Base64 with padding. Keyless.
pub struct Base64Codec;

impl ChunkTransform for Base64Codec {
    fn transform(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        Ok(STANDARD.encode(chunk).into_bytes())
    }

    fn inverse(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(chunk)?)
    }
}

pub fn base64_encode(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

pub fn base64_decode(encoded: &str) -> Result<String> {
    let raw = STANDARD.decode(encoded)?;
    String::from_utf8(raw).map_err(|_| SealError::Transform("decoded text is not UTF-8".into()))
}
