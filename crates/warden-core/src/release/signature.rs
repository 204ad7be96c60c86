//! Detached RSA signatures over release payloads.

use std::fmt;
use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

/// Hash applied to the payload before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA384")]
    Sha384,
    #[serde(rename = "SHA512")]
    Sha512,
}

/// RSA signature padding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignaturePadding {
    Pkcs1,
    Pss,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
        })
    }
}

/// Key and signature failures.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("cannot use key {path}: {message}")]
    Key { path: String, message: String },

    #[error("signature does not match payload ({hash}/{padding:?})")]
    Mismatch {
        hash: HashAlgorithm,
        padding: SignaturePadding,
    },

    #[error("signing failed: {0}")]
    Signing(String),
}

fn read_pem(path: &Path) -> Result<String, IntegrityError> {
    std::fs::read_to_string(path).map_err(|e| IntegrityError::Key {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Verifies payloads against detached signatures with a fixed key and scheme.
#[derive(Clone)]
pub struct SignatureVerifier {
    key: RsaPublicKey,
    hash: HashAlgorithm,
    padding: SignaturePadding,
}

impl SignatureVerifier {
    pub fn new(key: RsaPublicKey, hash: HashAlgorithm, padding: SignaturePadding) -> Self {
        Self { key, hash, padding }
    }

    /// Parse a PEM public key, either SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`).
    pub fn from_pem(
        pem: &str,
        hash: HashAlgorithm,
        padding: SignaturePadding,
    ) -> Result<Self, IntegrityError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| IntegrityError::Key {
                path: "<pem>".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::new(key, hash, padding))
    }

    pub fn from_pem_file(
        path: &Path,
        hash: HashAlgorithm,
        padding: SignaturePadding,
    ) -> Result<Self, IntegrityError> {
        Self::from_pem(&read_pem(path)?, hash, padding).map_err(|e| match e {
            IntegrityError::Key { message, .. } => IntegrityError::Key {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Check `signature` over `payload`.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), IntegrityError> {
        let result = match (self.hash, self.padding) {
            (HashAlgorithm::Sha256, SignaturePadding::Pkcs1) => self.key.verify(
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(payload),
                signature,
            ),
            (HashAlgorithm::Sha384, SignaturePadding::Pkcs1) => self.key.verify(
                Pkcs1v15Sign::new::<Sha384>(),
                &Sha384::digest(payload),
                signature,
            ),
            (HashAlgorithm::Sha512, SignaturePadding::Pkcs1) => self.key.verify(
                Pkcs1v15Sign::new::<Sha512>(),
                &Sha512::digest(payload),
                signature,
            ),
            (HashAlgorithm::Sha256, SignaturePadding::Pss) => {
                self.key
                    .verify(Pss::new::<Sha256>(), &Sha256::digest(payload), signature)
            }
            (HashAlgorithm::Sha384, SignaturePadding::Pss) => {
                self.key
                    .verify(Pss::new::<Sha384>(), &Sha384::digest(payload), signature)
            }
            (HashAlgorithm::Sha512, SignaturePadding::Pss) => {
                self.key
                    .verify(Pss::new::<Sha512>(), &Sha512::digest(payload), signature)
            }
        };

        result.map_err(|_| IntegrityError::Mismatch {
            hash: self.hash,
            padding: self.padding,
        })
    }
}

/// Produces detached signatures; the publishing side of [`SignatureVerifier`].
pub struct Signer {
    key: RsaPrivateKey,
    hash: HashAlgorithm,
    padding: SignaturePadding,
}

impl Signer {
    /// Parse a PEM private key, either PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`).
    pub fn from_pem(
        pem: &str,
        hash: HashAlgorithm,
        padding: SignaturePadding,
    ) -> Result<Self, IntegrityError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| IntegrityError::Key {
                path: "<pem>".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { key, hash, padding })
    }

    pub fn from_pem_file(
        path: &Path,
        hash: HashAlgorithm,
        padding: SignaturePadding,
    ) -> Result<Self, IntegrityError> {
        Self::from_pem(&read_pem(path)?, hash, padding).map_err(|e| match e {
            IntegrityError::Key { message, .. } => IntegrityError::Key {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        let mut rng = rand::thread_rng();
        let key = &self.key;
        let result = match (self.hash, self.padding) {
            (HashAlgorithm::Sha256, SignaturePadding::Pkcs1) => key.sign_with_rng(
                &mut rng,
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(payload),
            ),
            (HashAlgorithm::Sha384, SignaturePadding::Pkcs1) => key.sign_with_rng(
                &mut rng,
                Pkcs1v15Sign::new::<Sha384>(),
                &Sha384::digest(payload),
            ),
            (HashAlgorithm::Sha512, SignaturePadding::Pkcs1) => key.sign_with_rng(
                &mut rng,
                Pkcs1v15Sign::new::<Sha512>(),
                &Sha512::digest(payload),
            ),
            (HashAlgorithm::Sha256, SignaturePadding::Pss) => {
                key.sign_with_rng(&mut rng, Pss::new::<Sha256>(), &Sha256::digest(payload))
            }
            (HashAlgorithm::Sha384, SignaturePadding::Pss) => {
                key.sign_with_rng(&mut rng, Pss::new::<Sha384>(), &Sha384::digest(payload))
            }
            (HashAlgorithm::Sha512, SignaturePadding::Pss) => {
                key.sign_with_rng(&mut rng, Pss::new::<Sha512>(), &Sha512::digest(payload))
            }
        };
        result.map_err(|e| IntegrityError::Signing(e.to_string()))
    }

    /// Verifier for the matching public key.
    pub fn verifier(&self) -> SignatureVerifier {
        SignatureVerifier::new(self.key.to_public_key(), self.hash, self.padding)
    }
}
