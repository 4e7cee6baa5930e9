//! Content digests (`algorithm:hex`).

use std::fmt;
use std::str::FromStr;

use imgpack_core::error::{PackError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

/// Suffix of layer blob entries inside an archive.
const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// A content digest such as `sha256:ab12...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Parse `algorithm:hex`.
    pub fn parse(value: &str) -> Result<Self> {
        let (algorithm, hex) = value
            .split_once(':')
            .ok_or_else(|| PackError::InvalidDigest(format!("'{}': expected algorithm:hex", value)))?;

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
        {
            return Err(PackError::InvalidDigest(format!(
                "'{}': bad algorithm '{}'",
                value, algorithm
            )));
        }
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PackError::InvalidDigest(format!(
                "'{}': encoded part must be hex",
                value
            )));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// SHA-256 digest of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// Finish a streaming SHA-256 hash.
    pub fn from_sha256(hasher: Sha256) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Check that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        if self.algorithm != "sha256" {
            return Err(PackError::InvalidDigest(format!(
                "{}: unsupported algorithm '{}'",
                self, self.algorithm
            )));
        }
        let actual = Self::sha256(data);
        if &actual != self {
            return Err(PackError::ArchiveCorrupt(format!(
                "digest mismatch: expected {}, content hashes to {}",
                self, actual
            )));
        }
        Ok(())
    }

    /// Name of this blob's entry in an archive: `<alg>-<hex>.tar.gz`.
    pub fn archive_name(&self) -> String {
        format!("{}-{}{}", self.algorithm, self.hex, ARCHIVE_SUFFIX)
    }

    /// Inverse of [`Digest::archive_name`].
    pub fn from_archive_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(ARCHIVE_SUFFIX)?;
        let (algorithm, hex) = stem.split_once('-')?;
        Self::parse(&format!("{}:{}", algorithm, hex)).ok()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Digest::parse(&raw).map_err(serde::de::Error::custom)
    }
}
