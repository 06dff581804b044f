//! Pluggable digest functions keyed by hash format
//!
//! The engine never enumerates hash algorithms itself. Instead a
//! [`HashRegistry`] maps each [`HashFormat`] identifier to a factory that
//! produces a fresh [`Digester`]. The registry is resolved once when a
//! [`crate::Fixity`] instance is built; every later lookup of an unknown
//! format is a configuration error.
//!
//! ## Built-in formats
//!
//! | Format   | Algorithm                   | Output           |
//! |----------|-----------------------------|------------------|
//! | `xxh64`  | XXH64, seed 0               | 16 hex chars     |
//! | `xxh3`   | XXH3 64-bit                 | 16 hex chars     |
//! | `xxh128` | XXH3 128-bit                | 32 hex chars     |
//! | `md5`    | MD5                         | 32 hex chars     |
//! | `sha1`   | SHA-1                       | 40 hex chars     |
//! | `sha256` | SHA-256                     | 64 hex chars     |
//!
//! ## Example
//!
//! ```rust
//! use fixity::hashing::{HashFormat, HashRegistry};
//!
//! let registry = HashRegistry::with_defaults();
//! let digest = registry.hash_bytes(&HashFormat::new("xxh64"), b"stuff\n").unwrap();
//! assert_eq!(digest, "94c399c2a9a21f9a");
//! ```

use crate::error::{FixityError, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Read buffer used when streaming file contents into digesters
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Identifier of a hash algorithm, e.g. `xxh64` or `md5`
///
/// Formats are open-ended: any string may name a format as long as a
/// digest function is registered for it. Identifiers are case-insensitive
/// and stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashFormat(String);

impl HashFormat {
    /// Create a format identifier
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HashFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HashFormat {
    fn from(name: &str) -> Self {
        HashFormat::new(name)
    }
}

impl std::str::FromStr for HashFormat {
    type Err = FixityError;

    fn from_str(s: &str) -> Result<Self> {
        let format = HashFormat::new(s);
        if format.0.is_empty() {
            return Err(FixityError::UnknownHashFormat(s.to_string()));
        }
        Ok(format)
    }
}

/// Incremental digest computation for one format
pub trait Digester: Send {
    /// Feed the next chunk of input
    fn update(&mut self, data: &[u8]);

    /// Consume the digester and return the lowercase hex digest
    fn finalize(self: Box<Self>) -> String;
}

/// Factory producing fresh digesters for one format
pub type DigesterFactory = Arc<dyn Fn() -> Box<dyn Digester> + Send + Sync>;

struct Xxh64Digester(xxhash_rust::xxh64::Xxh64);

impl Digester for Xxh64Digester {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> String {
        format!("{:016x}", self.0.digest())
    }
}

struct Xxh3Digester {
    state: xxhash_rust::xxh3::Xxh3,
    wide: bool,
}

impl Digester for Xxh3Digester {
    fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    fn finalize(self: Box<Self>) -> String {
        if self.wide {
            format!("{:032x}", self.state.digest128())
        } else {
            format!("{:016x}", self.state.digest())
        }
    }
}

/// Adapter for the RustCrypto `Digest` family (md5, sha1, sha2)
struct CryptoDigester<D>(D);

impl<D> Digester for CryptoDigester<D>
where
    D: Digest + Send + 'static,
{
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finalize(self: Box<Self>) -> String {
        hex::encode(self.0.finalize())
    }
}

/// Capability map from hash format to digest function
///
/// Cloning a registry is cheap; factories are shared.
#[derive(Clone, Default)]
pub struct HashRegistry {
    factories: BTreeMap<HashFormat, DigesterFactory>,
}

impl std::fmt::Debug for HashRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRegistry")
            .field("formats", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HashRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in format registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("xxh64", || {
            Box::new(Xxh64Digester(xxhash_rust::xxh64::Xxh64::new(0)))
        });
        registry.register("xxh3", || {
            Box::new(Xxh3Digester { state: xxhash_rust::xxh3::Xxh3::new(), wide: false })
        });
        registry.register("xxh128", || {
            Box::new(Xxh3Digester { state: xxhash_rust::xxh3::Xxh3::new(), wide: true })
        });
        registry.register("md5", || Box::new(CryptoDigester(md5::Md5::new())));
        registry.register("sha1", || Box::new(CryptoDigester(sha1::Sha1::new())));
        registry.register("sha256", || Box::new(CryptoDigester(sha2::Sha256::new())));
        registry
    }

    /// Register (or replace) the digest function for a format
    pub fn register<F>(&mut self, format: impl AsRef<str>, factory: F)
    where
        F: Fn() -> Box<dyn Digester> + Send + Sync + 'static,
    {
        self.factories.insert(HashFormat::new(format), Arc::new(factory));
    }

    /// Whether a digest function exists for `format`
    pub fn supports(&self, format: &HashFormat) -> bool {
        self.factories.contains_key(format)
    }

    /// All registered formats in canonical order
    pub fn formats(&self) -> impl Iterator<Item = &HashFormat> {
        self.factories.keys()
    }

    /// Fail unless every format in `formats` is registered
    pub fn ensure_supported<'a>(&self, formats: impl IntoIterator<Item = &'a HashFormat>) -> Result<()> {
        for format in formats {
            if !self.supports(format) {
                return Err(FixityError::UnknownHashFormat(format.to_string()));
            }
        }
        Ok(())
    }

    fn digester(&self, format: &HashFormat) -> Result<Box<dyn Digester>> {
        self.factories
            .get(format)
            .map(|factory| factory())
            .ok_or_else(|| FixityError::UnknownHashFormat(format.to_string()))
    }

    /// Hash an in-memory buffer in one format
    pub fn hash_bytes(&self, format: &HashFormat, data: &[u8]) -> Result<String> {
        let mut digester = self.digester(format)?;
        digester.update(data);
        Ok(digester.finalize())
    }

    /// Hash a file in one format
    pub fn hash_file(&self, path: &Path, format: &HashFormat) -> Result<String> {
        let mut digests = self.hash_file_multi(path, std::slice::from_ref(format))?;
        digests
            .pop()
            .map(|(_, digest)| digest)
            .ok_or_else(|| FixityError::internal("digester produced no output"))
    }

    /// Hash a file in several formats with a single read pass
    ///
    /// Results come back in the order of `formats`. The call is
    /// deterministic and has no side effects beyond reading the file.
    pub fn hash_file_multi(&self, path: &Path, formats: &[HashFormat]) -> Result<Vec<(HashFormat, String)>> {
        let file = File::open(path)?;
        let digests = self.hash_reader_multi(file, formats)?;
        trace!("Hashed {:?} in {} format(s)", path, formats.len());
        Ok(digests)
    }

    /// Hash everything `reader` yields in several formats
    pub fn hash_reader_multi<R: Read>(
        &self,
        mut reader: R,
        formats: &[HashFormat],
    ) -> Result<Vec<(HashFormat, String)>> {
        let mut digesters = formats
            .iter()
            .map(|format| self.digester(format).map(|d| (format.clone(), d)))
            .collect::<Result<Vec<_>>>()?;

        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            for (_, digester) in digesters.iter_mut() {
                digester.update(&buffer[..bytes_read]);
            }
        }

        Ok(digesters
            .into_iter()
            .map(|(format, digester)| (format, digester.finalize()))
            .collect())
    }
}
