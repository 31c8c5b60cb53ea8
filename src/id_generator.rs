//! Content identifier generation
//!
//! Identifiers are name-based (version 5) UUIDs rendered as 32 upper-case hex
//! characters. The namespace is itself derived from `globalnames.org` in the
//! DNS namespace, so ids are compatible with other nodes deriving them the
//! same way.
//!
//! Hashing state lives in generator instances that are checked out of a small
//! pool for a single derivation and handed back afterwards.

use crate::error::{Result, TnuError};
use sha1::{Digest, Sha1};
use std::sync::{Mutex, OnceLock};
use uuid::{Builder, Uuid};

/// Root name of the identifier namespace
pub const ROOT_NAME: &str = "globalnames.org";

/// Default number of idle generator instances kept around
pub const DEFAULT_POOL_SIZE: usize = 16;

static NAMESPACE: OnceLock<Uuid> = OnceLock::new();
static GLOBAL: OnceLock<ContentIdGenerator> = OnceLock::new();

/// Namespace all content ids are derived in (computed once per process)
pub fn namespace() -> Uuid {
    *NAMESPACE.get_or_init(|| Uuid::new_v5(&Uuid::NAMESPACE_DNS, ROOT_NAME.as_bytes()))
}

/// One reusable SHA-1 based name generator
struct NameBasedGenerator {
    namespace: Uuid,
    hasher: Sha1,
}

impl NameBasedGenerator {
    fn new(namespace: Uuid) -> Self {
        Self {
            namespace,
            hasher: Sha1::new(),
        }
    }

    fn generate(&mut self, name: &[u8]) -> Uuid {
        self.hasher.update(self.namespace.as_bytes());
        self.hasher.update(name);
        let digest = self.hasher.finalize_reset();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Builder::from_sha1_bytes(bytes).into_uuid()
    }
}

/// Bounded pool of generator instances
pub struct ContentIdGenerator {
    idle: Mutex<Vec<NameBasedGenerator>>,
    max_idle: usize,
}

impl ContentIdGenerator {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Process-wide generator with the default pool size
    pub fn global() -> &'static ContentIdGenerator {
        GLOBAL.get_or_init(|| ContentIdGenerator::new(DEFAULT_POOL_SIZE))
    }

    /// Derive the id of a text
    pub fn derive_id(&self, content: &str) -> String {
        let uuid = self.lease().generator().generate(content.as_bytes());
        format!("{:X}", uuid.simple())
    }

    /// Derive the id of raw bytes, which must be UTF-8 text
    pub fn derive_id_bytes(&self, content: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(content).map_err(|e| {
            TnuError::EncodingError(format!("content is not valid UTF-8 text: {}", e))
        })?;
        Ok(self.derive_id(text))
    }

    /// Number of generators currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lease(&self) -> GeneratorLease<'_> {
        let pooled = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let generator = pooled.unwrap_or_else(|| NameBasedGenerator::new(namespace()));
        GeneratorLease {
            owner: self,
            generator: Some(generator),
        }
    }

    fn give_back(&self, generator: NameBasedGenerator) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_idle {
            idle.push(generator);
        }
    }
}

impl Default for ContentIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

/// Checked-out generator, returned to the pool on drop
struct GeneratorLease<'a> {
    owner: &'a ContentIdGenerator,
    generator: Option<NameBasedGenerator>,
}

impl GeneratorLease<'_> {
    fn generator(&mut self) -> &mut NameBasedGenerator {
        self.generator
            .get_or_insert_with(|| NameBasedGenerator::new(namespace()))
    }
}

impl Drop for GeneratorLease<'_> {
    fn drop(&mut self) {
        if let Some(generator) = self.generator.take() {
            self.owner.give_back(generator);
        }
    }
}
