//! md5/sha1/sha256 digest helpers. Uploaded chunks are verified against all
//! three client-declared values, so every digest is computed in one pass.

use ring::digest;

/// Hex-encoded digests over one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSet {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// Incremental digest over a stream of chunks.
pub struct DigestContext {
    md5: md5::Context,
    sha1: digest::Context,
    sha256: digest::Context,
    bytes: u64,
}

impl DigestContext {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY),
            sha256: digest::Context::new(&digest::SHA256),
            bytes: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.md5.consume(chunk);
        self.sha1.update(chunk);
        self.sha256.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Total number of bytes consumed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> DigestSet {
        DigestSet {
            md5: hex::encode(self.md5.compute().0),
            sha1: hex::encode(self.sha1.finish()),
            sha256: hex::encode(self.sha256.finish()),
        }
    }
}

impl Default for DigestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest a complete in-memory payload.
pub fn digest_all(data: &[u8]) -> DigestSet {
    let mut ctx = DigestContext::new();
    ctx.update(data);
    ctx.finish()
}
