//! Filtering stage: fingerprint each candidate and probe it for bytecode and
//! a usable text encoding before any parsing work is scheduled.

use encoding_rs::Encoding;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::ingest::{Ingested, SkipReason, ingest_bytes};
use crate::types::FileFingerprint;

/// Raw bytes of a candidate together with their fingerprint.
#[derive(Debug)]
pub struct Fingerprinted {
    pub bytes: Vec<u8>,
    pub fingerprint: FileFingerprint,
}

/// Read `path` and fingerprint its contents.
pub fn fingerprint(path: &Path) -> Result<Fingerprinted, SkipReason> {
    let bytes = fs::read(path).map_err(SkipReason::from_io)?;
    let fingerprint = FileFingerprint {
        hash: content_hash(&bytes),
        mtime: modified_time(path).unwrap_or(0),
    };
    Ok(Fingerprinted { bytes, fingerprint })
}

/// SHA-256 of `bytes`, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Modification time in seconds since the Unix epoch.
pub fn modified_time(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_secs())
}

/// Bytecode and encoding probe. Returns the encoding workers should use.
pub fn classify(bytes: &[u8]) -> Result<&'static Encoding, SkipReason> {
    match ingest_bytes(bytes, None) {
        Ingested::Decoded(source) => Ok(source.encoding),
        Ingested::Skipped(reason) => Err(reason),
    }
}
