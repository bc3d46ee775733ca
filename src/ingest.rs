//! Source ingestion: raw bytes to decoded Lua text, or a reason to skip.
//!
//! Reverse-engineering targets are rarely clean UTF-8. Files may carry a BOM,
//! be saved in a regional code page, or be precompiled bytecode. Ingestion
//! never fails loudly: every path ends in an [`Ingested`] value.

use encoding_rs::{Encoding, GBK, UTF_8, WINDOWS_1252};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::types::FileStatus;

/// Signature at the start of precompiled Lua chunks (`ESC 'L' 'u' 'a'`).
pub const LUA_BYTECODE_SIGNATURE: &[u8] = b"\x1bL";

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// How many leading bytes are inspected for NUL when sniffing binary files.
const BINARY_PROBE_LEN: usize = 1024;

/// Candidate encodings in probe order. The last one decodes any byte sequence.
pub const CANDIDATE_ENCODINGS: &[&Encoding] = &[UTF_8, GBK, WINDOWS_1252];

/// Why a file is not turned into source text.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("file is precompiled Lua bytecode")]
    Bytecode,

    #[error("content is not text in {0}")]
    EncodingFailure(String),

    #[error("permission denied")]
    PermissionError,

    #[error("I/O error: {0}")]
    IoError(#[source] io::Error),
}

impl SkipReason {
    pub fn status(&self) -> FileStatus {
        match self {
            Self::Bytecode => FileStatus::Bytecode,
            Self::EncodingFailure(_) => FileStatus::EncodingFailure,
            Self::PermissionError => FileStatus::PermissionError,
            Self::IoError(_) => FileStatus::IoError,
        }
    }

    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionError,
            _ => Self::IoError(err),
        }
    }
}

/// Successfully decoded source text.
#[derive(Debug, Clone)]
pub struct DecodedSource {
    pub text: String,
    pub encoding: &'static Encoding,
}

/// Result of ingesting a file.
#[derive(Debug)]
pub enum Ingested {
    Decoded(DecodedSource),
    Skipped(SkipReason),
}

impl Ingested {
    pub fn into_result(self) -> Result<DecodedSource, SkipReason> {
        match self {
            Self::Decoded(source) => Ok(source),
            Self::Skipped(reason) => Err(reason),
        }
    }
}

/// Read `path` and decode it.
///
/// When `hint` names an encoding that already worked for this file (for
/// example during filtering), only that encoding is tried.
pub fn ingest(path: &Path, hint: Option<&'static Encoding>) -> Ingested {
    match fs::read(path) {
        Ok(bytes) => ingest_bytes(&bytes, hint),
        Err(e) => {
            tracing::debug!(target: "ingest", "read failed for {}: {e}", path.display());
            Ingested::Skipped(SkipReason::from_io(e))
        }
    }
}

/// Decode an in-memory buffer with the same rules as [`ingest`].
pub fn ingest_bytes(bytes: &[u8], hint: Option<&'static Encoding>) -> Ingested {
    let bytes = strip_bom(bytes);

    if is_bytecode(bytes) {
        return Ingested::Skipped(SkipReason::Bytecode);
    }

    if looks_binary(bytes) {
        return Ingested::Skipped(SkipReason::EncodingFailure(
            "any text encoding (NUL bytes present)".to_string(),
        ));
    }

    let candidates: &[&'static Encoding] = match &hint {
        Some(encoding) => std::slice::from_ref(encoding),
        None => CANDIDATE_ENCODINGS,
    };

    for &encoding in candidates {
        if let Some(text) = decode_strict(encoding, bytes) {
            return Ingested::Decoded(DecodedSource { text, encoding });
        }
    }

    let tried: Vec<&str> = candidates.iter().map(|e| e.name()).collect();
    Ingested::Skipped(SkipReason::EncodingFailure(tried.join(", ")))
}

/// Drop a leading UTF-8 byte-order mark.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// True if the (BOM-stripped) bytes start with the Lua bytecode signature.
pub fn is_bytecode(bytes: &[u8]) -> bool {
    bytes.starts_with(LUA_BYTECODE_SIGNATURE)
}

fn looks_binary(bytes: &[u8]) -> bool {
    let probe = &bytes[..bytes.len().min(BINARY_PROBE_LEN)];
    probe.contains(&0)
}

fn decode_strict(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn decoded(result: Ingested) -> DecodedSource {
        match result {
            Ingested::Decoded(source) => source,
            Ingested::Skipped(reason) => panic!("expected decoded source, got {reason}"),
        }
    }

    #[test]
    fn test_plain_utf8() {
        let source = decoded(ingest_bytes(b"print('hi')\n", None));
        assert_eq!(source.text, "print('hi')\n");
        assert_eq!(source.encoding, UTF_8);
    }

    #[test]
    fn test_bom_is_stripped() {
        let source = decoded(ingest_bytes(b"\xef\xbb\xbfprint(1)", None));
        assert_eq!(source.text, "print(1)");
    }

    #[test]
    fn test_bytecode_is_rejected() {
        let result = ingest_bytes(b"\x1bLuaR\x00\x01\x04", None);
        assert!(matches!(result, Ingested::Skipped(SkipReason::Bytecode)));
    }

    #[test]
    fn test_gbk_fallback() {
        // "中文" in GBK
        let bytes = b"print('\xd6\xd0\xce\xc4')";
        let source = decoded(ingest_bytes(bytes, None));
        assert_eq!(source.encoding, GBK);
        assert_eq!(source.text, "print('中文')");
    }

    #[test]
    fn test_single_byte_fallback_always_decodes() {
        // A lone 0xFF is invalid in both UTF-8 and GBK
        let source = decoded(ingest_bytes(b"x = '\xff'", None));
        assert_eq!(source.encoding, WINDOWS_1252);
    }

    #[test]
    fn test_hint_restricts_candidates() {
        let result = ingest_bytes(b"x = '\xff'", Some(UTF_8));
        match result {
            Ingested::Skipped(reason) => assert_eq!(reason.status(), FileStatus::EncodingFailure),
            Ingested::Decoded(_) => panic!("hinted encoding should be the only one tried"),
        }
    }

    #[test]
    fn test_nul_bytes_are_binary() {
        let result = ingest_bytes(b"abc\x00def", None);
        assert!(matches!(
            result,
            Ingested::Skipped(SkipReason::EncodingFailure(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let result = ingest(&temp.path().join("missing.lua"), None);
        match result {
            Ingested::Skipped(reason) => assert_eq!(reason.status(), FileStatus::IoError),
            Ingested::Decoded(_) => panic!("missing file cannot decode"),
        }
    }

    #[test]
    fn test_reads_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.lua");
        fs::write(&path, "local x = 1").unwrap();

        let source = decoded(ingest(&path, None));
        assert_eq!(source.text, "local x = 1");
    }
}
