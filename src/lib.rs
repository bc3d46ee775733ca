pub mod cli;
pub mod config;
pub mod ingest;
pub mod linker;
pub mod logging;
pub mod parsing;
pub mod scan;
pub mod storage;
pub mod types;

pub use config::Settings;
pub use ingest::{DecodedSource, Ingested, SkipReason, ingest};
pub use linker::{LinkUnit, link};
pub use parsing::{CallGraphExtractor, ExtractError, Extraction};
pub use scan::{
    CancelToken, NoopObserver, ScanError, ScanObserver, ScanOutcome, ScanPhase, ScanRequest,
    Scanner,
};
pub use storage::{Action, CacheError, CallNetwork, ScanCache};
pub use types::{
    CallGraphEntry, CallGraphMap, FileFingerprint, FileScanRecord, FileStatus, RequireList,
    ScopeTag,
};
