pub mod cache;
pub mod error;
pub mod graph;

pub use cache::{CACHE_VERSION, ScanCache};
pub use error::{CacheError, CacheResult};
pub use graph::{Action, CallNetwork, NodeRole};
