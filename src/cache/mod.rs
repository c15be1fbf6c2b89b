mod archive;
mod store;

pub use archive::ArchiveCache;
pub use store::{CacheError, CacheStore, HashWrite};
