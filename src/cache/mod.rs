pub mod contract;
pub mod fingerprint;
pub mod store;

pub use contract::OutputContract;
pub use fingerprint::{canonical_json, step_fingerprint, tool_versions_for};
pub use store::{CacheEntry, CachePolicy, CacheStore, CacheStoreError};
