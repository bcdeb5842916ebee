//! Round data acquisition and the per-window cache.

mod round_store;

pub use round_store::{RetryPolicy, RoundDataStore, RoundHistory, StoreError};
