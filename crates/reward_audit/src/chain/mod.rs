//! Ledger access: the query seam, its HTTP client, and settings normalization.

pub(crate) mod fetch;
pub(crate) mod normalize;
mod source;

pub use fetch::{decode, FetchConfig, FetchError, LedgerClient, MINER_SC_ADDRESS};
pub use normalize::{
    parse_count, parse_fraction, parse_limit, parse_token_amount, NormalizeError,
};
pub use source::LedgerSource;
