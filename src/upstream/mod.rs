mod client;
mod errors;

pub use client::{CatalogUpstream, JamendoClient, RangeFetch};
pub use errors::UpstreamError;
