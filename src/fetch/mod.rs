//! Fetch Module
//!
//! Stale-while-revalidate reads over the shared cache.

mod swr;

pub use swr::{QueryState, SwrOptions, SwrQuery};
