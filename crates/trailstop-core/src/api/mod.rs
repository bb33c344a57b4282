//! Market data clients.

pub mod quotes;

pub use quotes::{FixedPriceOracle, HttpPriceOracle, PriceOracle};
