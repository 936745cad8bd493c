//! Technical indicators used by the exit strategies.

pub mod adx;
pub mod vwap;

pub use adx::{Adx, AdxReading};
pub use vwap::Vwap;
