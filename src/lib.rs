//! Invoice intake and sales reporting for a cosmetics reseller.

pub mod config;
pub mod error;
pub mod import;
pub mod invoice;
pub mod llm;
pub mod pdf;
pub mod reports;
pub mod seed;
pub mod store;

pub use error::{Error, Result};
