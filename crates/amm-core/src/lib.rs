//! AMM Core Library
//!
//! Shared types, configuration, and market-data clients for the LP hedge
//! backtester.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
