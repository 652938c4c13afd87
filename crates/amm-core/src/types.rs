//! Core domain types for the LP hedge backtester.

pub mod pool;
pub mod price;
pub mod window;

pub use pool::*;
pub use price::*;
pub use window::*;
