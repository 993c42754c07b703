//! Cooperative cancellation for release runs.

mod token;

pub use token::CancellationToken;
