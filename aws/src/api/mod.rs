pub mod client;
pub mod error;
pub mod objects;

pub use client::{Client, RetryConfig};
pub use error::ApiError;
