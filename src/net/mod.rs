//! Network collaborator for the caching worker.
//!
//! Requests and responses here are plain snapshots: a response body is
//! fully read into an immutable `Bytes` buffer before anyone sees it, so
//! the copy handed to the page and the copy written to the cache share
//! one buffer.

mod client;
mod error;
mod request;
mod response;

#[cfg(test)]
pub mod testing;

pub use client::{HttpNetwork, Network};
pub use error::NetworkError;
pub use request::{resolve, Request, RequestKey};
pub use response::Response;
