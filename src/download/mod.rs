//! Streaming HTTP downloads and image persistence.
//!
//! [`HttpClient`] streams response bodies straight to disk; [`ImageDownloader`]
//! wraps it (and the message-source media path) with the ledger's
//! check-and-reserve discipline so every image is written at most once.

mod client;
mod error;
mod image;

pub use client::HttpClient;
pub use error::FetchError;
pub use image::{ImageDownloader, ImageError, ImageOutcome, ImageRef};
