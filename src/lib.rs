//! Feed ingestion pipeline: polls syndication feeds, scrapes and sanitizes
//! the linked articles, and fans new items out over a partitioned message log.

pub mod bus;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod feed;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod telemetry;

pub use error::{AppError, Result};
