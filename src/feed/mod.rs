mod fetcher;

pub use fetcher::{FeedFetcher, FetchCause, FetchError};
