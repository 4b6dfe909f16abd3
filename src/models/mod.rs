mod content;
mod feed;

pub use content::ContentRecord;
pub use feed::{FeedItem, Source, UserRecord};
