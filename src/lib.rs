pub mod backend;
pub mod config;
pub mod delivery;
pub mod enrich;
pub mod poller;
pub mod storage;
pub mod translator;
pub mod types;
pub mod watermark;

pub use backend::{FeedBackend, GReaderClient, StreamItem};
pub use config::Config;
pub use delivery::{Delivery, LogDelivery, MailDelivery, MemoDelivery};
pub use enrich::{Enricher, FeedUpdate};
pub use poller::Poller;
pub use storage::Storage;
pub use translator::{GoogleTranslator, Translate};
pub use types::{Cycle, ItemContent, Post, PostItem, RelayError, Result, Subscription};
pub use watermark::WatermarkStore;
