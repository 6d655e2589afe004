//! Relays relevant articles from RSS/Atom feeds to a Telegram channel
//!
//! Each cycle fetches the configured feeds and runs every new article through
//! the [`pipeline::ArticlePipeline`]: relevance check, duplicate detection,
//! summarization, publishing and recording in the store.

pub mod ai;
pub mod channel;
pub mod config;
pub mod dedup;
pub mod feed;
pub mod image;
pub mod page;
pub mod pipeline;
pub mod scheduler;

pub const PROJECT_NAME: &str = "newsrelay";

pub const USER_AGENT: &str = concat!("newsrelay/", env!("CARGO_PKG_VERSION"));
