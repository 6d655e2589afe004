use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::Timestamp;

macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

/// One processed (published) article.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Link as supplied by the feed; its canonical form is the table key
    pub link: String,
    pub title: String,
    /// Informational tags, taken from the published post
    pub keywords: Vec<String>,
    /// Permalink of the published post
    pub published_reference: String,
    pub processed_at: Timestamp,
}

/// Entry of the similarity window returned by
/// [`Database::recent_titles`](crate::Database::recent_titles)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentTitle {
    pub title: String,
    pub processed_at: Timestamp,
}

def_table! {
    /// Tracks database/schema version
    db_version: () => u64
}

def_table! {
    /// Next insertion sequence number
    ///
    /// Keeps insertion order stable for records sharing a `processed_at`.
    db_seq: () => u64
}

def_table! {
    /// Processed articles, by canonical link
    articles: String => ArticleRecord
}

def_table! {
    /// Time index over [`articles`]: `(processed_at, seq)` => canonical link
    articles_by_time: (Timestamp, u64) => String
}
